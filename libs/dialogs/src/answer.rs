use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::BotResult;
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    AnswerService, Dialog, DialogContext, DialogReason, DialogTurnResult, QueryOptions, Recognizer,
};

pub const DEFAULT_NO_ANSWER: &str = "No answers were found.";
pub const DEFAULT_NOT_UNDERSTOOD: &str =
    "Sorry, I didn't get that. Please try asking in a different way.";

/// Single-shot dialog answering the current utterance from an [`AnswerService`].
///
/// Ends with `{"answer", "score"}` of the best match, or with no result after sending
/// the no-answer text.
pub struct AnswerDialog {
    id: String,
    service: Arc<dyn AnswerService>,
    options: QueryOptions,
    no_answer: String,
}

impl AnswerDialog {
    pub fn new(id: impl Into<String>, service: Arc<dyn AnswerService>) -> Self {
        Self {
            id: id.into(),
            service,
            options: QueryOptions::default(),
            no_answer: DEFAULT_NO_ANSWER.to_string(),
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_no_answer(mut self, text: impl Into<String>) -> Self {
        self.no_answer = text.into();
        self
    }
}

#[async_trait]
impl Dialog for AnswerDialog {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _options: Option<Value>,
    ) -> BotResult<DialogTurnResult> {
        let answers = self.service.get_answers(dc.turn(), self.options).await?;
        let best = answers
            .into_iter()
            .filter(|a| a.score >= self.options.score_threshold)
            .take(self.options.top.max(1))
            .next();

        match best {
            Some(best) => {
                debug!(dialog = %self.id, score = best.score, "answer found");
                dc.turn().send_text(best.answer.clone()).await?;
                dc.end_dialog(Some(json!({"answer": best.answer, "score": best.score})))
                    .await
            }
            None => {
                debug!(dialog = %self.id, "no answer above threshold");
                dc.turn().send_text(self.no_answer.clone()).await?;
                dc.end_dialog(None).await
            }
        }
    }
}

/// Routes an utterance to a child dialog by its top recognised intent.
///
/// Ends with the child's result; when no intent maps to a dialog (or the recognizer is not
/// configured) it sends the not-understood text and ends without a result.
pub struct IntentDialog {
    id: String,
    recognizer: Arc<dyn Recognizer>,
    routes: HashMap<String, String>,
    min_score: f64,
    not_understood: String,
}

impl IntentDialog {
    pub fn new(id: impl Into<String>, recognizer: Arc<dyn Recognizer>) -> Self {
        Self {
            id: id.into(),
            recognizer,
            routes: HashMap::new(),
            min_score: 0.5,
            not_understood: DEFAULT_NOT_UNDERSTOOD.to_string(),
        }
    }

    pub fn route(mut self, intent: impl Into<String>, dialog_id: impl Into<String>) -> Self {
        self.routes.insert(intent.into(), dialog_id.into());
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }
}

#[async_trait]
impl Dialog for IntentDialog {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        options: Option<Value>,
    ) -> BotResult<DialogTurnResult> {
        let recognized = self.recognizer.recognize(dc.turn()).await?;
        let target = recognized.as_ref().and_then(|result| {
            let (intent, score) = result.top_intent()?;
            if score < self.min_score {
                return None;
            }
            self.routes.get(intent).cloned()
        });

        match target {
            Some(dialog_id) => {
                debug!(dialog = %self.id, target = %dialog_id, "routing by intent");
                dc.begin_dialog(&dialog_id, options).await
            }
            None => {
                dc.turn().send_text(self.not_understood.clone()).await?;
                dc.end_dialog(None).await
            }
        }
    }

    async fn resume_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _reason: DialogReason,
        result: Option<Value>,
    ) -> BotResult<DialogTurnResult> {
        dc.end_dialog(result).await
    }
}
