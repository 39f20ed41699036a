//! The bot the runner hosts: a root waterfall that hands the utterance to a configured
//! skill when it names one, and to the answer dialog otherwise.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use relay_core::{ActivityType, ActivityRouter, Bot, BotResult, TurnContext};
use relay_dialogs::{
    AnswerDialog, AnswerService, DialogBot, DialogSet, DialogTurnResult, QueryOptions,
    QueryResult, WaterfallDialog, WaterfallStepContext,
};
use relay_skills::{
    SkillClient, SkillConversationIdFactory, SkillDialog, SkillDialogOptions,
    SkillsConfiguration,
};
use relay_state::BotState;
use serde::Deserialize;

pub const ROOT_DIALOG: &str = "main";
pub const ANSWER_DIALOG: &str = "answer";

type StepFuture<'s> = BoxFuture<'s, BotResult<DialogTurnResult>>;

pub fn skill_dialog_id(skill_id: &str) -> String {
    format!("skill:{}", skill_id.trim().to_lowercase())
}

/// One knowledge-base entry: alternative phrasings and their answer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QnaEntry {
    pub questions: Vec<String>,
    pub answer: String,
}

/// Answers from a fixed knowledge base, scored by the share of a question's words found
/// in the utterance.
#[derive(Debug, Clone, Default)]
pub struct StaticAnswerService {
    entries: Vec<QnaEntry>,
}

impl StaticAnswerService {
    pub fn new(entries: Vec<QnaEntry>) -> Self {
        Self { entries }
    }

    /// Reads a JSON array of `{ "questions": [...], "answer": "..." }`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading answers {}", path.display()))?;
        let entries = serde_json::from_str(&raw)
            .with_context(|| format!("parsing answers {}", path.display()))?;
        Ok(Self::new(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn words(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn overlap(question: &str, utterance: &BTreeSet<String>) -> f32 {
    let question = words(question);
    if question.is_empty() {
        return 0.0;
    }
    let matched = question.iter().filter(|w| utterance.contains(*w)).count();
    matched as f32 / question.len() as f32
}

#[async_trait]
impl AnswerService for StaticAnswerService {
    async fn get_answers(
        &self,
        turn: &TurnContext,
        options: QueryOptions,
    ) -> BotResult<Vec<QueryResult>> {
        let activity = turn.activity();
        let Some(text) = activity.text() else {
            return Ok(Vec::new());
        };
        let utterance = words(text);
        let mut results: Vec<QueryResult> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let score = entry
                    .questions
                    .iter()
                    .map(|q| overlap(q, &utterance))
                    .fold(0.0, f32::max);
                (score > 0.0 && score >= options.score_threshold).then(|| QueryResult {
                    answer: entry.answer.clone(),
                    score,
                    questions: entry.questions.clone(),
                })
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(options.top);
        Ok(results)
    }
}

/// Everything a root bot needs to call its skills.
#[derive(Clone)]
pub struct SkillWiring {
    pub bot_id: String,
    pub config: SkillsConfiguration,
    pub client: Arc<dyn SkillClient>,
    pub conversation_ids: SkillConversationIdFactory,
    pub expect_replies: bool,
}

fn route<'s>(step: &'s mut WaterfallStepContext<'_, '_>) -> StepFuture<'s> {
    Box::pin(async move {
        let named = step
            .turn()
            .activity()
            .text()
            .map(skill_dialog_id)
            .filter(|id| step.context().dialogs().contains(id));
        match named {
            Some(skill) => step.begin_dialog(&skill, None).await,
            None => step.begin_dialog(ANSWER_DIALOG, None).await,
        }
    })
}

fn finish<'s>(step: &'s mut WaterfallStepContext<'_, '_>) -> StepFuture<'s> {
    Box::pin(async move {
        let result = step.result().cloned();
        step.end_dialog(result).await
    })
}

pub fn root_dialogs(answers: Arc<dyn AnswerService>, skills: Option<&SkillWiring>) -> DialogSet {
    let mut dialogs = DialogSet::new()
        .add(WaterfallDialog::new(ROOT_DIALOG).step(route).step(finish))
        .add(AnswerDialog::new(ANSWER_DIALOG, answers));
    if let Some(wiring) = skills {
        for skill in &wiring.config.skills {
            let options = SkillDialogOptions {
                bot_id: wiring.bot_id.clone(),
                skill: skill.clone(),
                skill_host_endpoint: wiring.config.skill_host_endpoint.clone(),
                client: wiring.client.clone(),
                conversation_ids: wiring.conversation_ids.clone(),
                expect_replies: wiring.expect_replies,
            };
            dialogs.insert(Arc::new(SkillDialog::new(
                skill_dialog_id(&skill.id),
                options,
            )));
        }
    }
    dialogs
}

/// Routes messages and `endOfConversation` into the dialog stack; other activity types
/// are ignored.
pub fn root_bot(dialogs: DialogSet, conversation_state: &BotState) -> Arc<dyn Bot> {
    let dialog_bot: Arc<dyn Bot> =
        Arc::new(DialogBot::new(dialogs, ROOT_DIALOG, conversation_state));
    Arc::new(
        ActivityRouter::new()
            .on(ActivityType::Message, dialog_bot.clone())
            .on(ActivityType::EndOfConversation, dialog_bot),
    )
}
