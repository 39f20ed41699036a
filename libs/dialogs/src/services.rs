//! Language-understanding collaborators consumed by dialogs.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use relay_core::{BotResult, TurnContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Intent scores and entities recognised in an utterance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognizerResult {
    pub text: String,
    #[serde(default)]
    pub intents: BTreeMap<String, f64>,
    #[serde(default)]
    pub entities: Value,
}

impl RecognizerResult {
    /// Highest-scoring intent; ties resolve to the alphabetically first name.
    pub fn top_intent(&self) -> Option<(&str, f64)> {
        self.intents
            .iter()
            .max_by(|a, b| {
                a.1.partial_cmp(b.1)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| b.0.cmp(a.0))
            })
            .map(|(name, score)| (name.as_str(), *score))
    }
}

#[async_trait]
pub trait Recognizer: Send + Sync {
    /// `None` when the recognizer is not configured.
    async fn recognize(&self, turn: &TurnContext) -> BotResult<Option<RecognizerResult>>;
}

/// Limits applied to an answer lookup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    pub top: usize,
    pub score_threshold: f32,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top: 3,
            score_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub answer: String,
    pub score: f32,
    #[serde(default)]
    pub questions: Vec<String>,
}

#[async_trait]
pub trait AnswerService: Send + Sync {
    /// Best answers for the turn's utterance; empty means no match.
    async fn get_answers(
        &self,
        turn: &TurnContext,
        options: QueryOptions,
    ) -> BotResult<Vec<QueryResult>>;
}
