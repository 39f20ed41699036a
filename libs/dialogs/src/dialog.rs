use async_trait::async_trait;
use relay_core::{BotResult, TurnContext};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::DialogContext;

/// Outcome of driving the dialog stack for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DialogTurnStatus {
    /// Nothing was on the stack.
    Empty,
    /// A dialog is suspended awaiting the next activity.
    Waiting,
    /// The root dialog finished.
    Complete,
    /// The stack was cancelled.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DialogTurnResult {
    pub status: DialogTurnStatus,
    pub result: Option<Value>,
}

impl DialogTurnResult {
    pub fn empty() -> Self {
        Self {
            status: DialogTurnStatus::Empty,
            result: None,
        }
    }

    pub fn waiting() -> Self {
        Self {
            status: DialogTurnStatus::Waiting,
            result: None,
        }
    }

    pub fn complete(result: Option<Value>) -> Self {
        Self {
            status: DialogTurnStatus::Complete,
            result,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: DialogTurnStatus::Cancelled,
            result: None,
        }
    }
}

/// Why a dialog is being resumed or ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogReason {
    BeginCalled,
    ContinueCalled,
    EndCalled,
    ReplaceCalled,
    CancelCalled,
    NextCalled,
}

/// One frame of the persisted dialog stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogInstance {
    pub id: String,
    #[serde(default)]
    pub state: Map<String, Value>,
}

impl DialogInstance {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Map::new(),
        }
    }
}

/// Persisted form of a conversation's dialog stack; the last element is the active dialog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogState {
    #[serde(default)]
    pub dialog_stack: Vec<DialogInstance>,
}

impl DialogState {
    pub fn depth(&self) -> usize {
        self.dialog_stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dialog_stack.is_empty()
    }
}

/// A resumable unit of conversation registered in a [`crate::DialogSet`].
///
/// `begin_dialog` runs after the instance was pushed; its state lives in
/// `dc.active_dialog_mut()`. The default `continue_dialog` ends the dialog and the default
/// `resume_dialog` ends it with the child's result.
#[async_trait]
pub trait Dialog: Send + Sync {
    fn id(&self) -> &str;

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        options: Option<Value>,
    ) -> BotResult<DialogTurnResult>;

    async fn continue_dialog(&self, dc: &mut DialogContext<'_>) -> BotResult<DialogTurnResult> {
        dc.end_dialog(None).await
    }

    async fn resume_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _reason: DialogReason,
        result: Option<Value>,
    ) -> BotResult<DialogTurnResult> {
        dc.end_dialog(result).await
    }

    /// Called after the instance was popped, for cleanup.
    async fn end_dialog(
        &self,
        _turn: &TurnContext,
        _instance: &DialogInstance,
        _reason: DialogReason,
    ) -> BotResult<()> {
        Ok(())
    }
}
