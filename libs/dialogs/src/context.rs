use std::sync::Arc;

use relay_core::{BotError, BotResult, TurnContext, ensure_not_blank};
use serde_json::Value;
use tracing::debug;

use crate::{Dialog, DialogInstance, DialogReason, DialogSet, DialogState, DialogTurnResult};

/// Working copy of a conversation's dialog stack for the duration of one turn.
pub struct DialogContext<'a> {
    dialogs: &'a DialogSet,
    turn: &'a TurnContext,
    stack: Vec<DialogInstance>,
}

impl<'a> DialogContext<'a> {
    pub fn new(dialogs: &'a DialogSet, turn: &'a TurnContext, state: DialogState) -> Self {
        Self {
            dialogs,
            turn,
            stack: state.dialog_stack,
        }
    }

    pub fn turn(&self) -> &'a TurnContext {
        self.turn
    }

    pub fn dialogs(&self) -> &'a DialogSet {
        self.dialogs
    }

    pub fn stack(&self) -> &[DialogInstance] {
        &self.stack
    }

    /// Top of the stack.
    pub fn active_dialog(&self) -> Option<&DialogInstance> {
        self.stack.last()
    }

    pub fn active_dialog_mut(&mut self) -> Option<&mut DialogInstance> {
        self.stack.last_mut()
    }

    pub(crate) fn instance_mut(&mut self, depth: usize) -> Option<&mut DialogInstance> {
        self.stack.get_mut(depth)
    }

    pub fn into_state(self) -> DialogState {
        DialogState {
            dialog_stack: self.stack,
        }
    }

    fn find(&self, id: &str) -> BotResult<Arc<dyn Dialog>> {
        self.dialogs
            .find(id)
            .ok_or_else(|| BotError::validation(format!("dialog '{id}' is not registered")))
    }

    /// Pushes a new instance of `id` and begins it.
    pub async fn begin_dialog(
        &mut self,
        id: &str,
        options: Option<Value>,
    ) -> BotResult<DialogTurnResult> {
        ensure_not_blank(id, "dialog id")?;
        let dialog = self.find(id)?;
        self.stack.push(DialogInstance::new(id));
        debug!(dialog = id, depth = self.stack.len(), "begin dialog");
        dialog.begin_dialog(self, options).await
    }

    /// Continues the active dialog with the current activity.
    pub async fn continue_dialog(&mut self) -> BotResult<DialogTurnResult> {
        let Some(id) = self.active_dialog().map(|instance| instance.id.clone()) else {
            return Ok(DialogTurnResult::empty());
        };
        let dialog = self.find(&id)?;
        dialog.continue_dialog(self).await
    }

    /// Pops the active dialog and resumes its parent with `result`.
    pub async fn end_dialog(&mut self, result: Option<Value>) -> BotResult<DialogTurnResult> {
        self.end_active(DialogReason::EndCalled).await?;
        match self.active_dialog().map(|instance| instance.id.clone()) {
            Some(parent) => {
                let dialog = self.find(&parent)?;
                dialog
                    .resume_dialog(self, DialogReason::EndCalled, result)
                    .await
            }
            None => Ok(DialogTurnResult::complete(result)),
        }
    }

    /// Ends the active dialog and starts `id` in its place, without resuming the parent.
    pub async fn replace_dialog(
        &mut self,
        id: &str,
        options: Option<Value>,
    ) -> BotResult<DialogTurnResult> {
        self.end_active(DialogReason::ReplaceCalled).await?;
        self.begin_dialog(id, options).await
    }

    /// Pops every dialog, innermost first.
    pub async fn cancel_all_dialogs(&mut self) -> BotResult<DialogTurnResult> {
        if self.stack.is_empty() {
            return Ok(DialogTurnResult::empty());
        }
        while !self.stack.is_empty() {
            self.end_active(DialogReason::CancelCalled).await?;
        }
        Ok(DialogTurnResult::cancelled())
    }

    async fn end_active(&mut self, reason: DialogReason) -> BotResult<()> {
        let Some(instance) = self.stack.pop() else {
            return Ok(());
        };
        debug!(dialog = %instance.id, ?reason, "end dialog");
        let dialog = self.find(&instance.id)?;
        dialog.end_dialog(self.turn, &instance, reason).await
    }
}
