use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{
    Activity, ActivityType, Bot, BotError, BotResult, EndOfConversationCode, TurnContext,
};
use relay_state::{BotState, StatePropertyAccessor};
use tracing::{debug, info, instrument};

use crate::{Dialog, DialogContext, DialogState, DialogTurnResult, DialogTurnStatus};

/// Property of the conversation bag holding the dialog stack.
pub const DIALOG_STATE_PROPERTY: &str = "DialogState";

/// Registry of dialogs addressable by id.
#[derive(Clone, Default)]
pub struct DialogSet {
    dialogs: HashMap<String, Arc<dyn Dialog>>,
}

impl DialogSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, dialog: impl Dialog + 'static) -> Self {
        self.insert(Arc::new(dialog));
        self
    }

    pub fn insert(&mut self, dialog: Arc<dyn Dialog>) {
        self.dialogs.insert(dialog.id().to_string(), dialog);
    }

    pub fn find(&self, id: &str) -> Option<Arc<dyn Dialog>> {
        self.dialogs.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.dialogs.contains_key(id)
    }

    /// Drives the persisted dialog stack with the turn's activity.
    ///
    /// An `endOfConversation` from a parent cancels the stack. Otherwise the active dialog is
    /// continued, and the root dialog begun when nothing was active. The stack is written
    /// back through `accessor` only when the run succeeds.
    #[instrument(name = "relay.dialogs.run", skip_all, fields(root = root_id))]
    pub async fn run(
        &self,
        root_id: &str,
        turn: &TurnContext,
        accessor: &StatePropertyAccessor<DialogState>,
    ) -> BotResult<DialogTurnResult> {
        if !self.contains(root_id) {
            return Err(BotError::validation(format!(
                "root dialog '{root_id}' is not registered"
            )));
        }
        let state = accessor.get_or_default(turn, DialogState::default).await?;
        if let Some(unknown) = state
            .dialog_stack
            .iter()
            .find(|instance| !self.contains(&instance.id))
        {
            return Err(BotError::validation(format!(
                "persisted dialog stack references unknown dialog '{}'",
                unknown.id
            )));
        }

        let activity = turn.activity();
        let mut dc = DialogContext::new(self, turn, state);
        let result = if activity.kind == ActivityType::EndOfConversation {
            if turn.is_skill_call() {
                info!(
                    depth = dc.stack().len(),
                    "caller ended the conversation; cancelling dialogs"
                );
                dc.cancel_all_dialogs().await?
            } else {
                dc.continue_dialog().await?
            }
        } else {
            let continued = dc.continue_dialog().await?;
            if continued.status == DialogTurnStatus::Empty {
                dc.begin_dialog(root_id, None).await?
            } else {
                continued
            }
        };

        if result.status == DialogTurnStatus::Complete && turn.is_skill_call() {
            let mut eoc =
                Activity::end_of_conversation(EndOfConversationCode::CompletedSuccessfully)
                    .with_locale(activity.locale.clone());
            eoc.value = result.result.clone();
            turn.send_activity(eoc).await?;
        }

        let state = dc.into_state();
        debug!(status = ?result.status, depth = state.depth(), "dialog run finished");
        accessor.set(turn, &state).await?;
        Ok(result)
    }
}

/// Bot that runs a dialog set rooted at one dialog for every turn.
pub struct DialogBot {
    dialogs: DialogSet,
    root_id: String,
    dialog_state: StatePropertyAccessor<DialogState>,
}

impl DialogBot {
    pub fn new(dialogs: DialogSet, root_id: impl Into<String>, conversation: &BotState) -> Self {
        Self {
            dialogs,
            root_id: root_id.into(),
            dialog_state: conversation.property(DIALOG_STATE_PROPERTY),
        }
    }

    pub fn dialog_state(&self) -> &StatePropertyAccessor<DialogState> {
        &self.dialog_state
    }
}

#[async_trait]
impl Bot for DialogBot {
    async fn on_turn(&self, turn: &TurnContext) -> BotResult<()> {
        self.dialogs
            .run(&self.root_id, turn, &self.dialog_state)
            .await?;
        Ok(())
    }
}
