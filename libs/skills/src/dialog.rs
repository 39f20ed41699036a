use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{
    Activity, ActivityType, BotError, BotResult, DeliveryMode, EndOfConversationCode, TurnContext,
};
use relay_dialogs::{Dialog, DialogContext, DialogInstance, DialogReason, DialogTurnResult};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::{SkillClient, SkillConversationIdFactory, SkillDescriptor};

const SKILL_CONVERSATION_ID: &str = "skillConversationId";

/// Everything a [`SkillDialog`] needs to reach its skill.
#[derive(Clone)]
pub struct SkillDialogOptions {
    /// App id of the calling (root) bot.
    pub bot_id: String,
    pub skill: SkillDescriptor,
    /// Endpoint the skill posts its callbacks to.
    pub skill_host_endpoint: String,
    pub client: Arc<dyn SkillClient>,
    pub conversation_ids: SkillConversationIdFactory,
    /// Ask the skill to answer inline (`expectReplies`) instead of calling back.
    pub expect_replies: bool,
}

/// Parent-side dialog that hands the conversation to a skill until the skill sends
/// `endOfConversation`.
///
/// Begin options, when present, are the activity to forward; otherwise the turn's activity
/// is forwarded. The dialog ends with the `value` of the skill's `endOfConversation`.
pub struct SkillDialog {
    id: String,
    options: SkillDialogOptions,
}

impl SkillDialog {
    pub fn new(id: impl Into<String>, options: SkillDialogOptions) -> Self {
        Self {
            id: id.into(),
            options,
        }
    }

    pub fn skill(&self) -> &SkillDescriptor {
        &self.options.skill
    }

    fn conversation_id(instance: Option<&DialogInstance>) -> BotResult<String> {
        instance
            .and_then(|i| i.state.get(SKILL_CONVERSATION_ID))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BotError::validation("skill dialog has no skill conversation id"))
    }

    /// Posts `activity` to the skill. Returns the skill's `endOfConversation` when it answered
    /// inline with one; every other inline reply is sent to the user.
    async fn send_to_skill(
        &self,
        turn: &TurnContext,
        conversation_id: &str,
        mut activity: Activity,
    ) -> BotResult<Option<Activity>> {
        if self.options.expect_replies {
            activity.delivery_mode = Some(DeliveryMode::ExpectReplies);
        }
        let skill = &self.options.skill;
        let response = self
            .options
            .client
            .post_activity(
                &self.options.bot_id,
                skill,
                &self.options.skill_host_endpoint,
                conversation_id,
                activity,
            )
            .await?;
        if !response.is_success() {
            return Err(BotError::Transport(anyhow::anyhow!(
                "error invoking skill `{}`: HTTP {}",
                skill.id,
                response.status
            )));
        }

        let mut end_of_conversation = None;
        if self.options.expect_replies {
            // Inline replies are addressed to the skill conversation; readdress them to the user.
            let parent = turn.conversation_reference();
            for mut reply in response.expected_replies().unwrap_or_default().activities {
                if reply.kind == ActivityType::EndOfConversation {
                    end_of_conversation = Some(reply);
                } else {
                    reply.reply_to_id = None;
                    turn.send_activity(reply.apply_conversation_reference(&parent, false))
                        .await?;
                }
            }
        }
        Ok(end_of_conversation)
    }

    async fn forward(
        &self,
        dc: &mut DialogContext<'_>,
        activity: Activity,
    ) -> BotResult<DialogTurnResult> {
        let conversation_id = Self::conversation_id(dc.active_dialog())?;
        match self
            .send_to_skill(dc.turn(), &conversation_id, activity)
            .await?
        {
            Some(eoc) => {
                info!(
                    skill = %self.options.skill.id,
                    code = ?eoc.code,
                    "skill ended the conversation"
                );
                self.options.conversation_ids.delete(&conversation_id).await?;
                dc.end_dialog(eoc.value).await
            }
            None => Ok(DialogTurnResult::waiting()),
        }
    }
}

#[async_trait]
impl Dialog for SkillDialog {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(name = "relay.skills.begin", skip_all, fields(skill = %self.options.skill.id))]
    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        options: Option<Value>,
    ) -> BotResult<DialogTurnResult> {
        let activity = match options {
            Some(value) if !value.is_null() => serde_json::from_value::<Activity>(value)?,
            _ => (*dc.turn().activity()).clone(),
        };
        let reference = dc.turn().conversation_reference();
        let conversation_id = self
            .options
            .conversation_ids
            .create(&reference, &self.options.skill)
            .await?;
        if let Some(instance) = dc.active_dialog_mut() {
            instance
                .state
                .insert(SKILL_CONVERSATION_ID.into(), Value::String(conversation_id.clone()));
        }
        match self.forward(dc, activity).await {
            Ok(result) => Ok(result),
            Err(err) => {
                // The turn rolls back its dialog stack, so nothing would ever reach this id.
                let ids = &self.options.conversation_ids;
                if let Err(cleanup) = ids.delete(&conversation_id).await {
                    warn!(error = %cleanup, "failed to delete skill conversation id");
                }
                Err(err)
            }
        }
    }

    async fn continue_dialog(&self, dc: &mut DialogContext<'_>) -> BotResult<DialogTurnResult> {
        let activity = dc.turn().activity();
        if activity.kind == ActivityType::EndOfConversation {
            debug!(skill = %self.options.skill.id, "skill returned through callback");
            return dc.end_dialog(activity.value.clone()).await;
        }
        self.forward(dc, (*activity).clone()).await
    }

    async fn end_dialog(
        &self,
        turn: &TurnContext,
        instance: &DialogInstance,
        reason: DialogReason,
    ) -> BotResult<()> {
        if !matches!(reason, DialogReason::CancelCalled | DialogReason::ReplaceCalled) {
            return Ok(());
        }
        let conversation_id = Self::conversation_id(Some(instance))?;
        info!(skill = %self.options.skill.id, ?reason, "cancelling skill");
        let reference = turn.conversation_reference();
        let eoc = Activity::end_of_conversation(EndOfConversationCode::UserCancelled)
            .apply_conversation_reference(&reference, true);
        let skill = &self.options.skill;
        self.options
            .client
            .post_activity(
                &self.options.bot_id,
                skill,
                &self.options.skill_host_endpoint,
                &conversation_id,
                eoc,
            )
            .await?;
        self.options.conversation_ids.delete(&conversation_id).await
    }
}
