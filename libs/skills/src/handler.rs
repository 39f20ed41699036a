use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{
    Activity, ActivityType, BotError, BotResult, ClaimsIdentity, ConversationReference,
    ResourceResponse, ensure_not_blank,
};
use relay_security::ClaimsValidator;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::SkillConversationIdFactory;

/// Parent-bot side of a skill callback: where the handler sends what the skill produced.
#[async_trait]
pub trait SkillCallbackSink: Send + Sync {
    /// Runs a turn in the parent conversation with the skill's activity as the inbound one,
    /// so the parent's dialog stack can resume. The turn may be queued behind the turn
    /// that is still waiting on the skill; returning only means it was accepted.
    async fn continue_with_skill_activity(
        &self,
        reference: &ConversationReference,
        activity: Activity,
        claims: ClaimsIdentity,
    ) -> BotResult<()>;

    /// Delivers a skill's activity to the user of the parent conversation.
    async fn send_to_user(
        &self,
        reference: &ConversationReference,
        activity: Activity,
    ) -> BotResult<ResourceResponse>;
}

/// Receives activities a skill posts back to its parent bot.
pub struct SkillHandler {
    conversation_ids: SkillConversationIdFactory,
    validator: Arc<dyn ClaimsValidator>,
    sink: Arc<dyn SkillCallbackSink>,
}

impl SkillHandler {
    pub fn new(
        conversation_ids: SkillConversationIdFactory,
        validator: Arc<dyn ClaimsValidator>,
        sink: Arc<dyn SkillCallbackSink>,
    ) -> Self {
        Self {
            conversation_ids,
            validator,
            sink,
        }
    }

    pub async fn on_send_to_conversation(
        &self,
        claims: &ClaimsIdentity,
        conversation_id: &str,
        activity: Activity,
    ) -> BotResult<ResourceResponse> {
        self.process_activity(claims, conversation_id, None, activity)
            .await
    }

    pub async fn on_reply_to_activity(
        &self,
        claims: &ClaimsIdentity,
        conversation_id: &str,
        activity_id: &str,
        activity: Activity,
    ) -> BotResult<ResourceResponse> {
        ensure_not_blank(activity_id, "activity id")?;
        self.process_activity(claims, conversation_id, Some(activity_id), activity)
            .await
    }

    #[instrument(
        name = "relay.skills.callback",
        skip(self, claims, activity),
        fields(kind = %activity.kind)
    )]
    async fn process_activity(
        &self,
        claims: &ClaimsIdentity,
        conversation_id: &str,
        reply_to_id: Option<&str>,
        activity: Activity,
    ) -> BotResult<ResourceResponse> {
        if !claims.is_skill_claim() {
            warn!("skill callback without skill claims");
            return Err(BotError::unauthorized(
                "skill callbacks must carry skill claims",
            ));
        }
        self.validator.validate(claims).await?;
        ensure_not_blank(conversation_id, "skill conversation id")?;

        let Some(skill_conversation) = self.conversation_ids.get(conversation_id).await? else {
            return Err(BotError::validation(format!(
                "unknown skill conversation id `{conversation_id}`"
            )));
        };
        let reference = skill_conversation.conversation_reference;

        match activity.kind {
            ActivityType::EndOfConversation | ActivityType::Event => {
                if activity.kind == ActivityType::EndOfConversation {
                    self.conversation_ids.delete(conversation_id).await?;
                }
                debug!(skill = %skill_conversation.skill_id, "resuming parent conversation");
                let skill_from = activity.from.clone();
                let mut inbound = activity.apply_conversation_reference(&reference, true);
                inbound.from = skill_from;
                self.sink
                    .continue_with_skill_activity(&reference, inbound, claims.clone())
                    .await?;
                Ok(ResourceResponse::new(Uuid::new_v4().to_string()))
            }
            _ => {
                let mut outbound = activity;
                if let Some(id) = reply_to_id {
                    outbound.reply_to_id = Some(id.to_string());
                }
                let outbound = outbound.apply_conversation_reference(&reference, false);
                self.sink.send_to_user(&reference, outbound).await
            }
        }
    }
}
