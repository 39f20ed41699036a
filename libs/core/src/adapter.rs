use crate::{Activity, BotError, BotResult, ConversationReference, ResourceResponse, TurnContext};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Delivery capability a turn sends its activities through.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn send_activities(
        &self,
        turn: &TurnContext,
        activities: Vec<Activity>,
    ) -> BotResult<Vec<ResourceResponse>>;

    async fn update_activity(
        &self,
        turn: &TurnContext,
        activity: Activity,
    ) -> BotResult<ResourceResponse>;

    async fn delete_activity(
        &self,
        turn: &TurnContext,
        reference: &ConversationReference,
    ) -> BotResult<()>;
}

pub type SharedAdapter = Arc<dyn Adapter>;

/// Records outbound activities instead of delivering them, so a worker can hand the
/// whole reply set back to its caller as data.
#[derive(Default)]
pub struct BufferedAdapter {
    responses: Mutex<Vec<Activity>>,
}

impl BufferedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activities recorded so far, in send order.
    pub fn responses(&self) -> Vec<Activity> {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drains the recorded activities.
    pub fn take_responses(&self) -> Vec<Activity> {
        std::mem::take(&mut *self.responses.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Adapter for BufferedAdapter {
    async fn send_activities(
        &self,
        _turn: &TurnContext,
        activities: Vec<Activity>,
    ) -> BotResult<Vec<ResourceResponse>> {
        let responses = activities
            .iter()
            .map(|activity| {
                ResourceResponse::new(
                    activity
                        .id
                        .clone()
                        .unwrap_or_else(|| Uuid::new_v4().to_string()),
                )
            })
            .collect();
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(activities);
        Ok(responses)
    }

    async fn update_activity(
        &self,
        _turn: &TurnContext,
        _activity: Activity,
    ) -> BotResult<ResourceResponse> {
        Err(BotError::NotSupported("update_activity"))
    }

    async fn delete_activity(
        &self,
        _turn: &TurnContext,
        _reference: &ConversationReference,
    ) -> BotResult<()> {
        Err(BotError::NotSupported("delete_activity"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelAccount, ConversationAccount};

    fn turn(adapter: Arc<BufferedAdapter>) -> TurnContext {
        let inbound = Activity {
            channel_id: "test".into(),
            from: ChannelAccount::new("user"),
            recipient: ChannelAccount::new("bot"),
            conversation: ConversationAccount::new("conv"),
            ..Activity::message("hi")
        };
        TurnContext::new(adapter, inbound)
    }

    #[tokio::test]
    async fn records_every_send_in_order_unmodified() {
        let adapter = Arc::new(BufferedAdapter::new());
        let turn = turn(adapter.clone());
        let outbound: Vec<Activity> = (0..5)
            .map(|n| Activity::message(format!("reply {n}")))
            .collect();

        let mut expected = Vec::new();
        for activity in &outbound {
            let addressed = activity
                .clone()
                .apply_conversation_reference(&turn.conversation_reference(), false);
            expected.push(addressed);
            turn.send_activity(activity.clone()).await.unwrap();
        }

        assert_eq!(adapter.len(), 5);
        assert_eq!(adapter.responses(), expected);
        assert_eq!(adapter.take_responses().len(), 5);
        assert!(adapter.is_empty());
    }

    #[tokio::test]
    async fn update_and_delete_are_not_supported() {
        let adapter = Arc::new(BufferedAdapter::new());
        let turn = turn(adapter.clone());
        let update = turn.update_activity(Activity::message("edit")).await;
        assert!(matches!(update, Err(BotError::NotSupported(_))));
        let delete = turn.delete_activity("act-1").await;
        assert!(matches!(delete, Err(BotError::NotSupported(_))));
        assert!(adapter.is_empty());
    }
}
