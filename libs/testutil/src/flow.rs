use std::future::Future;

use relay_core::{Activity, BotResult, ClaimsIdentity};

use crate::{assert_texts, user_message};

/// Scripted conversation against a buffered turn function.
///
/// The turn function receives the inbound activity and the caller claims and returns the
/// activities the bot sent. Every activity of the script is addressed to the same
/// conversation.
pub struct TestFlow<F> {
    turn: F,
    conversation_id: String,
    claims: ClaimsIdentity,
}

impl<F, Fut> TestFlow<F>
where
    F: Fn(Activity, ClaimsIdentity) -> Fut,
    Fut: Future<Output = BotResult<Vec<Activity>>>,
{
    pub fn new(turn: F) -> Self {
        Self {
            turn,
            conversation_id: "test-conversation".into(),
            claims: ClaimsIdentity::new(),
        }
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = conversation_id.into();
        self
    }

    pub fn with_claims(mut self, claims: ClaimsIdentity) -> Self {
        self.claims = claims;
        self
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Runs one turn with `activity`, addressed to the flow's conversation when it has none.
    pub async fn send_activity(&self, mut activity: Activity) -> BotResult<Vec<Activity>> {
        if activity.conversation.id.is_empty() {
            let template = user_message(&self.conversation_id, "");
            activity.channel_id = template.channel_id;
            activity.service_url = template.service_url;
            activity.conversation = template.conversation;
            activity.from = template.from;
            activity.recipient = template.recipient;
        }
        (self.turn)(activity, self.claims.clone()).await
    }

    pub async fn send(&self, text: &str) -> BotResult<Vec<Activity>> {
        self.send_activity(user_message(&self.conversation_id, text))
            .await
    }

    /// Sends `text` and asserts the message replies, in order.
    pub async fn test(&self, text: &str, expected: &[&str]) -> Vec<Activity> {
        let sent = match self.send(text).await {
            Ok(sent) => sent,
            Err(err) => panic!("turn `{text}` failed: {err}"),
        };
        assert_texts(&sent, expected);
        sent
    }
}
