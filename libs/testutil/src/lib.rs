//! Test helpers for Relay bots.
//!
//! Builders address activities to a fixed test channel so state keys and conversation
//! references line up across turns; [`TestFlow`] scripts a conversation against any
//! buffered turn function.

mod assertions;
mod flow;

use relay_core::{
    Activity, ActivityType, ChannelAccount, ClaimsIdentity, ConversationAccount,
    EndOfConversationCode,
};
use serde_json::Value;

pub use assertions::{
    assert_end_of_conversation, assert_texts, find_end_of_conversation, texts,
};
pub use flow::TestFlow;

pub const TEST_CHANNEL: &str = "test";
pub const TEST_SERVICE_URL: &str = "http://localhost:3978/test";
pub const TEST_USER: &str = "user-1";
pub const TEST_BOT: &str = "bot-1";

/// Message from the test user to the test bot in `conversation_id`.
pub fn user_message(conversation_id: &str, text: &str) -> Activity {
    addressed(Activity::message(text), conversation_id)
}

pub fn event(conversation_id: &str, name: &str, value: Option<Value>) -> Activity {
    addressed(Activity::event(name, value), conversation_id)
}

pub fn end_of_conversation(conversation_id: &str, code: EndOfConversationCode) -> Activity {
    addressed(Activity::end_of_conversation(code), conversation_id)
}

pub fn activity_of(kind: ActivityType, conversation_id: &str) -> Activity {
    addressed(Activity::new(kind), conversation_id)
}

fn addressed(mut activity: Activity, conversation_id: &str) -> Activity {
    activity.channel_id = TEST_CHANNEL.into();
    activity.service_url = TEST_SERVICE_URL.into();
    activity.conversation = ConversationAccount::new(conversation_id);
    activity.from = ChannelAccount::new(TEST_USER);
    activity.recipient = ChannelAccount::new(TEST_BOT);
    activity
}

/// Claims of a parent bot `caller` calling the skill `audience` (v2 token shape).
pub fn skill_claims(caller: &str, audience: &str) -> ClaimsIdentity {
    ClaimsIdentity::new()
        .with("ver", "2.0")
        .with("aud", audience)
        .with("azp", caller)
}

/// Claims of a channel (user-originated) request.
pub fn user_claims() -> ClaimsIdentity {
    ClaimsIdentity::new()
        .with("ver", "1.0")
        .with("aud", TEST_BOT)
        .with("appid", TEST_BOT)
}
