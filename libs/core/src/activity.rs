use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Channel id of the Bot Framework Emulator; the only channel that receives trace activities.
pub const EMULATOR_CHANNEL: &str = "emulator";
/// Event name carried by activities synthesised for proactive continuation turns.
pub const CONTINUE_CONVERSATION_EVENT: &str = "ContinueConversation";

/// Kind of an [`Activity`]. Unknown kinds survive a decode/encode cycle as [`ActivityType::Other`].
///
/// ```
/// use relay_core::ActivityType;
///
/// assert_eq!(ActivityType::from("endOfConversation".to_string()), ActivityType::EndOfConversation);
/// assert_eq!(ActivityType::from("handoff".to_string()).as_str(), "handoff");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActivityType {
    #[default]
    Message,
    Event,
    EndOfConversation,
    Trace,
    Invoke,
    InvokeResponse,
    ConversationUpdate,
    Typing,
    Other(String),
}

impl ActivityType {
    /// Returns the wire identifier of the activity type.
    pub fn as_str(&self) -> &str {
        match self {
            ActivityType::Message => "message",
            ActivityType::Event => "event",
            ActivityType::EndOfConversation => "endOfConversation",
            ActivityType::Trace => "trace",
            ActivityType::Invoke => "invoke",
            ActivityType::InvokeResponse => "invokeResponse",
            ActivityType::ConversationUpdate => "conversationUpdate",
            ActivityType::Typing => "typing",
            ActivityType::Other(other) => other.as_str(),
        }
    }
}

impl From<String> for ActivityType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "message" => ActivityType::Message,
            "event" => ActivityType::Event,
            "endOfConversation" => ActivityType::EndOfConversation,
            "trace" => ActivityType::Trace,
            "invoke" => ActivityType::Invoke,
            "invokeResponse" => ActivityType::InvokeResponse,
            "conversationUpdate" => ActivityType::ConversationUpdate,
            "typing" => ActivityType::Typing,
            _ => ActivityType::Other(value),
        }
    }
}

impl From<ActivityType> for String {
    fn from(value: ActivityType) -> Self {
        match value {
            ActivityType::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason carried by an `endOfConversation` activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndOfConversationCode {
    CompletedSuccessfully,
    UserCancelled,
    BotTimedOut,
    BotIssuedInvalidMessage,
    ChannelFailed,
    SkillError,
    RootSkillError,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Whether replies travel back over the channel (`normal`) or in the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryMode {
    #[default]
    Normal,
    ExpectReplies,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputHint {
    AcceptingInput,
    IgnoringInput,
    ExpectingInput,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAccount {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl ChannelAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAccount {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_group: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl ConversationAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Durable handle for addressing a conversation outside of the turn that observed it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(default)]
    pub user: ChannelAccount,
    #[serde(default)]
    pub bot: ChannelAccount,
    #[serde(default)]
    pub conversation: ConversationAccount,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub service_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

impl ConversationReference {
    /// Builds the event activity that drives a proactive continuation turn.
    pub fn continuation_activity(&self) -> Activity {
        Activity::event(CONTINUE_CONVERSATION_EVENT, None).apply_conversation_reference(self, true)
    }
}

/// Identifier returned for a delivered activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceResponse {
    #[serde(default)]
    pub id: String,
}

impl ResourceResponse {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Body of an expect-replies response: every activity the callee produced during the turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedReplies {
    #[serde(default)]
    pub activities: Vec<Activity>,
}

/// Status and optional body answered to an `invoke` or a forwarded skill activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl InvokeResponse {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body as [`ExpectedReplies`]; `None` when absent or of another shape.
    pub fn expected_replies(&self) -> Option<ExpectedReplies> {
        self.body
            .as_ref()
            .and_then(|body| serde_json::from_value(body.clone()).ok())
    }
}

/// Unit of conversational exchange.
///
/// ```
/// use relay_core::{Activity, ActivityType, EndOfConversationCode};
///
/// let eoc = Activity::end_of_conversation(EndOfConversationCode::CompletedSuccessfully)
///     .with_value(serde_json::json!({"booked": true}));
/// assert_eq!(eoc.kind, ActivityType::EndOfConversation);
/// let wire = serde_json::to_value(&eoc).unwrap();
/// assert_eq!(wire["type"], "endOfConversation");
/// assert_eq!(wire["code"], "completedSuccessfully");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type", default)]
    pub kind: ActivityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>, // RFC3339
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub service_url: String,
    #[serde(default)]
    pub from: ChannelAccount,
    #[serde(default)]
    pub recipient: ChannelAccount,
    #[serde(default)]
    pub conversation: ConversationAccount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<EndOfConversationCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_mode: Option<DeliveryMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_hint: Option<InputHint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

impl Activity {
    pub fn new(kind: ActivityType) -> Self {
        Self {
            kind,
            timestamp: Some(now_rfc3339()),
            ..Self::default()
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new(ActivityType::Message)
        }
    }

    pub fn event(name: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            name: Some(name.into()),
            value,
            ..Self::new(ActivityType::Event)
        }
    }

    pub fn end_of_conversation(code: EndOfConversationCode) -> Self {
        Self {
            code: Some(code),
            ..Self::new(ActivityType::EndOfConversation)
        }
    }

    pub fn trace(
        name: impl Into<String>,
        value: Value,
        value_type: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            value: Some(value),
            value_type: Some(value_type.into()),
            label: Some(label.into()),
            ..Self::new(ActivityType::Trace)
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_input_hint(mut self, hint: InputHint) -> Self {
        self.input_hint = Some(hint);
        self
    }

    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = Some(mode);
        self
    }

    pub fn with_locale(mut self, locale: Option<String>) -> Self {
        self.locale = locale;
        self
    }

    pub fn is_message(&self) -> bool {
        self.kind == ActivityType::Message
    }

    /// Non-blank message text, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    pub fn expects_replies(&self) -> bool {
        self.delivery_mode == Some(DeliveryMode::ExpectReplies)
    }

    /// Reference to the conversation this (inbound) activity belongs to.
    pub fn conversation_reference(&self) -> ConversationReference {
        ConversationReference {
            activity_id: self.id.clone(),
            user: self.from.clone(),
            bot: self.recipient.clone(),
            conversation: self.conversation.clone(),
            channel_id: self.channel_id.clone(),
            service_url: self.service_url.clone(),
            locale: self.locale.clone(),
        }
    }

    /// Addresses the activity at `reference`.
    ///
    /// Incoming activities flow user → bot; outgoing ones bot → user and reply to the
    /// referenced activity unless a `reply_to_id` is already set.
    pub fn apply_conversation_reference(
        mut self,
        reference: &ConversationReference,
        is_incoming: bool,
    ) -> Self {
        self.channel_id = reference.channel_id.clone();
        self.service_url = reference.service_url.clone();
        self.conversation = reference.conversation.clone();
        if self.locale.is_none() {
            self.locale = reference.locale.clone();
        }
        if is_incoming {
            self.from = reference.user.clone();
            self.recipient = reference.bot.clone();
            if reference.activity_id.is_some() {
                self.id = reference.activity_id.clone();
            }
        } else {
            self.from = reference.bot.clone();
            self.recipient = reference.user.clone();
            if self.reply_to_id.is_none() {
                self.reply_to_id = reference.activity_id.clone();
            }
        }
        self
    }
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}
