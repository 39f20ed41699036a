use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use relay_core::{Activity, BotError, ChannelAccount, InvokeResponse, TokenSource};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::SkillDescriptor;

#[derive(Debug, Error)]
pub enum SkillClientError {
    #[error("failed to serialize skill activity: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to deserialize skill response: {0}")]
    Deserialize(#[source] serde_json::Error),
    #[error("could not obtain a token for the skill call: {0}")]
    Token(#[source] anyhow::Error),
    #[error("HTTP request to skill failed: {0}")]
    Http(#[source] anyhow::Error),
}

impl From<SkillClientError> for BotError {
    fn from(err: SkillClientError) -> Self {
        BotError::Transport(anyhow::Error::new(err))
    }
}

/// Posts activities from a root bot to one of its skills.
#[async_trait]
pub trait SkillClient: Send + Sync {
    async fn post_activity(
        &self,
        from_bot_id: &str,
        skill: &SkillDescriptor,
        callback_url: &str,
        conversation_id: &str,
        activity: Activity,
    ) -> Result<InvokeResponse, SkillClientError>;
}

/// Re-addresses `activity` for the skill: the skill sees the skill conversation id and
/// calls back on `callback_url`.
pub fn skill_bound_activity(
    from_bot_id: &str,
    skill: &SkillDescriptor,
    callback_url: &str,
    conversation_id: &str,
    mut activity: Activity,
) -> Activity {
    activity.conversation.id = conversation_id.to_string();
    activity.service_url = callback_url.to_string();
    if activity.recipient.id.is_empty() || activity.recipient.id == from_bot_id {
        activity.recipient = ChannelAccount {
            id: skill.app_id.clone(),
            role: Some("skill".into()),
            ..ChannelAccount::default()
        };
    }
    activity
}

/// `reqwest` skill client with bounded retries on transport failures and 5xx answers.
pub struct HttpSkillClient {
    client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    max_retries: u8,
}

impl HttpSkillClient {
    pub fn new(tokens: Arc<dyn TokenSource>, max_retries: u8) -> Self {
        Self {
            client: reqwest::Client::new(),
            tokens,
            max_retries,
        }
    }

    async fn post_once(
        &self,
        skill: &SkillDescriptor,
        activity: &Activity,
    ) -> Result<InvokeResponse, SkillClientError> {
        let body = serde_json::to_vec(activity).map_err(SkillClientError::Serialize)?;
        let mut request = self
            .client
            .post(&skill.skill_endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(token) = self
            .tokens
            .token(&skill.skill_endpoint)
            .await
            .map_err(SkillClientError::Token)?
        {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SkillClientError::Http(anyhow::Error::new(e)))?;
        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(SkillClientError::Http(anyhow::anyhow!(
                "HTTP {status} from skill `{}`: {body}",
                skill.id
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SkillClientError::Http(anyhow::Error::new(e)))?;
        let body = if bytes.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(&bytes).map_err(SkillClientError::Deserialize)?)
        };
        Ok(InvokeResponse::new(status.as_u16(), body))
    }
}

#[async_trait]
impl SkillClient for HttpSkillClient {
    async fn post_activity(
        &self,
        from_bot_id: &str,
        skill: &SkillDescriptor,
        callback_url: &str,
        conversation_id: &str,
        activity: Activity,
    ) -> Result<InvokeResponse, SkillClientError> {
        let activity =
            skill_bound_activity(from_bot_id, skill, callback_url, conversation_id, activity);
        debug!(
            from = from_bot_id,
            skill = %skill.id,
            kind = %activity.kind,
            "posting activity to skill"
        );
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.post_once(skill, &activity).await {
                Ok(res) => return Ok(res),
                Err(SkillClientError::Deserialize(err)) => {
                    return Err(SkillClientError::Deserialize(err));
                }
                Err(err) => {
                    if attempt > self.max_retries {
                        error!(attempt, skill = %skill.id, error = %err, "skill request failed");
                        return Err(err);
                    }
                    warn!(attempt, skill = %skill.id, error = %err, "retrying skill request");
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
            }
        }
    }
}

type ResponderFuture = BoxFuture<'static, Result<InvokeResponse, SkillClientError>>;
type Responder = Box<dyn Fn(Activity) -> ResponderFuture + Send + Sync>;

/// In-process skill client; hands every re-addressed activity to `responder`.
pub struct InMemorySkillClient {
    responder: Responder,
    posted: Mutex<Vec<Activity>>,
}

impl InMemorySkillClient {
    pub fn new<F, Fut>(responder: F) -> Self
    where
        F: Fn(Activity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<InvokeResponse, SkillClientError>> + Send + 'static,
    {
        Self {
            responder: Box::new(move |activity| Box::pin(responder(activity))),
            posted: Mutex::new(Vec::new()),
        }
    }

    /// Activities posted so far, as the skill received them.
    pub fn posted(&self) -> Vec<Activity> {
        self.posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SkillClient for InMemorySkillClient {
    async fn post_activity(
        &self,
        from_bot_id: &str,
        skill: &SkillDescriptor,
        callback_url: &str,
        conversation_id: &str,
        activity: Activity,
    ) -> Result<InvokeResponse, SkillClientError> {
        let activity =
            skill_bound_activity(from_bot_id, skill, callback_url, conversation_id, activity);
        self.posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(activity.clone());
        (self.responder)(activity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill() -> SkillDescriptor {
        SkillDescriptor {
            id: "travel".into(),
            app_id: "travel-app".into(),
            skill_endpoint: "http://skill/api/messages".into(),
        }
    }

    #[test]
    fn re_addresses_activity_for_the_skill() {
        let mut activity = Activity::message("hi");
        activity.conversation.id = "user-conversation".into();
        activity.recipient.id = "root-app".into();
        let bound = skill_bound_activity(
            "root-app",
            &skill(),
            "http://root/api/skills",
            "skill-conv-1",
            activity,
        );
        assert_eq!(bound.conversation.id, "skill-conv-1");
        assert_eq!(bound.service_url, "http://root/api/skills");
        assert_eq!(bound.recipient.id, "travel-app");
        assert_eq!(bound.recipient.role.as_deref(), Some("skill"));
    }

    #[tokio::test]
    async fn in_memory_client_records_and_answers() {
        let client = InMemorySkillClient::new(|activity: Activity| async move {
            Ok(InvokeResponse::new(200, activity.text.map(serde_json::Value::String)))
        });
        let response = client
            .post_activity("root-app", &skill(), "http://root", "c-1", Activity::message("ping"))
            .await
            .unwrap();
        assert_eq!(response.body, Some(serde_json::json!("ping")));
        assert_eq!(client.posted()[0].conversation.id, "c-1");
    }

    #[test]
    fn client_errors_map_to_transport() {
        let err: BotError = SkillClientError::Http(anyhow::anyhow!("down")).into();
        assert_eq!(err.status_code(), 502);
    }
}
