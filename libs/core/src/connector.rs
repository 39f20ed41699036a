//! Direct delivery of activities to a channel's connector service.

use crate::{
    Activity, ActivityType, Adapter, BotError, BotResult, ConversationReference, ResourceResponse,
    TurnContext,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Supplies bearer tokens for outbound connector calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self, service_url: &str) -> anyhow::Result<Option<String>>;
}

/// Token source for channels that accept unauthenticated calls (local emulator, tests).
pub struct NoToken;

#[async_trait]
impl TokenSource for NoToken {
    async fn token(&self, _service_url: &str) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self, _service_url: &str) -> anyhow::Result<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}

/// Connector REST surface used by [`ConnectorAdapter`].
#[async_trait]
pub trait ConnectorClient: Send + Sync {
    async fn send_to_conversation(&self, activity: &Activity) -> anyhow::Result<ResourceResponse>;
    async fn reply_to_activity(
        &self,
        activity: &Activity,
        reply_to_id: &str,
    ) -> anyhow::Result<ResourceResponse>;
    async fn update_activity(&self, activity: &Activity) -> anyhow::Result<ResourceResponse>;
    async fn delete_activity(
        &self,
        service_url: &str,
        conversation_id: &str,
        activity_id: &str,
    ) -> anyhow::Result<()>;
}

/// `reqwest` implementation of the connector REST API with bounded retries.
pub struct HttpConnectorClient {
    client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    max_retries: u8,
}

impl HttpConnectorClient {
    pub fn new(tokens: Arc<dyn TokenSource>, max_retries: u8) -> Self {
        Self {
            client: reqwest::Client::new(),
            tokens,
            max_retries,
        }
    }

    fn activities_url(service_url: &str, conversation_id: &str) -> String {
        format!(
            "{}/v3/conversations/{}/activities",
            service_url.trim_end_matches('/'),
            urlencoding::encode(conversation_id)
        )
    }

    async fn execute(
        &self,
        method: reqwest::Method,
        url: &str,
        service_url: &str,
        body: Option<&Activity>,
    ) -> anyhow::Result<Option<ResourceResponse>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.execute_once(method.clone(), url, service_url, body).await {
                Ok(res) => return Ok(res),
                Err(err) => {
                    if attempt > self.max_retries {
                        return Err(err);
                    }
                    warn!(attempt, %url, error = %err, "retrying connector request");
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
            }
        }
    }

    async fn execute_once(
        &self,
        method: reqwest::Method,
        url: &str,
        service_url: &str,
        body: Option<&Activity>,
    ) -> anyhow::Result<Option<ResourceResponse>> {
        let mut request = self.client.request(method, url);
        if let Some(token) = self.tokens.token(service_url).await? {
            request = request.bearer_auth(token);
        }
        if let Some(activity) = body {
            request = request.json(activity);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("HTTP {status} from connector: {body}");
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(serde_json::from_slice(&bytes).ok())
    }
}

#[async_trait]
impl ConnectorClient for HttpConnectorClient {
    async fn send_to_conversation(&self, activity: &Activity) -> anyhow::Result<ResourceResponse> {
        let url = Self::activities_url(&activity.service_url, &activity.conversation.id);
        let response = self
            .execute(reqwest::Method::POST, &url, &activity.service_url, Some(activity))
            .await?;
        Ok(response.unwrap_or_default())
    }

    async fn reply_to_activity(
        &self,
        activity: &Activity,
        reply_to_id: &str,
    ) -> anyhow::Result<ResourceResponse> {
        let url = format!(
            "{}/{}",
            Self::activities_url(&activity.service_url, &activity.conversation.id),
            urlencoding::encode(reply_to_id)
        );
        let response = self
            .execute(reqwest::Method::POST, &url, &activity.service_url, Some(activity))
            .await?;
        Ok(response.unwrap_or_default())
    }

    async fn update_activity(&self, activity: &Activity) -> anyhow::Result<ResourceResponse> {
        let Some(id) = activity.id.as_deref() else {
            anyhow::bail!("activity id required for update");
        };
        let url = format!(
            "{}/{}",
            Self::activities_url(&activity.service_url, &activity.conversation.id),
            urlencoding::encode(id)
        );
        let response = self
            .execute(reqwest::Method::PUT, &url, &activity.service_url, Some(activity))
            .await?;
        Ok(response.unwrap_or_else(|| ResourceResponse::new(id)))
    }

    async fn delete_activity(
        &self,
        service_url: &str,
        conversation_id: &str,
        activity_id: &str,
    ) -> anyhow::Result<()> {
        let url = format!(
            "{}/{}",
            Self::activities_url(service_url, conversation_id),
            urlencoding::encode(activity_id)
        );
        self.execute(reqwest::Method::DELETE, &url, service_url, None)
            .await?;
        Ok(())
    }
}

/// Adapter that delivers each activity immediately through a [`ConnectorClient`].
pub struct ConnectorAdapter {
    client: Arc<dyn ConnectorClient>,
}

impl ConnectorAdapter {
    pub fn new(client: Arc<dyn ConnectorClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Adapter for ConnectorAdapter {
    async fn send_activities(
        &self,
        _turn: &TurnContext,
        activities: Vec<Activity>,
    ) -> BotResult<Vec<ResourceResponse>> {
        let mut responses = Vec::with_capacity(activities.len());
        for activity in activities {
            if activity.kind == ActivityType::InvokeResponse {
                debug!("invoke responses are answered by the transport, not the connector");
                responses.push(ResourceResponse::default());
                continue;
            }
            let sent = match activity.reply_to_id.as_deref() {
                Some(reply_to) => self.client.reply_to_activity(&activity, reply_to).await,
                None => self.client.send_to_conversation(&activity).await,
            };
            responses.push(sent.map_err(BotError::Transport)?);
        }
        Ok(responses)
    }

    async fn update_activity(
        &self,
        _turn: &TurnContext,
        activity: Activity,
    ) -> BotResult<ResourceResponse> {
        self.client
            .update_activity(&activity)
            .await
            .map_err(BotError::Transport)
    }

    async fn delete_activity(
        &self,
        _turn: &TurnContext,
        reference: &ConversationReference,
    ) -> BotResult<()> {
        let activity_id = reference
            .activity_id
            .as_deref()
            .ok_or_else(|| BotError::validation("activity id empty"))?;
        self.client
            .delete_activity(&reference.service_url, &reference.conversation.id, activity_id)
            .await
            .map_err(BotError::Transport)
    }
}
