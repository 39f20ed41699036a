//! NATS request/reply surface of the runner: turn requests, proactive continuations and
//! skill callbacks, each answered with JSON on the request's reply subject.

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Message};
use async_trait::async_trait;
use futures::StreamExt;
use relay_core::{
    Activity, Bot, BotError, BotResult, ClaimsIdentity, TURN_WORKER_QUEUE, TurnContext,
};
use relay_security::ClaimsVerifier;
use relay_skills::SkillHandler;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, error, info, warn};

use crate::config::RunnerConfig;
use crate::host::{BotHost, BufferedTurn};

/// A turn to run, with the caller's verified claims or a bearer token to verify.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub activity: Activity,
    #[serde(default)]
    pub claims: ClaimsIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    pub status: u16,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TurnResponse {
    /// A turn the error boundary recovered still answers 200: its activities already tell
    /// the caller what happened.
    pub fn from_turn(turn: BufferedTurn) -> Self {
        Self {
            status: 200,
            error: turn.outcome.error().map(ToString::to_string),
            activities: turn.activities,
        }
    }

    pub fn rejected(err: &BotError) -> Self {
        Self {
            status: err.status_code(),
            activities: Vec::new(),
            error: Some(err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Activities to deliver into a conversation the worker has seen before.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProactiveRequest {
    pub conversation_id: String,
    pub activities: Vec<Activity>,
}

/// An activity a skill posts back to this (parent) bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillCallbackRequest {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    pub activity: Activity,
    #[serde(default)]
    pub claims: ClaimsIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillCallbackResponse {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct SendActivities(Vec<Activity>);

#[async_trait]
impl Bot for SendActivities {
    async fn on_turn(&self, turn: &TurnContext) -> BotResult<()> {
        turn.send_activities(self.0.clone()).await?;
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(payload: &[u8], what: &str) -> BotResult<T> {
    serde_json::from_slice(payload)
        .map_err(|err| BotError::validation(format!("malformed {what}: {err}")))
}

fn bearer(raw: &str) -> &str {
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .unwrap_or(raw)
        .trim()
}

/// Decodes requests, resolves caller claims and drives the [`BotHost`].
pub struct TurnWorker {
    host: Arc<BotHost>,
    verifier: Option<Arc<dyn ClaimsVerifier>>,
    skills: Option<Arc<SkillHandler>>,
}

impl TurnWorker {
    pub fn new(host: Arc<BotHost>) -> Self {
        Self {
            host,
            verifier: None,
            skills: None,
        }
    }

    /// Requires every request to carry a bearer token checked by `verifier`; the token's
    /// claims replace any claims in the request.
    pub fn with_verifier(mut self, verifier: Arc<dyn ClaimsVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_skill_handler(mut self, handler: Arc<SkillHandler>) -> Self {
        self.skills = Some(handler);
        self
    }

    pub fn host(&self) -> &Arc<BotHost> {
        &self.host
    }

    fn caller_claims(
        &self,
        claims: ClaimsIdentity,
        authorization: Option<&str>,
    ) -> BotResult<ClaimsIdentity> {
        match (&self.verifier, authorization) {
            (Some(verifier), Some(token)) => verifier.verify(bearer(token)),
            (Some(_), None) => Err(BotError::unauthorized("authorization header missing")),
            (None, Some(_)) => Err(BotError::unauthorized(
                "bearer tokens are not accepted without a configured verifier",
            )),
            (None, None) => Ok(claims),
        }
    }

    pub async fn handle_turn(&self, payload: &[u8]) -> TurnResponse {
        let result = async {
            let request: TurnRequest = decode(payload, "turn request")?;
            let claims = self.caller_claims(request.claims, request.authorization.as_deref())?;
            self.host.process_buffered(request.activity, claims).await
        }
        .await;
        match result {
            Ok(turn) => TurnResponse::from_turn(turn),
            Err(err) => {
                warn!(error = %err, "turn request rejected");
                TurnResponse::rejected(&err)
            }
        }
    }

    pub async fn handle_proactive(&self, payload: &[u8]) -> TurnResponse {
        let result = async {
            let request: ProactiveRequest = decode(payload, "proactive request")?;
            self.host
                .continue_buffered(&request.conversation_id, &SendActivities(request.activities))
                .await
        }
        .await;
        match result {
            Ok(turn) => TurnResponse::from_turn(turn),
            Err(err) => {
                warn!(error = %err, "proactive request rejected");
                TurnResponse::rejected(&err)
            }
        }
    }

    pub async fn handle_skill_callback(&self, payload: &[u8]) -> SkillCallbackResponse {
        let result = async {
            let handler = self
                .skills
                .as_ref()
                .ok_or(BotError::NotSupported("skill callbacks"))?;
            let request: SkillCallbackRequest = decode(payload, "skill callback")?;
            let claims = self.caller_claims(request.claims, request.authorization.as_deref())?;
            match request.reply_to_id.as_deref() {
                Some(reply_to) => {
                    handler
                        .on_reply_to_activity(
                            &claims,
                            &request.conversation_id,
                            reply_to,
                            request.activity,
                        )
                        .await
                }
                None => {
                    handler
                        .on_send_to_conversation(
                            &claims,
                            &request.conversation_id,
                            request.activity,
                        )
                        .await
                }
            }
        }
        .await;
        match result {
            Ok(resource) => SkillCallbackResponse {
                status: 200,
                id: Some(resource.id),
                error: None,
            },
            Err(err) => {
                warn!(error = %err, "skill callback rejected");
                SkillCallbackResponse {
                    status: err.status_code(),
                    id: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

async fn reply<T: Serialize>(nats: &Client, msg: &Message, body: &T) {
    let Some(reply) = msg.reply.clone() else {
        debug!(subject = %msg.subject, "request without reply subject; dropping response");
        return;
    };
    match serde_json::to_vec(body) {
        Ok(bytes) => {
            if let Err(err) = nats.publish(reply, bytes.into()).await {
                error!(error = %err, "failed to publish response");
            }
        }
        Err(err) => error!(error = %err, "failed to encode response"),
    }
}

#[derive(Clone, Copy)]
enum Kind {
    Turn,
    Proactive,
    SkillCallback,
}

async fn answer(worker: Arc<TurnWorker>, nats: Client, msg: Message, kind: Kind) {
    match kind {
        Kind::Turn => {
            let response = worker.handle_turn(&msg.payload).await;
            reply(&nats, &msg, &response).await;
        }
        Kind::Proactive => {
            let response = worker.handle_proactive(&msg.payload).await;
            reply(&nats, &msg, &response).await;
        }
        Kind::SkillCallback => {
            let response = worker.handle_skill_callback(&msg.payload).await;
            reply(&nats, &msg, &response).await;
        }
    }
}

/// Serves the configured subjects in the shared worker queue group until the
/// subscriptions close. Each request runs on its own task.
pub async fn run(worker: Arc<TurnWorker>, nats: Client, cfg: &RunnerConfig) -> Result<()> {
    let queue = TURN_WORKER_QUEUE.to_string();
    let mut turns = nats
        .queue_subscribe(cfg.turn_subject.clone(), queue.clone())
        .await?;
    let mut proactive = nats
        .queue_subscribe(cfg.proactive_subject.clone(), queue.clone())
        .await?;
    let mut callbacks = nats
        .queue_subscribe(cfg.skill_callback_subject.clone(), queue)
        .await?;
    info!(
        turns = %cfg.turn_subject,
        proactive = %cfg.proactive_subject,
        skills = %cfg.skill_callback_subject,
        "runner subscribed"
    );

    loop {
        let (msg, kind) = tokio::select! {
            Some(msg) = turns.next() => (msg, Kind::Turn),
            Some(msg) = proactive.next() => (msg, Kind::Proactive),
            Some(msg) = callbacks.next() => (msg, Kind::SkillCallback),
            else => break,
        };
        tokio::spawn(answer(worker.clone(), nats.clone(), msg, kind));
    }
    warn!("subscriptions closed; runner stopping");
    Ok(())
}
