//! Per-turn facade over the inbound activity, the adapter and the outbound send chain.

use crate::activity::EMULATOR_CHANNEL;
use crate::{
    Activity, ActivityType, Adapter, BotResult, ClaimsIdentity, ConversationReference,
    ResourceResponse,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

/// Wraps every outbound send issued after it was registered on a turn.
///
/// Implementations must call [`SendNext::run`] to deliver; an interceptor that
/// returns without calling it drops the activities silently.
#[async_trait]
pub trait SendInterceptor: Send + Sync {
    async fn on_send(
        &self,
        turn: &TurnContext,
        activities: Vec<Activity>,
        next: SendNext<'_>,
    ) -> BotResult<Vec<ResourceResponse>>;
}

/// Continuation of the send-interceptor chain.
pub struct SendNext<'a> {
    turn: &'a TurnContext,
    chain: &'a [Arc<dyn SendInterceptor>],
}

impl SendNext<'_> {
    pub async fn run(self, activities: Vec<Activity>) -> BotResult<Vec<ResourceResponse>> {
        match self.chain.split_first() {
            Some((head, rest)) => {
                let next = SendNext {
                    turn: self.turn,
                    chain: rest,
                };
                head.on_send(self.turn, activities, next).await
            }
            None => self.turn.deliver(activities).await,
        }
    }
}

/// Context for a single turn.
pub struct TurnContext {
    activity: RwLock<Arc<Activity>>,
    adapter: Arc<dyn Adapter>,
    claims: ClaimsIdentity,
    skill_callback: bool,
    interceptors: Mutex<Vec<Arc<dyn SendInterceptor>>>,
    services: DashMap<String, Box<dyn Any + Send + Sync>>,
    responded: AtomicBool,
}

impl TurnContext {
    pub fn new(adapter: Arc<dyn Adapter>, activity: Activity) -> Self {
        Self {
            activity: RwLock::new(Arc::new(activity)),
            adapter,
            claims: ClaimsIdentity::default(),
            skill_callback: false,
            interceptors: Mutex::new(Vec::new()),
            services: DashMap::new(),
            responded: AtomicBool::new(false),
        }
    }

    pub fn with_claims(mut self, claims: ClaimsIdentity) -> Self {
        self.claims = claims;
        self
    }

    /// Marks the turn as a skill replying to this bot rather than a parent calling it.
    pub fn mark_skill_callback(mut self) -> Self {
        self.skill_callback = true;
        self
    }

    pub fn activity(&self) -> Arc<Activity> {
        self.activity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the inbound activity seen by downstream middleware and the bot.
    pub fn replace_activity(&self, activity: Activity) {
        *self.activity.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(activity);
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub fn claims(&self) -> &ClaimsIdentity {
        &self.claims
    }

    /// True when a parent bot is calling this bot as a skill.
    pub fn is_skill_call(&self) -> bool {
        !self.skill_callback && self.claims.is_skill_claim()
    }

    pub fn is_skill_callback(&self) -> bool {
        self.skill_callback
    }

    /// Whether a non-trace activity has been delivered during this turn.
    pub fn responded(&self) -> bool {
        self.responded.load(Ordering::SeqCst)
    }

    pub fn conversation_reference(&self) -> ConversationReference {
        self.activity().conversation_reference()
    }

    /// Registers an interceptor; the most recently registered one runs first.
    pub fn on_send_activities(&self, interceptor: Arc<dyn SendInterceptor>) -> &Self {
        self.interceptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(interceptor);
        self
    }

    pub async fn send_text(&self, text: impl Into<String>) -> BotResult<ResourceResponse> {
        self.send_activity(Activity::message(text)).await
    }

    /// Sends one activity. A send dropped by an interceptor yields an empty response id.
    pub async fn send_activity(&self, activity: Activity) -> BotResult<ResourceResponse> {
        let mut responses = self.send_activities(vec![activity]).await?;
        Ok(if responses.is_empty() {
            ResourceResponse::default()
        } else {
            responses.swap_remove(0)
        })
    }

    pub async fn send_activities(
        &self,
        activities: Vec<Activity>,
    ) -> BotResult<Vec<ResourceResponse>> {
        if activities.is_empty() {
            return Ok(Vec::new());
        }
        let reference = self.conversation_reference();
        let outbound = activities
            .into_iter()
            .map(|activity| {
                if activity.conversation.id.is_empty() {
                    activity.apply_conversation_reference(&reference, false)
                } else {
                    activity
                }
            })
            .collect();

        let chain: Vec<Arc<dyn SendInterceptor>> = self
            .interceptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .cloned()
            .collect();
        SendNext {
            turn: self,
            chain: &chain,
        }
        .run(outbound)
        .await
    }

    /// Sends a trace activity. Only the emulator channel receives traces; elsewhere it is logged.
    pub async fn send_trace_activity(
        &self,
        name: &str,
        value: Value,
        value_type: &str,
        label: &str,
    ) -> BotResult<Option<ResourceResponse>> {
        if self.activity().channel_id != EMULATOR_CHANNEL {
            debug!(
                trace = name,
                label,
                value = %value,
                "trace activity not delivered on this channel"
            );
            return Ok(None);
        }
        let trace = Activity::trace(name, value, value_type, label);
        self.send_activity(trace).await.map(Some)
    }

    pub async fn update_activity(&self, activity: Activity) -> BotResult<ResourceResponse> {
        let reference = self.conversation_reference();
        let activity = activity.apply_conversation_reference(&reference, false);
        self.adapter.update_activity(self, activity).await
    }

    pub async fn delete_activity(&self, activity_id: &str) -> BotResult<()> {
        crate::ensure_not_blank(activity_id, "activity id")?;
        let mut reference = self.conversation_reference();
        reference.activity_id = Some(activity_id.to_string());
        self.adapter.delete_activity(self, &reference).await
    }

    /// Stores a per-turn service under `key`, replacing any previous value.
    pub fn set_service<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.services.insert(key.into(), Box::new(value));
    }

    /// Runs `f` against the service stored under `key`; `None` when absent or of another type.
    pub fn with_service<T, R>(&self, key: &str, f: impl FnOnce(&mut T) -> R) -> Option<R>
    where
        T: Any + Send + Sync,
    {
        let mut entry = self.services.get_mut(key)?;
        let value = entry.value_mut().downcast_mut::<T>()?;
        Some(f(value))
    }

    pub fn has_service(&self, key: &str) -> bool {
        self.services.contains_key(key)
    }

    pub fn remove_service(&self, key: &str) {
        self.services.remove(key);
    }

    async fn deliver(&self, activities: Vec<Activity>) -> BotResult<Vec<ResourceResponse>> {
        if activities.is_empty() {
            return Ok(Vec::new());
        }
        let count = activities.len() as u64;
        let answers = activities.iter().any(|a| a.kind != ActivityType::Trace);
        let responses = self.adapter.send_activities(self, activities).await?;
        metrics::counter!("relay_outbound_activities_total").increment(count);
        if answers {
            self.responded.store(true, Ordering::SeqCst);
        }
        Ok(responses)
    }
}
