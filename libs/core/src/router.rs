use crate::{ActivityType, Bot, BotResult, TurnContext};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Dispatch table from activity type (and event name) to a handler.
///
/// Event handlers registered by name win over the generic `event` handler.
#[derive(Clone, Default)]
pub struct ActivityRouter {
    by_type: HashMap<ActivityType, Arc<dyn Bot>>,
    by_event: HashMap<String, Arc<dyn Bot>>,
    fallback: Option<Arc<dyn Bot>>,
}

impl ActivityRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, kind: ActivityType, handler: Arc<dyn Bot>) -> Self {
        self.by_type.insert(kind, handler);
        self
    }

    pub fn on_event(mut self, name: impl Into<String>, handler: Arc<dyn Bot>) -> Self {
        self.by_event.insert(name.into(), handler);
        self
    }

    pub fn otherwise(mut self, handler: Arc<dyn Bot>) -> Self {
        self.fallback = Some(handler);
        self
    }

    fn route(&self, kind: &ActivityType, name: Option<&str>) -> Option<&Arc<dyn Bot>> {
        let named = match (kind, name) {
            (ActivityType::Event, Some(name)) => self.by_event.get(name),
            _ => None,
        };
        named
            .or_else(|| self.by_type.get(kind))
            .or(self.fallback.as_ref())
    }
}

#[async_trait]
impl Bot for ActivityRouter {
    async fn on_turn(&self, turn: &TurnContext) -> BotResult<()> {
        let activity = turn.activity();
        match self.route(&activity.kind, activity.name.as_deref()) {
            Some(handler) => handler.on_turn(turn).await,
            None => {
                debug!(activity_type = %activity.kind, "no handler registered; ignoring activity");
                Ok(())
            }
        }
    }
}
