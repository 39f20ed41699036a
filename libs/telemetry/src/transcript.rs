use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use relay_core::{
    Activity, BotResult, Middleware, Next, ResourceResponse, SendInterceptor, SendNext,
    TurnContext,
};
use tracing::{info, warn};

/// Direction of a transcript entry relative to the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptDirection {
    Inbound,
    Outbound,
}

/// Sink for the activities of a conversation.
#[async_trait]
pub trait TranscriptLogger: Send + Sync {
    async fn log_activity(
        &self,
        direction: TranscriptDirection,
        activity: &Activity,
    ) -> anyhow::Result<()>;
}

/// Writes each activity as a structured log line.
pub struct TracingTranscriptLogger;

#[async_trait]
impl TranscriptLogger for TracingTranscriptLogger {
    async fn log_activity(
        &self,
        direction: TranscriptDirection,
        activity: &Activity,
    ) -> anyhow::Result<()> {
        info!(
            target: "relay::transcript",
            ?direction,
            kind = %activity.kind,
            channel = %activity.channel_id,
            conversation = %activity.conversation.id,
            from = %activity.from.id,
            text = activity.text.as_deref().unwrap_or_default(),
            "activity"
        );
        Ok(())
    }
}

/// Keeps transcript entries in memory.
#[derive(Default)]
pub struct MemoryTranscriptStore {
    entries: Mutex<Vec<(TranscriptDirection, Activity)>>,
}

impl MemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(TranscriptDirection, Activity)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TranscriptLogger for MemoryTranscriptStore {
    async fn log_activity(
        &self,
        direction: TranscriptDirection,
        activity: &Activity,
    ) -> anyhow::Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((direction, activity.clone()));
        Ok(())
    }
}

/// Logs the inbound activity and every activity the turn sends.
///
/// Logging failures are reported and never fail the turn.
pub struct TranscriptLoggerMiddleware {
    logger: Arc<dyn TranscriptLogger>,
}

impl TranscriptLoggerMiddleware {
    pub fn new(logger: Arc<dyn TranscriptLogger>) -> Self {
        Self { logger }
    }
}

impl Default for TranscriptLoggerMiddleware {
    fn default() -> Self {
        Self::new(Arc::new(TracingTranscriptLogger))
    }
}

async fn log_quietly(
    logger: &dyn TranscriptLogger,
    direction: TranscriptDirection,
    activity: &Activity,
) {
    if let Err(err) = logger.log_activity(direction, activity).await {
        warn!(error = %err, ?direction, "transcript logging failed");
    }
}

#[async_trait]
impl Middleware for TranscriptLoggerMiddleware {
    async fn on_turn(&self, turn: &TurnContext, next: Next<'_>) -> BotResult<()> {
        log_quietly(
            self.logger.as_ref(),
            TranscriptDirection::Inbound,
            &turn.activity(),
        )
        .await;
        turn.on_send_activities(Arc::new(TranscriptOutbound {
            logger: self.logger.clone(),
        }));
        next.run().await
    }
}

struct TranscriptOutbound {
    logger: Arc<dyn TranscriptLogger>,
}

#[async_trait]
impl SendInterceptor for TranscriptOutbound {
    async fn on_send(
        &self,
        _turn: &TurnContext,
        activities: Vec<Activity>,
        next: SendNext<'_>,
    ) -> BotResult<Vec<ResourceResponse>> {
        for activity in &activities {
            log_quietly(self.logger.as_ref(), TranscriptDirection::Outbound, activity).await;
        }
        next.run(activities).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{Bot, BufferedAdapter, MiddlewareSet};

    struct Echo;

    #[async_trait]
    impl Bot for Echo {
        async fn on_turn(&self, turn: &TurnContext) -> BotResult<()> {
            let text = turn.activity().text.clone().unwrap_or_default();
            turn.send_text(format!("echo: {text}")).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn records_both_directions_in_order() {
        let store = Arc::new(MemoryTranscriptStore::new());
        let middleware = MiddlewareSet::new().with(TranscriptLoggerMiddleware::new(store.clone()));
        let adapter = Arc::new(BufferedAdapter::new());
        let mut inbound = Activity::message("hi");
        inbound.conversation.id = "c-1".into();
        let turn = TurnContext::new(adapter.clone(), inbound);

        middleware.run(&turn, &Echo).await.unwrap();

        let entries = store.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, TranscriptDirection::Inbound);
        assert_eq!(entries[0].1.text.as_deref(), Some("hi"));
        assert_eq!(entries[1].0, TranscriptDirection::Outbound);
        assert_eq!(entries[1].1.text.as_deref(), Some("echo: hi"));
        assert_eq!(entries[1].1.conversation.id, "c-1");
        assert_eq!(adapter.len(), 1);
    }
}
