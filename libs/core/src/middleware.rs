use crate::{BotResult, TurnContext};
use async_trait::async_trait;
use std::sync::Arc;

/// Turn handler at the end of the middleware chain.
#[async_trait]
pub trait Bot: Send + Sync {
    async fn on_turn(&self, turn: &TurnContext) -> BotResult<()>;
}

/// Cross-cutting step wrapped around the bot. Not calling `next.run()` short-circuits
/// the remaining middleware and the bot.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn on_turn(&self, turn: &TurnContext, next: Next<'_>) -> BotResult<()>;
}

/// Remainder of the middleware chain.
pub struct Next<'a> {
    turn: &'a TurnContext,
    rest: &'a [Arc<dyn Middleware>],
    bot: &'a dyn Bot,
}

impl Next<'_> {
    pub async fn run(self) -> BotResult<()> {
        match self.rest.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    turn: self.turn,
                    rest,
                    bot: self.bot,
                };
                head.on_turn(self.turn, next).await
            }
            None => self.bot.on_turn(self.turn).await,
        }
    }
}

/// Ordered middleware list, invoked in registration order.
#[derive(Clone, Default)]
pub struct MiddlewareSet {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    pub async fn run(&self, turn: &TurnContext, bot: &dyn Bot) -> BotResult<()> {
        Next {
            turn,
            rest: &self.middleware,
            bot,
        }
        .run()
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Activity, BufferedAdapter};
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Record(&'static str, Log);

    #[async_trait]
    impl Middleware for Record {
        async fn on_turn(&self, _turn: &TurnContext, next: Next<'_>) -> BotResult<()> {
            self.1.lock().unwrap().push(format!("{}:before", self.0));
            next.run().await?;
            self.1.lock().unwrap().push(format!("{}:after", self.0));
            Ok(())
        }
    }

    struct Reject(Log);

    #[async_trait]
    impl Middleware for Reject {
        async fn on_turn(&self, _turn: &TurnContext, _next: Next<'_>) -> BotResult<()> {
            self.0.lock().unwrap().push("reject".into());
            Ok(())
        }
    }

    struct Echo(Log);

    #[async_trait]
    impl Bot for Echo {
        async fn on_turn(&self, turn: &TurnContext) -> BotResult<()> {
            self.0.lock().unwrap().push("bot".into());
            turn.send_text("echo").await?;
            Ok(())
        }
    }

    fn turn() -> (Arc<BufferedAdapter>, TurnContext) {
        let adapter = Arc::new(BufferedAdapter::new());
        let mut activity = Activity::message("hi");
        activity.conversation.id = "conv".into();
        (adapter.clone(), TurnContext::new(adapter, activity))
    }

    #[tokio::test]
    async fn middleware_wraps_bot_in_registration_order() {
        let log: Log = Arc::default();
        let set = MiddlewareSet::new()
            .with(Record("a", log.clone()))
            .with(Record("b", log.clone()));
        let (adapter, turn) = turn();

        set.run(&turn, &Echo(log.clone())).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:before", "b:before", "bot", "b:after", "a:after"]
        );
        assert_eq!(adapter.len(), 1);
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let log: Log = Arc::default();
        let set = MiddlewareSet::new()
            .with(Reject(log.clone()))
            .with(Record("late", log.clone()));
        let (adapter, turn) = turn();

        set.run(&turn, &Echo(log.clone())).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["reject"]);
        assert!(adapter.is_empty());
    }
}
