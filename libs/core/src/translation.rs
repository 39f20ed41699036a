//! Translation of inbound and outbound message text through an external translator.

use crate::{
    Activity, BotError, BotResult, Middleware, Next, ResourceResponse, SendInterceptor, SendNext,
    TurnContext,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Language detection and translation collaborator.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn detect(&self, text: &str) -> anyhow::Result<String>;
    async fn translate(&self, text: &str, from: &str, to: &str) -> anyhow::Result<String>;
}

/// Translates inbound messages into the bot's language and replies back into the user's.
pub struct TranslationMiddleware {
    translator: Arc<dyn Translator>,
    bot_language: String,
}

impl TranslationMiddleware {
    pub fn new(translator: Arc<dyn Translator>, bot_language: impl Into<String>) -> Self {
        Self {
            translator,
            bot_language: bot_language.into(),
        }
    }
}

#[async_trait]
impl Middleware for TranslationMiddleware {
    async fn on_turn(&self, turn: &TurnContext, next: Next<'_>) -> BotResult<()> {
        let activity = turn.activity();
        let Some(text) = activity.text().filter(|_| activity.is_message()) else {
            return next.run().await;
        };

        let user_language = self
            .translator
            .detect(text)
            .await
            .map_err(BotError::Transport)?;
        if user_language.eq_ignore_ascii_case(&self.bot_language) {
            return next.run().await;
        }

        let translated = self
            .translator
            .translate(text, &user_language, &self.bot_language)
            .await
            .map_err(BotError::Transport)?;
        debug!(from = %user_language, to = %self.bot_language, "translated inbound message");

        let mut inbound = (*activity).clone();
        inbound.text = Some(translated);
        inbound.locale = Some(user_language.clone());
        turn.replace_activity(inbound);
        turn.on_send_activities(Arc::new(TranslateReplies {
            translator: self.translator.clone(),
            from: self.bot_language.clone(),
            to: user_language,
        }));
        next.run().await
    }
}

struct TranslateReplies {
    translator: Arc<dyn Translator>,
    from: String,
    to: String,
}

#[async_trait]
impl SendInterceptor for TranslateReplies {
    async fn on_send(
        &self,
        _turn: &TurnContext,
        mut activities: Vec<Activity>,
        next: SendNext<'_>,
    ) -> BotResult<Vec<ResourceResponse>> {
        for activity in activities.iter_mut().filter(|a| a.is_message()) {
            let Some(text) = activity.text.as_deref() else {
                continue;
            };
            let translated = self
                .translator
                .translate(text, &self.from, &self.to)
                .await
                .map_err(BotError::Transport)?;
            activity.text = Some(translated);
        }
        next.run(activities).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Bot, BufferedAdapter, MiddlewareSet};

    /// Treats text starting with `fr:` as French and translates by swapping the prefix.
    struct PrefixTranslator;

    #[async_trait]
    impl Translator for PrefixTranslator {
        async fn detect(&self, text: &str) -> anyhow::Result<String> {
            Ok(if text.starts_with("fr:") { "fr" } else { "en" }.to_string())
        }

        async fn translate(&self, text: &str, from: &str, to: &str) -> anyhow::Result<String> {
            let body = text.strip_prefix(&format!("{from}:")).unwrap_or(text);
            Ok(if to == "en" {
                body.to_string()
            } else {
                format!("{to}:{body}")
            })
        }
    }

    struct Echo;

    #[async_trait]
    impl Bot for Echo {
        async fn on_turn(&self, turn: &TurnContext) -> BotResult<()> {
            let text = turn.activity().text.clone().unwrap_or_default();
            turn.send_text(format!("you said {text}")).await?;
            Ok(())
        }
    }

    async fn run(text: &str) -> Vec<String> {
        let adapter = Arc::new(BufferedAdapter::new());
        let mut activity = Activity::message(text);
        activity.conversation.id = "conv".into();
        let turn = TurnContext::new(adapter.clone(), activity);
        let set = MiddlewareSet::new()
            .with(TranslationMiddleware::new(Arc::new(PrefixTranslator), "en"));
        set.run(&turn, &Echo).await.unwrap();
        adapter
            .responses()
            .into_iter()
            .filter_map(|a| a.text)
            .collect()
    }

    #[tokio::test]
    async fn foreign_messages_round_trip_through_translator() {
        assert_eq!(run("fr:bonjour").await, vec!["fr:you said bonjour"]);
    }

    #[tokio::test]
    async fn native_messages_pass_through() {
        assert_eq!(run("hello").await, vec!["you said hello"]);
    }
}
