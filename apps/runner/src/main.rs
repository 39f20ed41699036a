use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::{ConnectorAdapter, HttpConnectorClient, NoToken, StaticToken, TokenSource};
use relay_dialogs::AnswerService;
use relay_runner::{
    Args, BotHost, RunnerConfig, SkillWiring, StaticAnswerService, TurnWorker, root_bot,
    root_dialogs, worker,
};
use relay_security::{AllowedCallersClaimsValidator, JwtClaimsVerifier};
use relay_skills::{
    HttpSkillClient, SkillConversationIdFactory, SkillHandler, SkillsConfiguration,
};
use relay_state::{BotState, storage_from_env};
use relay_telemetry::TranscriptLoggerMiddleware;
use tracing::info;

fn token_source(token: Option<String>) -> Arc<dyn TokenSource> {
    match token {
        Some(token) => Arc::new(StaticToken(token)),
        None => Arc::new(NoToken),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    relay_telemetry::install("relay-runner")?;
    let cfg = RunnerConfig::from_env().with_args(Args::parse());

    let storage = storage_from_env().await?;
    let conversation_state = BotState::conversation(storage.clone());
    let user_state = BotState::user(storage.clone());

    let answers: Arc<dyn AnswerService> = match &cfg.answers_file {
        Some(path) => Arc::new(StaticAnswerService::from_file(path)?),
        None => Arc::new(StaticAnswerService::default()),
    };
    let skills = cfg
        .skills_config
        .as_ref()
        .map(SkillsConfiguration::from_file)
        .transpose()?;
    let conversation_ids = SkillConversationIdFactory::new(storage.clone());
    let wiring = skills.clone().map(|config| SkillWiring {
        bot_id: cfg.bot_id.clone(),
        config,
        client: Arc::new(HttpSkillClient::new(
            token_source(cfg.skill_token.clone()),
            cfg.max_retries,
        )),
        conversation_ids: conversation_ids.clone(),
        expect_replies: true,
    });
    let bot = root_bot(root_dialogs(answers, wiring.as_ref()), &conversation_state);

    let connector = ConnectorAdapter::new(Arc::new(HttpConnectorClient::new(
        token_source(cfg.connector_token.clone()),
        cfg.max_retries,
    )));
    let host = Arc::new(
        BotHost::new(cfg.bot_id.clone(), bot, conversation_state)
            .with_user_state(user_state)
            .with_middleware(TranscriptLoggerMiddleware::default())
            .with_validator(Arc::new(AllowedCallersClaimsValidator::new(
                cfg.allowed_callers.clone(),
            )))
            .with_channel_adapter(Arc::new(connector))
            .clear_state_on_error(cfg.clear_state_on_error),
    );

    let mut turn_worker = TurnWorker::new(host.clone());
    if env::var("JWT_SECRET").is_ok() || env::var("JWT_PUBLIC_KEY").is_ok() {
        turn_worker = turn_worker.with_verifier(Arc::new(JwtClaimsVerifier::from_env()?));
        info!("bearer tokens required on requests");
    }
    if let Some(config) = &skills {
        let handler = SkillHandler::new(
            conversation_ids,
            Arc::new(config.claims_validator()),
            host.clone(),
        );
        turn_worker = turn_worker.with_skill_handler(Arc::new(handler));
        info!(skills = config.skills.len(), "skill callbacks enabled");
    }

    let nats = async_nats::connect(&cfg.nats_url)
        .await
        .with_context(|| format!("connecting to {}", cfg.nats_url))?;
    info!(bot = %cfg.bot_id, nats = %cfg.nats_url, "relay runner started");
    worker::run(Arc::new(turn_worker), nats, &cfg).await
}
