use std::env;
use std::path::PathBuf;

use clap::Parser;
use relay_core::{proactive_subject, skill_callback_subject, turn_subject};

/// Command-line overrides; every flag falls back to the environment.
#[derive(Debug, Default, Parser)]
#[command(name = "relay-runner", about = "Runs Relay turns for one bot over NATS")]
pub struct Args {
    #[arg(long)]
    pub nats_url: Option<String>,
    #[arg(long)]
    pub bot_id: Option<String>,
    #[arg(long)]
    pub turn_subject: Option<String>,
    #[arg(long)]
    pub skills_config: Option<PathBuf>,
    #[arg(long)]
    pub answers: Option<PathBuf>,
    /// Comma-separated skill caller app ids; `*` admits every caller.
    #[arg(long)]
    pub allowed_callers: Option<String>,
    #[arg(long)]
    pub clear_state_on_error: Option<bool>,
    #[arg(long)]
    pub max_retries: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    pub nats_url: String,
    pub bot_id: String,
    pub turn_subject: String,
    pub proactive_subject: String,
    pub skill_callback_subject: String,
    pub skills_config: Option<PathBuf>,
    pub answers_file: Option<PathBuf>,
    pub allowed_callers: Vec<String>,
    pub clear_state_on_error: bool,
    pub max_retries: u8,
    /// Bearer token attached to outbound skill calls.
    pub skill_token: Option<String>,
    /// Bearer token attached to connector calls that deliver to the channel.
    pub connector_token: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::for_bot("relay-bot")
    }
}

impl RunnerConfig {
    pub fn for_bot(bot_id: impl Into<String>) -> Self {
        let bot_id = bot_id.into();
        Self {
            nats_url: "nats://127.0.0.1:4222".into(),
            turn_subject: turn_subject(&bot_id),
            proactive_subject: proactive_subject(&bot_id),
            skill_callback_subject: skill_callback_subject(&bot_id),
            bot_id,
            skills_config: None,
            answers_file: None,
            allowed_callers: Vec::new(),
            clear_state_on_error: false,
            max_retries: 2,
            skill_token: None,
            connector_token: None,
        }
    }

    /// Reads `NATS_URL`, `RELAY_BOT_ID`, `RELAY_TURN_SUBJECT`, `RELAY_SKILLS_CONFIG`,
    /// `RELAY_ANSWERS_FILE`, `RELAY_ALLOWED_CALLERS`, `RELAY_CLEAR_STATE_ON_ERROR`,
    /// `RELAY_MAX_RETRIES`, `RELAY_SKILL_TOKEN` and `RELAY_CONNECTOR_TOKEN`.
    pub fn from_env() -> Self {
        let bot_id = var("RELAY_BOT_ID").unwrap_or_else(|| "relay-bot".into());
        let mut cfg = Self::for_bot(bot_id);
        if let Some(url) = var("NATS_URL") {
            cfg.nats_url = url;
        }
        if let Some(subject) = var("RELAY_TURN_SUBJECT") {
            cfg.turn_subject = subject;
        }
        cfg.skills_config = var("RELAY_SKILLS_CONFIG").map(PathBuf::from);
        cfg.answers_file = var("RELAY_ANSWERS_FILE").map(PathBuf::from);
        cfg.allowed_callers = var("RELAY_ALLOWED_CALLERS")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();
        cfg.clear_state_on_error = var("RELAY_CLEAR_STATE_ON_ERROR")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);
        if let Some(retries) = var("RELAY_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            cfg.max_retries = retries;
        }
        cfg.skill_token = var("RELAY_SKILL_TOKEN");
        cfg.connector_token = var("RELAY_CONNECTOR_TOKEN");
        cfg
    }

    /// Applies command-line flags on top of this configuration.
    pub fn with_args(mut self, args: Args) -> Self {
        if let Some(bot_id) = args.bot_id {
            let turn_overridden = self.turn_subject != turn_subject(&self.bot_id);
            self.proactive_subject = proactive_subject(&bot_id);
            self.skill_callback_subject = skill_callback_subject(&bot_id);
            if !turn_overridden {
                self.turn_subject = turn_subject(&bot_id);
            }
            self.bot_id = bot_id;
        }
        if let Some(url) = args.nats_url {
            self.nats_url = url;
        }
        if let Some(subject) = args.turn_subject {
            self.turn_subject = subject;
        }
        if args.skills_config.is_some() {
            self.skills_config = args.skills_config;
        }
        if args.answers.is_some() {
            self.answers_file = args.answers;
        }
        if let Some(callers) = args.allowed_callers {
            self.allowed_callers = split_list(&callers);
        }
        if let Some(clear) = args.clear_state_on_error {
            self.clear_state_on_error = clear;
        }
        if let Some(retries) = args.max_retries {
            self.max_retries = retries;
        }
        self
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
