//! Relay runner: hosts one bot behind the turn pipeline and serves it over NATS.

pub mod bots;
pub mod config;
pub mod host;
pub mod worker;

pub use bots::{
    ANSWER_DIALOG, QnaEntry, ROOT_DIALOG, SkillWiring, StaticAnswerService, root_bot,
    root_dialogs, skill_dialog_id,
};
pub use config::{Args, RunnerConfig};
pub use host::{BotHost, BufferedTurn, TURN_ERROR_MESSAGE, TURN_ERROR_TRACE, TurnOutcome};
pub use worker::{
    ProactiveRequest, SkillCallbackRequest, SkillCallbackResponse, TurnRequest, TurnResponse,
    TurnWorker,
};
