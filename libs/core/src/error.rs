use thiserror::Error;

/// Failure of a turn-pipeline operation.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("invalid argument: {0}")]
    Validation(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("{0} is not supported by this adapter")]
    NotSupported(&'static str),
    #[error("dialog execution failed: {0}")]
    Dialog(#[source] anyhow::Error),
    #[error("state storage failed: {0}")]
    Storage(#[source] anyhow::Error),
    #[error("transport failed: {0}")]
    Transport(#[source] anyhow::Error),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type BotResult<T> = Result<T, BotError>;

impl BotError {
    pub fn validation(message: impl Into<String>) -> Self {
        BotError::Validation(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        BotError::Unauthorized(message.into())
    }

    /// HTTP status a transport should answer with when a turn fails with this error.
    pub fn status_code(&self) -> u16 {
        match self {
            BotError::Validation(_) | BotError::Serialization(_) => 400,
            BotError::Unauthorized(_) => 403,
            BotError::NotSupported(_) => 501,
            BotError::Dialog(_) | BotError::Storage(_) => 500,
            BotError::Transport(_) => 502,
        }
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BotError::Validation(_) => "validation",
            BotError::Unauthorized(_) => "unauthorized",
            BotError::NotSupported(_) => "not_supported",
            BotError::Dialog(_) => "dialog",
            BotError::Storage(_) => "storage",
            BotError::Transport(_) => "transport",
            BotError::Serialization(_) => "serialization",
        }
    }
}

/// Errors raised by step code are dialog failures unless they wrap a [`BotError`].
impl From<anyhow::Error> for BotError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<BotError>() {
            Ok(bot) => bot,
            Err(other) => BotError::Dialog(other),
        }
    }
}

/// Fails with [`BotError::Validation`] when `value` is blank.
pub fn ensure_not_blank(value: &str, what: &str) -> BotResult<()> {
    if value.trim().is_empty() {
        return Err(BotError::validation(format!("{what} empty")));
    }
    Ok(())
}
