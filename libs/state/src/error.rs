use relay_core::BotError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("e-tag conflict writing `{key}`")]
    Conflict { key: String },
    #[error("stored value under `{key}` does not decode: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot derive a storage key: {0}")]
    InvalidKey(String),
    #[error("storage backend failed: {0}")]
    Backend(#[source] anyhow::Error),
}

impl From<StateError> for BotError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::InvalidKey(reason) => BotError::Validation(reason),
            other => BotError::Storage(anyhow::Error::new(other)),
        }
    }
}
