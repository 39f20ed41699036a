mod bot_state;
mod error;
mod memory;
#[cfg(feature = "redis-store")]
mod redis_store;

use std::collections::BTreeMap;
use std::{env, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
#[cfg(not(feature = "redis-store"))]
use tracing::warn;

pub use bot_state::{BotState, StatePropertyAccessor, StateScope};
pub use error::StateError;
pub use memory::MemoryStorage;
#[cfg(feature = "redis-store")]
pub use redis_store::RedisStorage;

/// Shared storage handle used across turns and services.
pub type SharedStorage = Arc<dyn Storage>;

/// Value persisted under a storage key.
///
/// `e_tag` is `None` or `"*"` for unconditional writes; any other value must match the
/// stored item's tag for the write to succeed (stores without tag support ignore it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreItem {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
}

impl StoreItem {
    pub fn new(value: Value) -> Self {
        Self { value, e_tag: None }
    }

    pub fn with_e_tag(mut self, e_tag: impl Into<String>) -> Self {
        self.e_tag = Some(e_tag.into());
        self
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Reads `keys`; absent keys are omitted from the result.
    async fn read(&self, keys: &[String]) -> Result<BTreeMap<String, StoreItem>, StateError>;
    async fn write(&self, changes: BTreeMap<String, StoreItem>) -> Result<(), StateError>;
    async fn delete(&self, keys: &[String]) -> Result<(), StateError>;
}

/// Returns an in-memory storage wrapped in an [`Arc`].
pub fn shared_memory_storage() -> SharedStorage {
    Arc::new(MemoryStorage::new())
}

/// Builds a storage from environment variables.
///
/// If `STATE_REDIS_URL` is present and the `redis-store` feature is enabled, a Redis-backed
/// storage is created. Otherwise, the function falls back to the in-memory implementation.
pub async fn storage_from_env() -> Result<SharedStorage> {
    match env::var("STATE_REDIS_URL") {
        Ok(url) => {
            let namespace = env::var("STATE_NAMESPACE").unwrap_or_else(|_| "relay".into());
            build_redis_storage(&url, &namespace).await
        }
        Err(_) => Ok(shared_memory_storage()),
    }
}

#[cfg(feature = "redis-store")]
async fn build_redis_storage(url: &str, namespace: &str) -> Result<SharedStorage> {
    let storage = RedisStorage::connect(url, namespace).await?;
    Ok(Arc::new(storage))
}

#[cfg(not(feature = "redis-store"))]
async fn build_redis_storage(_url: &str, _namespace: &str) -> Result<SharedStorage> {
    warn!("redis-store feature disabled; using in-memory state storage");
    Ok(shared_memory_storage())
}
