use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{StateError, Storage, StoreItem};

/// Redis-backed storage. E-tags are not enforced; writes are last-writer-wins.
pub struct RedisStorage {
    namespace: String,
    connection: Mutex<redis::aio::ConnectionManager>,
}

impl RedisStorage {
    pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self {
            namespace: namespace.into(),
            connection: Mutex::new(manager),
        })
    }

    fn state_key(&self, key: &str) -> String {
        format!("{}:state:{}", self.namespace, key)
    }
}

fn backend(err: redis::RedisError) -> StateError {
    StateError::Backend(anyhow::Error::new(err))
}

#[async_trait]
impl Storage for RedisStorage {
    async fn read(&self, keys: &[String]) -> Result<BTreeMap<String, StoreItem>, StateError> {
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }
        let namespaced: Vec<String> = keys.iter().map(|k| self.state_key(k)).collect();
        let mut conn = self.connection.lock().await;
        let payloads: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&namespaced)
            .query_async(&mut *conn)
            .await
            .map_err(backend)?;

        let mut found = BTreeMap::new();
        for (key, payload) in keys.iter().zip(payloads) {
            if let Some(raw) = payload {
                let item = serde_json::from_str(&raw).map_err(|source| StateError::Corrupt {
                    key: key.clone(),
                    source,
                })?;
                found.insert(key.clone(), item);
            }
        }
        Ok(found)
    }

    async fn write(&self, changes: BTreeMap<String, StoreItem>) -> Result<(), StateError> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for (key, item) in &changes {
            let stored = StoreItem::new(item.value.clone());
            let payload = serde_json::to_string(&stored)
                .map_err(|e| StateError::Backend(anyhow::Error::new(e)))?;
            pipe.cmd("SET").arg(self.state_key(key)).arg(payload).ignore();
        }
        let mut conn = self.connection.lock().await;
        pipe.query_async::<()>(&mut *conn).await.map_err(backend)?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StateError> {
        if keys.is_empty() {
            return Ok(());
        }
        let namespaced: Vec<String> = keys.iter().map(|k| self.state_key(k)).collect();
        let mut conn = self.connection.lock().await;
        redis::cmd("DEL")
            .arg(&namespaced)
            .query_async::<()>(&mut *conn)
            .await
            .map_err(backend)?;
        Ok(())
    }
}
