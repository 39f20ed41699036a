use std::collections::BTreeMap;
use std::marker::PhantomData;

use relay_core::{Activity, BotResult, TurnContext};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{SharedStorage, StateError, StoreItem};

/// Which property bag a [`BotState`] manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateScope {
    Conversation,
    User,
}

impl StateScope {
    fn cache_key(self) -> &'static str {
        match self {
            StateScope::Conversation => "relay.state.conversation",
            StateScope::User => "relay.state.user",
        }
    }

    /// Storage key of this scope's bag for the conversation/user of `activity`.
    pub fn storage_key(self, activity: &Activity) -> Result<String, StateError> {
        let channel = activity.channel_id.trim();
        if channel.is_empty() {
            return Err(StateError::InvalidKey("channel_id empty".into()));
        }
        match self {
            StateScope::Conversation => {
                let id = activity.conversation.id.trim();
                if id.is_empty() {
                    return Err(StateError::InvalidKey("conversation.id empty".into()));
                }
                Ok(format!("{channel}/conversations/{id}"))
            }
            StateScope::User => {
                let id = activity.from.id.trim();
                if id.is_empty() {
                    return Err(StateError::InvalidKey("from.id empty".into()));
                }
                Ok(format!("{channel}/users/{id}"))
            }
        }
    }
}

/// Bag loaded for the current turn, cached in the turn's services.
struct CachedBag {
    key: String,
    values: Map<String, Value>,
    hash: String,
}

fn fingerprint(values: &Map<String, Value>) -> String {
    serde_json::to_string(values).unwrap_or_default()
}

/// Property bag of one scope, loaded lazily once per turn and written back by
/// [`BotState::save_changes`] when it changed.
#[derive(Clone)]
pub struct BotState {
    storage: SharedStorage,
    scope: StateScope,
}

impl BotState {
    pub fn new(storage: SharedStorage, scope: StateScope) -> Self {
        Self { storage, scope }
    }

    pub fn conversation(storage: SharedStorage) -> Self {
        Self::new(storage, StateScope::Conversation)
    }

    pub fn user(storage: SharedStorage) -> Self {
        Self::new(storage, StateScope::User)
    }

    pub fn scope(&self) -> StateScope {
        self.scope
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// Typed accessor for the property `name` of this bag.
    pub fn property<T>(&self, name: impl Into<String>) -> StatePropertyAccessor<T> {
        StatePropertyAccessor {
            state: self.clone(),
            name: name.into(),
            _marker: PhantomData,
        }
    }

    /// Loads the bag into the turn cache unless already loaded (or `force`).
    pub async fn load(&self, turn: &TurnContext, force: bool) -> BotResult<()> {
        let cache_key = self.scope.cache_key();
        if !force && turn.has_service(cache_key) {
            return Ok(());
        }
        let key = self.scope.storage_key(&turn.activity())?;
        let mut items = self.storage.read(std::slice::from_ref(&key)).await?;
        let values: Map<String, Value> = match items.remove(&key) {
            Some(item) => serde_json::from_value(item.value).map_err(|source| {
                StateError::Corrupt {
                    key: key.clone(),
                    source,
                }
            })?,
            None => Map::new(),
        };
        let hash = fingerprint(&values);
        turn.set_service(cache_key, CachedBag { key, values, hash });
        Ok(())
    }

    /// Writes the bag back if it changed since it was loaded (or unconditionally with `force`).
    pub async fn save_changes(&self, turn: &TurnContext, force: bool) -> BotResult<()> {
        let cache_key = self.scope.cache_key();
        let pending = turn
            .with_service::<CachedBag, _>(cache_key, |bag| {
                let hash = fingerprint(&bag.values);
                (force || hash != bag.hash).then(|| (bag.key.clone(), bag.values.clone(), hash))
            })
            .flatten();
        let Some((key, values, hash)) = pending else {
            return Ok(());
        };

        let changes = BTreeMap::from([(key.clone(), StoreItem::new(Value::Object(values)))]);
        self.storage.write(changes).await?;
        turn.with_service::<CachedBag, _>(cache_key, |bag| bag.hash = hash);
        debug!(scope = ?self.scope, %key, "state saved");
        Ok(())
    }

    /// Empties the bag; the next save persists the empty bag.
    pub async fn clear(&self, turn: &TurnContext) -> BotResult<()> {
        self.load(turn, false).await?;
        turn.with_service::<CachedBag, _>(self.scope.cache_key(), |bag| bag.values.clear());
        Ok(())
    }

    /// Removes the bag from the turn cache and from storage.
    pub async fn delete(&self, turn: &TurnContext) -> BotResult<()> {
        turn.remove_service(self.scope.cache_key());
        let key = self.scope.storage_key(&turn.activity())?;
        self.storage.delete(&[key]).await?;
        Ok(())
    }

    async fn get_value(&self, turn: &TurnContext, name: &str) -> BotResult<Option<Value>> {
        self.load(turn, false).await?;
        Ok(turn
            .with_service::<CachedBag, _>(self.scope.cache_key(), |bag| {
                bag.values.get(name).cloned()
            })
            .flatten())
    }

    async fn set_value(&self, turn: &TurnContext, name: &str, value: Value) -> BotResult<()> {
        self.load(turn, false).await?;
        turn.with_service::<CachedBag, _>(self.scope.cache_key(), |bag| {
            bag.values.insert(name.to_string(), value)
        });
        Ok(())
    }

    async fn delete_value(&self, turn: &TurnContext, name: &str) -> BotResult<()> {
        self.load(turn, false).await?;
        turn.with_service::<CachedBag, _>(self.scope.cache_key(), |bag| bag.values.remove(name));
        Ok(())
    }
}

/// Typed view of one property of a [`BotState`] bag.
pub struct StatePropertyAccessor<T> {
    state: BotState,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for StatePropertyAccessor<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> StatePropertyAccessor<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value; a stored value that does not decode as `T` is [`StateError::Corrupt`].
    pub async fn get(&self, turn: &TurnContext) -> BotResult<Option<T>> {
        match self.state.get_value(turn, &self.name).await? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(|source| {
                StateError::Corrupt {
                    key: self.name.clone(),
                    source,
                }
                .into()
            }),
        }
    }

    /// Current value or `default()`; the default is not written back.
    pub async fn get_or_default(
        &self,
        turn: &TurnContext,
        default: impl FnOnce() -> T + Send,
    ) -> BotResult<T> {
        Ok(self.get(turn).await?.unwrap_or_else(default))
    }

    pub async fn set(&self, turn: &TurnContext, value: &T) -> BotResult<()> {
        let value = serde_json::to_value(value)?;
        self.state.set_value(turn, &self.name, value).await
    }

    pub async fn delete(&self, turn: &TurnContext) -> BotResult<()> {
        self.state.delete_value(turn, &self.name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStorage, Storage};
    use relay_core::{BotError, BufferedAdapter};
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        visits: u32,
    }

    fn turn() -> TurnContext {
        let mut activity = Activity::message("hi");
        activity.channel_id = "test".into();
        activity.from.id = "user-1".into();
        activity.conversation.id = "conv-1".into();
        TurnContext::new(Arc::new(BufferedAdapter::new()), activity)
    }

    #[tokio::test]
    async fn reads_before_writes_do_not_dirty_the_bag() {
        let storage = Arc::new(MemoryStorage::new());
        let state = BotState::conversation(storage.clone());
        let profile = state.property::<Profile>("profile");
        let turn = turn();

        let value = profile.get_or_default(&turn, Profile::default).await.unwrap();
        assert_eq!(value, Profile::default());
        state.save_changes(&turn, false).await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn changes_persist_across_turns() {
        let storage = Arc::new(MemoryStorage::new());
        let state = BotState::user(storage.clone());
        let profile = state.property::<Profile>("profile");

        let first = turn();
        profile
            .set(&first, &Profile { name: "Ada".into(), visits: 1 })
            .await
            .unwrap();
        state.save_changes(&first, false).await.unwrap();

        let second = turn();
        let loaded = profile.get(&second).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Ada");
        let raw = storage.read(&["test/users/user-1".to_string()]).await.unwrap();
        assert_eq!(raw["test/users/user-1"].value["profile"]["visits"], json!(1));
    }

    #[tokio::test]
    async fn undecodable_value_is_corrupt_not_default() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .write(BTreeMap::from([(
                "test/conversations/conv-1".to_string(),
                StoreItem::new(json!({"profile": "not a profile"})),
            )]))
            .await
            .unwrap();
        let state = BotState::conversation(storage);
        let err = state
            .property::<Profile>("profile")
            .get(&turn())
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Storage(_)));
        assert!(err.to_string().contains("does not decode"));
    }

    #[tokio::test]
    async fn clear_and_delete() {
        let storage = Arc::new(MemoryStorage::new());
        let state = BotState::conversation(storage.clone());
        let counter = state.property::<u32>("count");
        let turn = turn();
        counter.set(&turn, &3).await.unwrap();
        state.save_changes(&turn, false).await.unwrap();

        state.clear(&turn).await.unwrap();
        assert_eq!(counter.get(&turn).await.unwrap(), None);
        state.save_changes(&turn, false).await.unwrap();
        let raw = storage
            .read(&["test/conversations/conv-1".to_string()])
            .await
            .unwrap();
        assert_eq!(raw["test/conversations/conv-1"].value, json!({}));

        state.delete(&turn).await.unwrap();
        assert!(storage.is_empty());
    }

    #[test]
    fn storage_keys_require_addressing() {
        let mut activity = Activity::message("hi");
        activity.channel_id = "test".into();
        assert!(StateScope::Conversation.storage_key(&activity).is_err());
        activity.conversation.id = "c".into();
        assert_eq!(
            StateScope::Conversation.storage_key(&activity).unwrap(),
            "test/conversations/c"
        );
        assert!(StateScope::User.storage_key(&activity).is_err());
    }
}
