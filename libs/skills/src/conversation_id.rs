use std::collections::BTreeMap;

use relay_core::{BotResult, ConversationReference, ensure_not_blank};
use relay_state::{SharedStorage, StateError, StoreItem};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::SkillDescriptor;

const KEY_PREFIX: &str = "skill-conversation/";

/// Parent conversation a skill conversation id stands for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillConversationReference {
    pub conversation_reference: ConversationReference,
    pub skill_id: String,
}

/// Issues opaque conversation ids for skill calls and maps them back to the parent
/// conversation when the skill calls back.
#[derive(Clone)]
pub struct SkillConversationIdFactory {
    storage: SharedStorage,
}

impl SkillConversationIdFactory {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    fn key(id: &str) -> String {
        format!("{KEY_PREFIX}{id}")
    }

    pub async fn create(
        &self,
        reference: &ConversationReference,
        skill: &SkillDescriptor,
    ) -> BotResult<String> {
        ensure_not_blank(&reference.conversation.id, "conversation.id")?;
        let id = Uuid::new_v4().to_string();
        let record = SkillConversationReference {
            conversation_reference: reference.clone(),
            skill_id: skill.id.clone(),
        };
        let item = StoreItem::new(serde_json::to_value(&record)?);
        self.storage
            .write(BTreeMap::from([(Self::key(&id), item)]))
            .await?;
        debug!(skill = %skill.id, skill_conversation = %id, "skill conversation id created");
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> BotResult<Option<SkillConversationReference>> {
        ensure_not_blank(id, "skill conversation id")?;
        let key = Self::key(id);
        let mut items = self.storage.read(std::slice::from_ref(&key)).await?;
        match items.remove(&key) {
            None => Ok(None),
            Some(item) => serde_json::from_value(item.value)
                .map(Some)
                .map_err(|source| StateError::Corrupt { key, source }.into()),
        }
    }

    pub async fn delete(&self, id: &str) -> BotResult<()> {
        ensure_not_blank(id, "skill conversation id")?;
        self.storage.delete(&[Self::key(id)]).await?;
        Ok(())
    }
}
