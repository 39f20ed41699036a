use crate::{Activity, ConversationReference};
use dashmap::DashMap;
use std::sync::Arc;

/// Conversation references keyed by conversation id, kept until explicitly removed.
#[derive(Default)]
pub struct ConversationReferenceStore {
    references: DashMap<String, ConversationReference>,
}

pub type SharedReferenceStore = Arc<ConversationReferenceStore>;

impl ConversationReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the reference of `activity`'s conversation if none is stored yet.
    /// Returns `true` when the conversation was seen for the first time.
    pub fn observe(&self, activity: &Activity) -> bool {
        if activity.conversation.id.is_empty() {
            return false;
        }
        let mut inserted = false;
        self.references
            .entry(activity.conversation.id.clone())
            .or_insert_with(|| {
                inserted = true;
                activity.conversation_reference()
            });
        inserted
    }

    pub fn upsert(&self, reference: ConversationReference) {
        self.references
            .insert(reference.conversation.id.clone(), reference);
    }

    pub fn get(&self, conversation_id: &str) -> Option<ConversationReference> {
        self.references
            .get(conversation_id)
            .map(|entry| entry.value().clone())
    }

    pub fn remove(&self, conversation_id: &str) -> Option<ConversationReference> {
        self.references
            .remove(conversation_id)
            .map(|(_, reference)| reference)
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn snapshot(&self) -> Vec<ConversationReference> {
        self.references
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
