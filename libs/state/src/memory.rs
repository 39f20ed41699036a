use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::{StateError, Storage, StoreItem};

/// Process-local storage with optimistic e-tag concurrency.
#[derive(Default)]
pub struct MemoryStorage {
    items: DashMap<String, StoreItem>,
    next_tag: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_tag(&self) -> String {
        (self.next_tag.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn unconditional(tag: Option<&str>) -> bool {
    matches!(tag, None | Some("*"))
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, keys: &[String]) -> Result<BTreeMap<String, StoreItem>, StateError> {
        Ok(keys
            .iter()
            .filter_map(|key| {
                self.items
                    .get(key)
                    .map(|entry| (key.clone(), entry.value().clone()))
            })
            .collect())
    }

    async fn write(&self, changes: BTreeMap<String, StoreItem>) -> Result<(), StateError> {
        for (key, item) in changes {
            let tagged = StoreItem {
                value: item.value,
                e_tag: Some(self.fresh_tag()),
            };
            match self.items.entry(key) {
                Entry::Occupied(mut existing) => {
                    let wanted = item.e_tag.as_deref();
                    if !unconditional(wanted) && existing.get().e_tag.as_deref() != wanted {
                        return Err(StateError::Conflict {
                            key: existing.key().clone(),
                        });
                    }
                    existing.insert(tagged);
                }
                Entry::Vacant(slot) => {
                    slot.insert(tagged);
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StateError> {
        for key in keys {
            self.items.remove(key);
        }
        Ok(())
    }
}
