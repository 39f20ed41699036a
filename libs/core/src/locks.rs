use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// One async mutex per conversation id; turns of the same conversation run one at a time.
///
/// Clones share the same locks. An entry lives only while a guard or a waiter holds it.
#[derive(Clone, Default)]
pub struct ConversationLocks {
    locks: Arc<LockMap>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, conversation_id: &str) -> ConversationGuard {
        let lock = self
            .locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        ConversationGuard {
            guard: Some(lock.lock_owned().await),
            locks: self.locks.clone(),
            conversation_id: conversation_id.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held for the duration of a turn; releasing it forgets the conversation's lock when
/// nobody else is waiting for it.
pub struct ConversationGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
    conversation_id: String,
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The map's own handle is the last one once no guard or waiter is left.
        self.locks
            .remove_if(&self.conversation_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
