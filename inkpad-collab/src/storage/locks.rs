//! Per-document write locks.
//!
//! Every load-modify-save of a stored document runs under its lock, so
//! saves, renames, reverts, accepted invitations and deletes never
//! interleave on the same record.
//!
//! Ordering: a room lock may be held while taking a document lock, never
//! the reverse.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

/// Exclusive access to one document record until dropped.
pub type DocumentGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct DocumentLocks {
    slots: RwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, document_id: Uuid) -> Arc<Mutex<()>> {
        // Fast path: read lock
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(&document_id) {
                return slot.clone();
            }
        }

        // Slow path: write lock, double-check
        let mut slots = self.slots.write().await;
        slots.entry(document_id).or_default().clone()
    }

    /// Wait until `document_id` is free and take it.
    pub async fn lock(&self, document_id: Uuid) -> DocumentGuard {
        self.slot(document_id).await.lock_owned().await
    }

    /// Drop the slot of a deleted document. Waiters already queued on it
    /// reload the record and find it gone.
    pub async fn forget(&self, document_id: Uuid) {
        self.slots.write().await.remove(&document_id);
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }
}
