//! Per-book mutual exclusion for queue and copy-counter updates.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::entities::BookId;

/// Idle locks are dropped once the registry grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

/// Registry of one async mutex per book.
///
/// Every transition that touches a book's reservation queue or shelf
/// counter runs while holding that book's guard, so operations on the same
/// book are serialized and operations on different books never contend.
/// Guards are meant for one short load-decide-commit section.
#[derive(Clone, Default)]
pub struct BookLocks {
    locks: Arc<Mutex<HashMap<BookId, Arc<Mutex<()>>>>>,
}

impl BookLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `book_id`.
    pub async fn lock(&self, book_id: BookId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() > PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry(book_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of books with a registered lock.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
