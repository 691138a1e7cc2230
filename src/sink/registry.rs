use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{Mutex as CreationMutex, MutexGuard};

/// Process-wide set of indices known to exist in the backend, plus the lock
/// serializing index creation. Shared by every uploader through an `Arc`;
/// consumers never touch the underlying map.
#[derive(Debug, Default)]
pub struct IndexRegistry {
    known: Mutex<HashMap<String, DateTime<Utc>>>,
    creation: CreationMutex<()>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, index: &str) -> bool {
        self.known.lock().unwrap().contains_key(index)
    }

    pub fn insert(&self, index: &str) {
        self.known
            .lock()
            .unwrap()
            .insert(index.to_string(), Utc::now());
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.known.lock().unwrap().len()
    }

    /// The guard held across the re-check and create sequence, so at most
    /// one create attempt per index is in flight within this process.
    pub async fn lock_creation(&self) -> MutexGuard<'_, ()> {
        self.creation.lock().await
    }
}
