//! Per-collection writer locks

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{
    Mutex as AsyncMutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};

/// Registry of [`CollectionLock`]s by collection name
#[derive(Clone, Default)]
pub struct CollectionLocks {
    inner: Arc<Mutex<HashMap<String, CollectionLock>>>,
}

impl CollectionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, collection: &str) -> CollectionLock {
        let mut locks = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(collection.to_string()).or_default().clone()
    }
}

/// Appending writers share `writers`; a reset-and-reload holds it
/// exclusively from the reset until its last batch lands. `setup`
/// serializes creating the collection and fixing its dimension.
#[derive(Clone, Default)]
pub struct CollectionLock {
    writers: Arc<RwLock<()>>,
    setup: Arc<AsyncMutex<()>>,
}

impl CollectionLock {
    pub async fn shared(&self) -> OwnedRwLockReadGuard<()> {
        Arc::clone(&self.writers).read_owned().await
    }

    pub async fn exclusive(&self) -> OwnedRwLockWriteGuard<()> {
        Arc::clone(&self.writers).write_owned().await
    }

    pub async fn setup(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.setup).lock_owned().await
    }

    pub fn same_as(&self, other: &CollectionLock) -> bool {
        Arc::ptr_eq(&self.writers, &other.writers)
    }
}
