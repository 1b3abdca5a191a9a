//! In-memory storage, for tests and dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{Collection, StateStore, StoreError, StoreResult};

/// Volatile [`StateStore`]. Can be switched to fail every call, and counts
/// writes so callers can assert that nothing was persisted.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<Collection, BTreeMap<u64, Value>>>,
    unavailable: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful `put`/`delete` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, collection: Collection, id: u64) -> StoreResult<Option<Value>> {
        self.check()?;
        let collections = self.collections.lock().await;
        Ok(collections
            .get(&collection)
            .and_then(|records| records.get(&id))
            .cloned())
    }

    async fn put(&self, collection: Collection, id: u64, record: Value) -> StoreResult<()> {
        self.check()?;
        self.collections
            .lock()
            .await
            .entry(collection)
            .or_default()
            .insert(id, record);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: u64) -> StoreResult<bool> {
        self.check()?;
        let removed = self
            .collections
            .lock()
            .await
            .get_mut(&collection)
            .and_then(|records| records.remove(&id))
            .is_some();
        if removed {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }

    async fn list_all(&self, collection: Collection) -> StoreResult<Vec<(u64, Value)>> {
        self.check()?;
        let collections = self.collections.lock().await;
        Ok(collections
            .get(&collection)
            .map(|records| records.iter().map(|(id, v)| (*id, v.clone())).collect())
            .unwrap_or_default())
    }
}
