//! Storage layer for relay state.
//!
//! The store is a small document store: two collections of JSON records
//! keyed by integer ids. [`Records`] layers the typed records on top.

mod file;
mod memory;
mod records;

pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use records::{
    LastSent, Records, Subscription, Watermark, LAST_SENT_ID, PENDING_ID, WATERMARK_ID,
};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Logical record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    /// Singleton bookkeeping records (watermark, sent ledger, pending set)
    Last,
    /// Guild id → destination registry
    Guilds,
}

impl Collection {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Last => "last",
            Self::Guilds => "guilds",
        }
    }
}

/// Store failures. Cycle-fatal; in-memory state is kept.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt record {collection}/{id}: {reason}")]
    Corrupt {
        collection: &'static str,
        id: String,
        reason: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Document store contract.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch a record, `None` if absent.
    async fn get(&self, collection: Collection, id: u64) -> StoreResult<Option<Value>>;

    /// Insert or replace a record.
    async fn put(&self, collection: Collection, id: u64, record: Value) -> StoreResult<()>;

    /// Remove a record. Returns whether it existed.
    async fn delete(&self, collection: Collection, id: u64) -> StoreResult<bool>;

    /// Every record in a collection, ordered by id.
    async fn list_all(&self, collection: Collection) -> StoreResult<Vec<(u64, Value)>>;
}
