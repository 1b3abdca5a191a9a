//! File-based storage implementation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Collection, StateStore, StoreError, StoreResult};

/// One JSON object per collection (`last.json`, `guilds.json`) under a
/// state directory, mapping the record id to the record.
pub struct JsonFileStore {
    /// Directory holding the collection files
    dir: PathBuf,

    /// Serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Create a new file store rooted at `dir`. The directory is created on
    /// first write.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// Get the state directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, collection: Collection) -> PathBuf {
        self.dir.join(format!("{}.json", collection.as_str()))
    }

    /// Read and parse a collection file
    async fn read_collection(&self, collection: Collection) -> StoreResult<BTreeMap<u64, Value>> {
        let path = self.path_for(collection);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        let raw: BTreeMap<String, Value> = serde_json::from_str(&content)?;
        raw.into_iter()
            .map(|(key, value)| {
                key.parse::<u64>()
                    .map(|id| (id, value))
                    .map_err(|e| StoreError::Corrupt {
                        collection: collection.as_str(),
                        id: key.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect()
    }

    /// Write a collection file via a temp file and rename
    async fn write_collection(
        &self,
        collection: Collection,
        records: &BTreeMap<u64, Value>,
    ) -> StoreResult<()> {
        let io_err = |path: &Path| {
            let path = path.display().to_string();
            move |source: std::io::Error| StoreError::Io { path, source }
        };

        fs::create_dir_all(&self.dir)
            .await
            .map_err(io_err(&self.dir))?;

        let path = self.path_for(collection);
        let tmp = path.with_extension("json.tmp");
        let keyed: BTreeMap<String, &Value> =
            records.iter().map(|(id, v)| (id.to_string(), v)).collect();
        let content = serde_json::to_string_pretty(&keyed)?;

        fs::write(&tmp, content).await.map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).await.map_err(io_err(&path))?;

        debug!(
            collection = collection.as_str(),
            records = records.len(),
            "Wrote collection"
        );
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn get(&self, collection: Collection, id: u64) -> StoreResult<Option<Value>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_collection(collection).await?.remove(&id))
    }

    async fn put(&self, collection: Collection, id: u64, record: Value) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_collection(collection).await?;
        records.insert(id, record);
        self.write_collection(collection, &records).await
    }

    async fn delete(&self, collection: Collection, id: u64) -> StoreResult<bool> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_collection(collection).await?;
        if records.remove(&id).is_none() {
            return Ok(false);
        }
        self.write_collection(collection, &records).await?;
        Ok(true)
    }

    async fn list_all(&self, collection: Collection) -> StoreResult<Vec<(u64, Value)>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_collection(collection).await?.into_iter().collect())
    }
}
