//! Typed records on top of the document store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{Collection, StateStore, StoreError, StoreResult};

/// Id of the watermark record in [`Collection::Last`].
pub const WATERMARK_ID: u64 = 0;
/// Id of the sent-ledger record in [`Collection::Last`].
pub const LAST_SENT_ID: u64 = 1;
/// Id of the pending-destinations record in [`Collection::Last`].
pub const PENDING_ID: u64 = 2;

/// Last processed incident and which of its updates have been handled.
/// `seen_update_ids` only means anything together with `incident_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub incident_id: String,
    #[serde(default)]
    pub seen_update_ids: BTreeSet<String>,
}

impl Watermark {
    #[must_use]
    pub fn new(incident_id: impl Into<String>, seen_update_ids: BTreeSet<String>) -> Self {
        Self {
            incident_id: incident_id.into(),
            seen_update_ids,
        }
    }
}

/// Destinations that already hold updates of the current incident.
///
/// `destinations` is the union; `updates` records exactly which destination
/// received which update so a retried update never reaches anyone twice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSent {
    #[serde(default)]
    pub destinations: BTreeSet<u64>,
    #[serde(default)]
    pub updates: BTreeMap<String, BTreeSet<u64>>,
}

impl LastSent {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty() && self.updates.is_empty()
    }

    /// Keep only the entries for updates matching `keep` and rebuild the
    /// union. Returns whether anything was dropped.
    pub fn retain_updates(&mut self, mut keep: impl FnMut(&str) -> bool) -> bool {
        let before = self.updates.len();
        self.updates.retain(|update_id, _| keep(update_id));
        let destinations: BTreeSet<u64> = self.updates.values().flatten().copied().collect();
        let changed = before != self.updates.len() || destinations != self.destinations;
        self.destinations = destinations;
        changed
    }

    /// Whether `destination_id` already received `update_id`.
    #[must_use]
    pub fn received(&self, update_id: &str, destination_id: u64) -> bool {
        self.updates
            .get(update_id)
            .is_some_and(|ids| ids.contains(&destination_id))
    }

    /// Whether `destination_id` holds every one of `update_ids`.
    #[must_use]
    pub fn holds_all<'a>(
        &self,
        destination_id: u64,
        mut update_ids: impl Iterator<Item = &'a str>,
    ) -> bool {
        update_ids.all(|update_id| self.received(update_id, destination_id))
    }

    /// Record successful deliveries of one update.
    pub fn record(&mut self, update_id: &str, destination_ids: impl IntoIterator<Item = u64>) {
        let entry = self.updates.entry(update_id.to_string()).or_default();
        for id in destination_ids {
            entry.insert(id);
            self.destinations.insert(id);
        }
    }

    /// Drop every trace of a destination. Returns whether anything changed.
    pub fn forget(&mut self, destination_id: u64) -> bool {
        let mut changed = self.destinations.remove(&destination_id);
        for ids in self.updates.values_mut() {
            changed |= ids.remove(&destination_id);
        }
        changed
    }
}

/// A guild's registered destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub guild_id: u64,
    pub destination_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct GuildRecord {
    destination_id: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PendingRecord {
    #[serde(default)]
    destinations: BTreeSet<u64>,
}

/// Typed access to every persisted record.
#[derive(Clone)]
pub struct Records {
    store: Arc<dyn StateStore>,
}

impl Records {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    // =========================================================================
    // Singleton bookkeeping
    // =========================================================================

    pub async fn load_watermark(&self) -> StoreResult<Option<Watermark>> {
        self.load(Collection::Last, WATERMARK_ID).await
    }

    pub async fn save_watermark(&self, watermark: &Watermark) -> StoreResult<()> {
        self.save(Collection::Last, WATERMARK_ID, watermark).await?;
        info!(
            incident_id = %watermark.incident_id,
            seen = watermark.seen_update_ids.len(),
            "Watermark persisted"
        );
        Ok(())
    }

    pub async fn load_last_sent(&self) -> StoreResult<LastSent> {
        Ok(self
            .load(Collection::Last, LAST_SENT_ID)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_last_sent(&self, last_sent: &LastSent) -> StoreResult<()> {
        self.save(Collection::Last, LAST_SENT_ID, last_sent).await?;
        info!(
            destinations = last_sent.destinations.len(),
            "Last sent list persisted"
        );
        Ok(())
    }

    pub async fn load_pending(&self) -> StoreResult<BTreeSet<u64>> {
        Ok(self
            .load::<PendingRecord>(Collection::Last, PENDING_ID)
            .await?
            .unwrap_or_default()
            .destinations)
    }

    pub async fn save_pending(&self, pending: &BTreeSet<u64>) -> StoreResult<()> {
        let record = PendingRecord {
            destinations: pending.clone(),
        };
        self.save(Collection::Last, PENDING_ID, &record).await?;
        info!(destinations = pending.len(), "Pending destinations persisted");
        Ok(())
    }

    // =========================================================================
    // Destination registry
    // =========================================================================

    /// Every registered guild and its destination.
    pub async fn subscriptions(&self) -> StoreResult<Vec<Subscription>> {
        self.store
            .list_all(Collection::Guilds)
            .await?
            .into_iter()
            .map(|(guild_id, value)| {
                decode::<GuildRecord>(Collection::Guilds, guild_id, value).map(|record| {
                    Subscription {
                        guild_id,
                        destination_id: record.destination_id,
                    }
                })
            })
            .collect()
    }

    /// Ids of every registered destination.
    pub async fn destination_ids(&self) -> StoreResult<BTreeSet<u64>> {
        Ok(self
            .subscriptions()
            .await?
            .into_iter()
            .map(|s| s.destination_id)
            .collect())
    }

    pub async fn destination_for_guild(&self, guild_id: u64) -> StoreResult<Option<u64>> {
        Ok(self
            .load::<GuildRecord>(Collection::Guilds, guild_id)
            .await?
            .map(|r| r.destination_id))
    }

    /// Point a guild at a destination. Returns the previous destination.
    pub async fn set_guild_destination(
        &self,
        guild_id: u64,
        destination_id: u64,
    ) -> StoreResult<Option<u64>> {
        let previous = self.destination_for_guild(guild_id).await?;
        self.save(
            Collection::Guilds,
            guild_id,
            &GuildRecord { destination_id },
        )
        .await?;
        info!(guild_id, destination_id, ?previous, "Guild destination updated");
        Ok(previous)
    }

    /// Remove a guild's registration. Returns the destination it pointed at.
    pub async fn remove_guild(&self, guild_id: u64) -> StoreResult<Option<u64>> {
        let Some(destination_id) = self.destination_for_guild(guild_id).await? else {
            return Ok(None);
        };
        self.store.delete(Collection::Guilds, guild_id).await?;
        info!(guild_id, destination_id, "Guild destination removed");
        Ok(Some(destination_id))
    }

    /// Remove whichever guild points at `destination_id`.
    pub async fn remove_destination(&self, destination_id: u64) -> StoreResult<Option<Subscription>> {
        let Some(sub) = self
            .subscriptions()
            .await?
            .into_iter()
            .find(|s| s.destination_id == destination_id)
        else {
            return Ok(None);
        };
        self.store.delete(Collection::Guilds, sub.guild_id).await?;
        info!(
            guild_id = sub.guild_id,
            destination_id, "Guild destination removed"
        );
        Ok(Some(sub))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn load<T: DeserializeOwned>(
        &self,
        collection: Collection,
        id: u64,
    ) -> StoreResult<Option<T>> {
        self.store
            .get(collection, id)
            .await?
            .map(|value| decode(collection, id, value))
            .transpose()
    }

    async fn save<T: Serialize + Sync>(
        &self,
        collection: Collection,
        id: u64,
        record: &T,
    ) -> StoreResult<()> {
        let value = serde_json::to_value(record)?;
        self.store.put(collection, id, value).await
    }
}

fn decode<T: DeserializeOwned>(collection: Collection, id: u64, value: Value) -> StoreResult<T> {
    serde_json::from_value(value).map_err(|e| StoreError::Corrupt {
        collection: collection.as_str(),
        id: id.to_string(),
        reason: e.to_string(),
    })
}
