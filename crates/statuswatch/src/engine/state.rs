//! In-memory reconciliation caches.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::store::{LastSent, Records, StoreResult, Watermark};

/// Caches owned by the engine and threaded through every cycle.
///
/// Each cache is loaded lazily from the store the first time it is needed
/// (and again whenever it is found empty), then kept in memory and written
/// back only when it changes.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationState {
    pub(crate) watermark: Option<Watermark>,
    pub(crate) last_sent: LastSent,
    pub(crate) pending: BTreeSet<u64>,
}

/// The single-flight guard: cycles and subscription commands both take this
/// lock for their whole duration.
pub type SharedState = Arc<Mutex<ReconciliationState>>;

impl ReconciliationState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    pub fn watermark(&self) -> Option<&Watermark> {
        self.watermark.as_ref()
    }

    pub fn last_sent(&self) -> &LastSent {
        &self.last_sent
    }

    pub fn pending(&self) -> &BTreeSet<u64> {
        &self.pending
    }

    pub(crate) async fn warm_watermark(&mut self, records: &Records) -> StoreResult<()> {
        if self.watermark.is_none() {
            debug!("Watermark cache is missing");
            self.watermark = records.load_watermark().await?;
            if self.watermark.is_some() {
                info!("Using watermark from the store");
            }
        }
        Ok(())
    }

    pub(crate) async fn warm_pending(&mut self, records: &Records) -> StoreResult<()> {
        if self.pending.is_empty() {
            self.pending = records.load_pending().await?;
            if !self.pending.is_empty() {
                info!(count = self.pending.len(), "Using pending destinations from the store");
            }
        }
        Ok(())
    }

    pub(crate) async fn warm_last_sent(&mut self, records: &Records) -> StoreResult<()> {
        if self.last_sent.is_empty() {
            self.last_sent = records.load_last_sent().await?;
            if !self.last_sent.is_empty() {
                info!(
                    count = self.last_sent.destinations.len(),
                    "Using last sent list from the store"
                );
            }
        }
        Ok(())
    }
}
