//! Subscription commands.
//!
//! Every operation takes the shared state lock, so it never interleaves with
//! a running cycle and the engine's in-memory caches stay authoritative.

use std::sync::Arc;

use notify::{DestinationChannel, Permissions};
use serde::Serialize;
use tracing::info;

use crate::engine::SharedState;
use crate::error::SubscriptionError;
use crate::store::Records;

/// Whoever invoked a subscription command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub permissions: Permissions,
}

impl Caller {
    #[must_use]
    pub const fn new(permissions: Permissions) -> Self {
        Self { permissions }
    }

    /// Local operator (CLI): allowed everything.
    #[must_use]
    pub const fn operator() -> Self {
        Self::new(Permissions::ADMINISTRATOR)
    }

    #[must_use]
    pub const fn can_manage(&self) -> bool {
        self.permissions.contains(Permissions::MANAGE_CHANNELS)
            || self.permissions.contains(Permissions::ADMINISTRATOR)
    }
}

/// Result of a successful subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Subscribed {
    pub guild_id: u64,
    pub destination_id: u64,
    /// Destination the guild pointed at before, if any.
    pub previous: Option<u64>,
}

pub struct SubscriptionService {
    records: Records,
    channel: Arc<dyn DestinationChannel>,
    state: SharedState,
}

impl SubscriptionService {
    pub fn new(records: Records, channel: Arc<dyn DestinationChannel>, state: SharedState) -> Self {
        Self {
            records,
            channel,
            state,
        }
    }

    /// Point a guild at a destination and queue the destination for a
    /// backfill of the current incident.
    pub async fn subscribe(
        &self,
        caller: &Caller,
        guild_id: u64,
        destination_id: u64,
    ) -> Result<Subscribed, SubscriptionError> {
        if !caller.can_manage() {
            return Err(SubscriptionError::MissingPermission);
        }

        let access = self.channel.inspect(destination_id).await?;
        if !access.can_deliver() {
            return Err(SubscriptionError::DestinationUnusable {
                destination_id,
                access,
            });
        }

        let mut state = self.state.lock().await;
        state.warm_pending(&self.records).await?;

        let previous = self
            .records
            .set_guild_destination(guild_id, destination_id)
            .await?;
        if let Some(old) = previous.filter(|old| *old != destination_id) {
            state.pending.remove(&old);
        }
        state.pending.insert(destination_id);
        self.records.save_pending(&state.pending).await?;

        info!(guild_id, destination_id, ?previous, "New channel for updates");
        Ok(Subscribed {
            guild_id,
            destination_id,
            previous,
        })
    }

    /// Remove a guild's destination. Returns the destination it pointed at.
    pub async fn unsubscribe(
        &self,
        caller: &Caller,
        guild_id: u64,
    ) -> Result<Option<u64>, SubscriptionError> {
        if !caller.can_manage() {
            return Err(SubscriptionError::MissingPermission);
        }

        let mut state = self.state.lock().await;
        let removed = self.records.remove_guild(guild_id).await?;
        if let Some(destination_id) = removed {
            state.warm_pending(&self.records).await?;
            if state.pending.remove(&destination_id) {
                self.records.save_pending(&state.pending).await?;
            }
            info!(guild_id, destination_id, "Removed status updates channel");
        }
        Ok(removed)
    }

    /// The destination no longer exists on the platform: forget it
    /// everywhere. Returns whether anything referenced it.
    pub async fn destination_deleted(&self, destination_id: u64) -> Result<bool, SubscriptionError> {
        let mut state = self.state.lock().await;
        state.warm_pending(&self.records).await?;
        state.warm_last_sent(&self.records).await?;

        let mut changed = false;
        if state.pending.remove(&destination_id) {
            self.records.save_pending(&state.pending).await?;
            info!(destination_id, "Deleted destination removed from the pending list");
            changed = true;
        }
        if state.last_sent.forget(destination_id) {
            self.records.save_last_sent(&state.last_sent).await?;
            info!(destination_id, "Deleted destination removed from the last sent list");
            changed = true;
        }
        if self.records.remove_destination(destination_id).await?.is_some() {
            changed = true;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ReconciliationState;
    use crate::store::{MemoryStore, Records};
    use crate::test_support::RecordingChannel;
    use std::collections::BTreeSet;

    fn setup() -> (SubscriptionService, Arc<RecordingChannel>, Records, SharedState) {
        let channel = Arc::new(RecordingChannel::new());
        let records = Records::new(Arc::new(MemoryStore::new()));
        let state = ReconciliationState::new().shared();
        let service = SubscriptionService::new(records.clone(), channel.clone(), state.clone());
        (service, channel, records, state)
    }

    fn manager() -> Caller {
        Caller::new(Permissions::MANAGE_CHANNELS)
    }

    #[test]
    fn test_caller_can_manage() {
        assert!(manager().can_manage());
        assert!(Caller::operator().can_manage());
        assert!(!Caller::new(Permissions::SEND_MESSAGES).can_manage());
    }

    #[tokio::test]
    async fn test_subscribe_registers_and_queues_backfill() {
        let (service, _channel, records, state) = setup();

        let result = service.subscribe(&manager(), 1, 10).await.unwrap();

        assert_eq!(result.previous, None);
        assert_eq!(records.destination_for_guild(1).await.unwrap(), Some(10));
        assert_eq!(records.load_pending().await.unwrap(), BTreeSet::from([10]));
        assert_eq!(*state.lock().await.pending(), BTreeSet::from([10]));
    }

    #[tokio::test]
    async fn test_subscribe_repoint_drops_old_pending() {
        let (service, _channel, records, _state) = setup();
        service.subscribe(&manager(), 1, 10).await.unwrap();

        let result = service.subscribe(&manager(), 1, 11).await.unwrap();

        assert_eq!(result.previous, Some(10));
        assert_eq!(records.load_pending().await.unwrap(), BTreeSet::from([11]));
        assert_eq!(records.destination_ids().await.unwrap(), BTreeSet::from([11]));
    }

    #[tokio::test]
    async fn test_subscribe_requires_permission() {
        let (service, _channel, records, _state) = setup();
        let caller = Caller::new(Permissions::VIEW_CHANNEL);

        let err = service.subscribe(&caller, 1, 10).await.unwrap_err();

        assert!(matches!(err, SubscriptionError::MissingPermission));
        assert!(records.subscriptions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_rejects_unusable_destination() {
        let (service, channel, records, _state) = setup();
        channel.deny(10);

        let err = service.subscribe(&manager(), 1, 10).await.unwrap_err();

        assert!(matches!(
            err,
            SubscriptionError::DestinationUnusable {
                destination_id: 10,
                ..
            }
        ));
        assert!(records.load_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_prunes_pending() {
        let (service, _channel, records, _state) = setup();
        service.subscribe(&manager(), 1, 10).await.unwrap();
        service.subscribe(&manager(), 2, 20).await.unwrap();

        let removed = service.unsubscribe(&manager(), 1).await.unwrap();

        assert_eq!(removed, Some(10));
        assert_eq!(records.load_pending().await.unwrap(), BTreeSet::from([20]));
        assert_eq!(service.unsubscribe(&manager(), 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_destination_deleted_prunes_caches() {
        let (service, _channel, records, state) = setup();
        service.subscribe(&manager(), 1, 10).await.unwrap();
        let mut ledger = records.load_last_sent().await.unwrap();
        ledger.record("u1", [10, 20]);
        records.save_last_sent(&ledger).await.unwrap();

        assert!(service.destination_deleted(10).await.unwrap());

        let stored = records.load_last_sent().await.unwrap();
        assert_eq!(stored.destinations, BTreeSet::from([20]));
        assert!(records.load_pending().await.unwrap().is_empty());
        assert!(records.subscriptions().await.unwrap().is_empty());
        assert!(!state.lock().await.last_sent().destinations.contains(&10));

        assert!(!service.destination_deleted(10).await.unwrap());
    }
}
