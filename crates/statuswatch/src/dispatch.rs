//! Per-cycle fan-out of notices to destinations.
//!
//! A [`FanOut`] lives for exactly one cycle. It remembers which destinations
//! were verified, which turned out invalid and which were reached, so later
//! updates in the same cycle never retry an invalid destination. Registry
//! removals for invalid destinations run as background tasks that
//! [`FanOut::finish`] joins before the cycle persists anything.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use notify::{ChannelError, DestinationChannel, IncidentNotice};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::store::Records;

/// Result of one delivery attempt to one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Notice posted.
    Delivered,
    /// Destination is gone or lacks the capability to receive notices.
    Invalid,
    /// Transient failure; the destination stays registered.
    Failed(String),
}

/// Per-update tally.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: BTreeSet<u64>,
    pub invalid: BTreeSet<u64>,
    pub failed: BTreeSet<u64>,
}

/// Per-cycle tally.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanOutSummary {
    /// Destinations that received at least one notice.
    pub delivered: BTreeSet<u64>,
    pub invalid: BTreeSet<u64>,
    pub sends: usize,
    pub failures: usize,
}

/// Sends notices through a destination channel with bounded concurrency.
pub struct Dispatcher {
    channel: Arc<dyn DestinationChannel>,
    concurrency: usize,
}

impl Dispatcher {
    pub fn new(channel: Arc<dyn DestinationChannel>, concurrency: usize) -> Self {
        Self {
            channel,
            concurrency: concurrency.max(1),
        }
    }

    /// Start a fan-out scope for one cycle.
    pub fn fan_out(&self, records: Records) -> FanOut<'_> {
        FanOut {
            dispatcher: self,
            records,
            verified: HashSet::new(),
            summary: FanOutSummary::default(),
            removals: JoinSet::new(),
        }
    }

    async fn attempt(
        &self,
        destination_id: u64,
        verified: bool,
        notice: &IncidentNotice,
    ) -> DeliveryOutcome {
        if !verified {
            match self.channel.inspect(destination_id).await {
                Ok(access) if access.can_deliver() => {}
                Ok(access) => {
                    info!(destination_id, ?access, "Destination cannot receive notices");
                    return DeliveryOutcome::Invalid;
                }
                Err(e) => return DeliveryOutcome::Failed(e.to_string()),
            }
        }

        match self.channel.send(destination_id, notice).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) if e.is_permanent() => {
                info!(destination_id, error = %e, "Destination rejected notice");
                DeliveryOutcome::Invalid
            }
            Err(ChannelError::RateLimited { retry_after_secs }) => DeliveryOutcome::Failed(
                format!("rate limited, retry after {retry_after_secs}s"),
            ),
            Err(e) => DeliveryOutcome::Failed(e.to_string()),
        }
    }
}

/// Fan-out scope for a single cycle.
pub struct FanOut<'a> {
    dispatcher: &'a Dispatcher,
    records: Records,
    verified: HashSet<u64>,
    summary: FanOutSummary,
    removals: JoinSet<()>,
}

impl FanOut<'_> {
    /// Whether a destination was found invalid earlier in this cycle.
    pub fn is_invalid(&self, destination_id: u64) -> bool {
        self.summary.invalid.contains(&destination_id)
    }

    /// Deliver one notice to every recipient, concurrently. Returns once
    /// every attempt has completed.
    pub async fn deliver(&mut self, notice: &IncidentNotice, recipients: &[u64]) -> DeliveryReport {
        let dispatcher = self.dispatcher;
        let verified = &self.verified;
        let outcomes: Vec<(u64, DeliveryOutcome)> = stream::iter(
            recipients
                .iter()
                .copied()
                .filter(|id| !self.summary.invalid.contains(id)),
        )
        .map(|id| {
            let already_verified = verified.contains(&id);
            async move { (id, dispatcher.attempt(id, already_verified, notice).await) }
        })
        .buffer_unordered(dispatcher.concurrency)
        .collect()
        .await;

        let mut report = DeliveryReport::default();
        for (id, outcome) in outcomes {
            match outcome {
                DeliveryOutcome::Delivered => {
                    debug!(destination_id = id, update_id = %notice.update_id, "Posted notice");
                    self.verified.insert(id);
                    self.summary.delivered.insert(id);
                    self.summary.sends += 1;
                    report.delivered.insert(id);
                }
                DeliveryOutcome::Invalid => {
                    self.mark_invalid(id);
                    report.invalid.insert(id);
                }
                DeliveryOutcome::Failed(reason) => {
                    warn!(
                        destination_id = id,
                        update_id = %notice.update_id,
                        error = %reason,
                        "Failed to post notice"
                    );
                    self.summary.failures += 1;
                    report.failed.insert(id);
                }
            }
        }
        report
    }

    fn mark_invalid(&mut self, destination_id: u64) {
        if !self.summary.invalid.insert(destination_id) {
            return;
        }
        let records = self.records.clone();
        self.removals.spawn(async move {
            match records.remove_destination(destination_id).await {
                Ok(Some(sub)) => {
                    info!(
                        destination_id,
                        guild_id = sub.guild_id,
                        "Invalid destination has been removed"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(destination_id, error = %e, "Failed to remove invalid destination");
                }
            }
        });
    }

    /// Wait for every scheduled removal and return the cycle tally.
    pub async fn finish(mut self) -> FanOutSummary {
        while let Some(result) = self.removals.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Destination removal task failed");
            }
        }
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::{notice, RecordingChannel};

    async fn setup(channel: Arc<RecordingChannel>) -> (Records, Dispatcher) {
        let records = Records::new(Arc::new(MemoryStore::new()));
        for (guild, dest) in [(1, 10), (2, 20), (3, 30)] {
            records.set_guild_destination(guild, dest).await.unwrap();
        }
        (records, Dispatcher::new(channel, 4))
    }

    #[tokio::test]
    async fn test_deliver_reports_each_outcome() {
        let channel = Arc::new(RecordingChannel::new());
        channel.deny(20);
        channel.fail_sends_to(30);
        let (records, dispatcher) = setup(channel.clone()).await;

        let mut fan_out = dispatcher.fan_out(records.clone());
        let report = fan_out.deliver(&notice("u1"), &[10, 20, 30]).await;

        assert_eq!(report.delivered, BTreeSet::from([10]));
        assert_eq!(report.invalid, BTreeSet::from([20]));
        assert_eq!(report.failed, BTreeSet::from([30]));

        let summary = fan_out.finish().await;
        assert_eq!(summary.sends, 1);
        assert_eq!(summary.failures, 1);
        assert_eq!(
            records.destination_ids().await.unwrap(),
            BTreeSet::from([10, 30])
        );
    }

    #[tokio::test]
    async fn test_invalid_destination_not_retried_in_cycle() {
        let channel = Arc::new(RecordingChannel::new());
        channel.deny(20);
        let (records, dispatcher) = setup(channel.clone()).await;

        let mut fan_out = dispatcher.fan_out(records);
        fan_out.deliver(&notice("u1"), &[10, 20]).await;
        assert!(fan_out.is_invalid(20));
        let second = fan_out.deliver(&notice("u2"), &[10, 20]).await;
        fan_out.finish().await;

        assert_eq!(second.delivered, BTreeSet::from([10]));
        assert!(second.invalid.is_empty());
        assert_eq!(channel.inspections(20), 1);
    }

    #[tokio::test]
    async fn test_destination_inspected_once_per_cycle() {
        let channel = Arc::new(RecordingChannel::new());
        let (records, dispatcher) = setup(channel.clone()).await;

        let mut fan_out = dispatcher.fan_out(records);
        fan_out.deliver(&notice("u1"), &[10]).await;
        fan_out.deliver(&notice("u2"), &[10]).await;
        fan_out.finish().await;

        assert_eq!(channel.inspections(10), 1);
        assert_eq!(channel.sent_to(10), ["u1", "u2"]);
    }

    #[tokio::test]
    async fn test_send_rejection_marks_invalid() {
        let channel = Arc::new(RecordingChannel::new());
        channel.vanish_on_send(10);
        let (records, dispatcher) = setup(channel.clone()).await;

        let mut fan_out = dispatcher.fan_out(records.clone());
        let report = fan_out.deliver(&notice("u1"), &[10]).await;
        fan_out.finish().await;

        assert_eq!(report.invalid, BTreeSet::from([10]));
        assert!(!records.destination_ids().await.unwrap().contains(&10));
    }
}
