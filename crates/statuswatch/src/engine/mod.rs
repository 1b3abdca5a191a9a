//! Incident reconciliation engine.
//!
//! One cycle: fetch → diff against the watermark → fan out → finalize the
//! caches → persist. A fetch failure aborts before anything is touched. A
//! store failure aborts the rest of the cycle but leaves the in-memory caches
//! as they were so the next cycle reconciles from what was last persisted.

mod plan;
mod state;

pub use plan::{
    is_up_to_date, normalize_feed, plan_cycle, settle_watermark, Audience, CyclePlan, Delivery,
    FEED_WINDOW_SIZE,
};
pub use state::{ReconciliationState, SharedState};

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::CycleError;
use crate::feed::{Incident, IncidentFeed};
use crate::store::{Records, Watermark};

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// The feed listed no incidents.
    EmptyFeed,
    /// Nothing new and nobody pending; nothing dispatched or persisted.
    UpToDate,
    /// The diff was dispatched and the caches persisted.
    Reconciled,
}

/// Summary of one cycle, for logs and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    /// The watermark was seeded from the feed in this cycle.
    pub seeded: bool,
    pub stale: bool,
    pub scrolled_off: bool,
    /// Successful sends.
    pub sent: usize,
    /// Transient send failures.
    pub failed: usize,
    pub invalid: BTreeSet<u64>,
    pub watermark: Option<String>,
}

impl CycleReport {
    fn new(outcome: CycleOutcome) -> Self {
        Self {
            outcome,
            seeded: false,
            stale: false,
            scrolled_off: false,
            sent: 0,
            failed: 0,
            invalid: BTreeSet::new(),
            watermark: None,
        }
    }
}

/// Reconciles the feed against persisted state and dispatches the diff.
pub struct Engine {
    feed: Arc<dyn IncidentFeed>,
    records: Records,
    dispatcher: Dispatcher,
    window_size: usize,
}

impl Engine {
    pub fn new(feed: Arc<dyn IncidentFeed>, records: Records, dispatcher: Dispatcher) -> Self {
        Self {
            feed,
            records,
            dispatcher,
            window_size: FEED_WINDOW_SIZE,
        }
    }

    /// Override the feed window size.
    #[must_use]
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size.max(1);
        self
    }

    /// Run one reconciliation cycle against `state`.
    ///
    /// The caller must hold the single-flight lock for the whole call.
    pub async fn run_cycle(
        &self,
        state: &mut ReconciliationState,
    ) -> Result<CycleReport, CycleError> {
        debug!("Handling updates");
        let incidents = normalize_feed(self.feed.fetch_incidents().await?, self.window_size);
        let Some(newest) = incidents.last() else {
            warn!("Feed listed no incidents");
            return Ok(CycleReport::new(CycleOutcome::EmptyFeed));
        };

        // Cache warm-up
        let mut seeded = false;
        state.warm_watermark(&self.records).await?;
        if state.watermark.is_none() {
            let seed = Watermark::new(
                newest.id.clone(),
                newest.update_ids().map(str::to_string).collect(),
            );
            info!(incident_id = %seed.incident_id, "Seeding watermark from the feed");
            self.records.save_watermark(&seed).await?;
            state.watermark = Some(seed);
            seeded = true;
        }
        state.warm_pending(&self.records).await?;

        let watermark = state.watermark.clone().unwrap_or_default();
        if state.pending.is_empty() && is_up_to_date(&incidents, &watermark) {
            debug!(incident_id = %watermark.incident_id, "Already up-to-date");
            let mut report = CycleReport::new(CycleOutcome::UpToDate);
            report.seeded = seeded;
            report.watermark = Some(watermark.incident_id);
            return Ok(report);
        }

        state.warm_last_sent(&self.records).await?;

        let plan = plan_cycle(&incidents, &watermark, !state.pending.is_empty());
        if plan.scrolled_off {
            warn!(
                previous = %watermark.incident_id,
                replayed = incidents.len(),
                "Watermark left the feed window, delivering every retained incident"
            );
        }
        if plan.stale {
            info!(
                previous = %watermark.incident_id,
                newest = %plan.target.incident_id,
                scrolled_off = plan.scrolled_off,
                "Watermark is stale, pruning last sent list"
            );
            // Entries for updates still in play guard against duplicates.
            let in_play: BTreeSet<&str> = incidents[plan.resume_from..]
                .iter()
                .flat_map(Incident::update_ids)
                .collect();
            if state.last_sent.retain_updates(|id| in_play.contains(id)) {
                self.records.save_last_sent(&state.last_sent).await?;
            }
        }

        let registry = self.records.destination_ids().await?;
        let newest_update_ids: Vec<String> = newest.update_ids().map(str::to_string).collect();

        let mut fan_out = self.dispatcher.fan_out(self.records.clone());
        let mut ledger_changed = false;
        let mut incomplete: BTreeSet<String> = BTreeSet::new();

        for delivery in &plan.deliveries {
            let update_id = delivery.notice.update_id.as_str();
            let candidates = registry.iter().copied().filter(|id| match delivery.audience {
                Audience::Everyone => true,
                Audience::PendingOnly => state.pending.contains(id),
            });
            let recipients: Vec<u64> = candidates
                .filter(|id| {
                    !fan_out.is_invalid(*id) && !state.last_sent.received(update_id, *id)
                })
                .collect();
            if recipients.is_empty() {
                continue;
            }

            let report = fan_out.deliver(&delivery.notice, &recipients).await;
            if !report.delivered.is_empty() {
                state.last_sent.record(update_id, report.delivered);
                ledger_changed = true;
            }
            if !report.failed.is_empty() && delivery.audience == Audience::Everyone {
                incomplete.insert(update_id.to_string());
            }
        }

        // Removals must land before anything is persisted.
        let summary = fan_out.finish().await;

        if ledger_changed {
            self.records.save_last_sent(&state.last_sent).await?;
        }

        let pending_before = state.pending.len();
        let last_sent = &state.last_sent;
        state.pending.retain(|id| {
            registry.contains(id)
                && !summary.invalid.contains(id)
                && !last_sent.holds_all(*id, newest_update_ids.iter().map(String::as_str))
        });
        if state.pending.len() != pending_before {
            self.records.save_pending(&state.pending).await?;
        }

        let target = settle_watermark(&incidents, &plan, &incomplete);
        if target.incident_id != plan.target.incident_id {
            info!(
                incident_id = %target.incident_id,
                incomplete = incomplete.len(),
                "Holding watermark until failed updates are delivered"
            );
        }
        self.records.save_watermark(&target).await?;
        state.watermark = Some(target);

        let report = CycleReport {
            outcome: CycleOutcome::Reconciled,
            seeded,
            stale: plan.stale,
            scrolled_off: plan.scrolled_off,
            sent: summary.sends,
            failed: summary.failures,
            invalid: summary.invalid,
            watermark: state.watermark.as_ref().map(|w| w.incident_id.clone()),
        };
        info!(
            sent = report.sent,
            failed = report.failed,
            invalid = report.invalid.len(),
            pending = state.pending.len(),
            "Updates are handled"
        );
        Ok(report)
    }
}
