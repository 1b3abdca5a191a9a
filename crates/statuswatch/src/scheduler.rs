//! Fixed-interval cycle driver.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::engine::{CycleReport, Engine, SharedState};
use crate::error::CycleError;
use crate::feed::IncidentFeed;
use crate::presence::{latency_text, PresenceSink};

/// Drives reconciliation cycles on a timer.
///
/// Ticks run one after another on a single task and each cycle holds the
/// shared state lock, so two cycles never overlap. Ticks missed while a
/// slow cycle was running are skipped rather than bunched up.
pub struct Scheduler {
    engine: Arc<Engine>,
    feed: Arc<dyn IncidentFeed>,
    presence: Arc<dyn PresenceSink>,
    state: SharedState,
    interval: Duration,
}

impl Scheduler {
    pub fn new(
        engine: Arc<Engine>,
        feed: Arc<dyn IncidentFeed>,
        presence: Arc<dyn PresenceSink>,
        state: SharedState,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            feed,
            presence,
            state,
            interval,
        }
    }

    /// Refresh presence from the latency metric. Failures are logged only.
    pub async fn update_presence(&self) {
        match self.feed.fetch_latency_metric().await {
            Ok(mean) => {
                let text = latency_text(mean);
                debug!(presence = %text, "New presence");
                if let Err(e) = self.presence.publish(&text).await {
                    warn!(error = %e, "Failed to publish presence");
                }
            }
            Err(e) => warn!(error = %e, "Failed to fetch latency metric"),
        }
    }

    /// One tick: presence, then a reconciliation cycle under the lock.
    pub async fn tick(&self) -> Result<CycleReport, CycleError> {
        self.update_presence().await;
        let mut state = self.state.lock().await;
        self.engine.run_cycle(&mut state).await
    }

    /// Tick until `shutdown` resolves. The first tick fires immediately.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(interval_secs = self.interval.as_secs(), "Scheduler started");
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) => debug!(outcome = ?report.outcome, "Cycle finished"),
                        Err(CycleError::Fetch(e)) => {
                            warn!(error = %e, status = ?e.status(), "Skipping cycle, feed unavailable");
                        }
                        Err(e) => error!(error = %e, "Cycle aborted"),
                    }
                }
            }
        }
    }
}
