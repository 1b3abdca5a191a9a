//! Latency presence side effect.

use async_trait::async_trait;
use tracing::info;

/// Somewhere to publish the bot's visible status text.
#[async_trait]
pub trait PresenceSink: Send + Sync {
    async fn publish(&self, text: &str) -> anyhow::Result<()>;
}

/// Presence sink that only writes a log line.
///
/// Publishing a visible bot status needs a gateway session, which this relay
/// does not hold, so this is the only sink it ships. Embedders with a
/// gateway connection plug their own [`PresenceSink`] into the scheduler.
#[derive(Debug, Default)]
pub struct LogPresence;

#[async_trait]
impl PresenceSink for LogPresence {
    async fn publish(&self, text: &str) -> anyhow::Result<()> {
        info!(presence = text, "New presence");
        Ok(())
    }
}

/// Render a mean latency as presence text, e.g. `42ms`.
pub fn latency_text(mean_ms: f64) -> String {
    format!("{}ms", mean_ms.round() as i64)
}
