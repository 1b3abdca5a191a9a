//! Remote status source.

mod statuspage;
mod types;

pub use statuspage::{StatuspageClient, INCIDENTS_PATH, USER_AGENT};
pub use types::{
    Component, Incident, IncidentUpdate, IncidentsResponse, MetricSummary, MetricsResponse,
};

use async_trait::async_trait;

use crate::error::FeedError;

/// Read-only view of the status page.
#[async_trait]
pub trait IncidentFeed: Send + Sync {
    /// Recent incidents, newest first as the source serves them.
    async fn fetch_incidents(&self) -> Result<Vec<Incident>, FeedError>;

    /// Mean API latency in milliseconds.
    async fn fetch_latency_metric(&self) -> Result<f64, FeedError>;
}
