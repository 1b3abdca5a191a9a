//! Status-page incident relay.
//!
//! Polls a public status page on a fixed interval, works out which incident
//! updates have not been delivered yet and fans them out to every subscribed
//! destination channel.
//!
//! # Architecture
//!
//! - [`feed`]: fetches incidents and the latency metric
//! - [`store`]: durable records (watermark, sent ledger, pending set, registry)
//! - [`engine`]: the reconciliation cycle
//! - [`dispatch`]: per-cycle fan-out to destinations
//! - [`scheduler`]: fixed-interval, single-flight cycle driver
//! - [`subscriptions`]: subscribe / unsubscribe / destination-deleted
//! - [`server`]: admin HTTP API over the subscription operations

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod feed;
pub mod presence;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod subscriptions;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use dispatch::Dispatcher;
pub use engine::{CycleOutcome, CycleReport, Engine, ReconciliationState, SharedState};
pub use error::{CycleError, FeedError, SubscriptionError};
pub use feed::{IncidentFeed, StatuspageClient};
pub use presence::{LogPresence, PresenceSink};
pub use scheduler::Scheduler;
pub use store::{JsonFileStore, MemoryStore, Records, StateStore, StoreError};
pub use subscriptions::{Caller, SubscriptionService};
