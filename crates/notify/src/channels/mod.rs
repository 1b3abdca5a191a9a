//! Destination channel implementations.

pub mod discord;

use async_trait::async_trait;

use crate::capabilities::DestinationAccess;
use crate::error::ChannelError;
use crate::events::IncidentNotice;

/// Trait for platforms that host notification destinations (Discord, etc.).
#[async_trait]
pub trait DestinationChannel: Send + Sync {
    /// Get the name of this channel.
    fn name(&self) -> &'static str;

    /// Check if this channel is enabled/configured.
    fn enabled(&self) -> bool;

    /// Look up a destination and report what the bot may do there.
    ///
    /// A destination that no longer exists is `Ok(DestinationAccess::Missing)`;
    /// errors are reserved for transport or platform failures.
    async fn inspect(&self, destination_id: u64) -> Result<DestinationAccess, ChannelError>;

    /// Post a rendered incident notice to a destination.
    async fn send(&self, destination_id: u64, notice: &IncidentNotice)
        -> Result<(), ChannelError>;
}
