//! Incident notices and destination channels for status-page relays.
//!
//! This crate renders incident updates into chat messages and delivers them
//! to destinations hosted on a chat platform. It knows nothing about which
//! updates are new or who has already received them; that bookkeeping lives
//! with the caller.
//!
//! # Usage
//!
//! ```no_run
//! use notify::{DestinationChannel, DiscordChannel, IncidentNotice};
//!
//! # async fn example(notice: IncidentNotice) -> Result<(), notify::ChannelError> {
//! let channel = DiscordChannel::from_env();
//!
//! if channel.inspect(1_234_567_890).await?.can_deliver() {
//!     channel.send(1_234_567_890, &notice).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! - `DISCORD_TOKEN` (or `TOKEN`): bot token, enables the Discord channel
//! - `DISCORD_API_URL`: REST base URL, defaults to the public v10 API
//!
//! # Architecture
//!
//! - [`DestinationChannel`] trait defines inspection and delivery
//! - [`DiscordChannel`] implements it over the Discord REST API
//! - [`DestinationAccess`] is the outcome of inspecting a destination

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod capabilities;
pub mod channels;
pub mod error;
pub mod events;

pub use capabilities::{DestinationAccess, Permissions};
pub use channels::discord::DiscordChannel;
pub use channels::DestinationChannel;
pub use error::ChannelError;
pub use events::{IncidentNotice, Severity};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_colors() {
        assert_eq!(Severity::Info.color(), 0x0058_65f2);
        assert_eq!(Severity::Warning.color(), 0x00f3_9c12);
        assert_eq!(Severity::Critical.color(), 0x00e7_4c3c);
    }

    #[test]
    fn test_channel_is_object_safe() {
        let channel: Box<dyn DestinationChannel> =
            Box::new(DiscordChannel::new(None, channels::discord::DEFAULT_API_URL));
        assert_eq!(channel.name(), "discord");
    }
}
