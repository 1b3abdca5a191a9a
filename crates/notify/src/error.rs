//! Error types for the notification system.

use thiserror::Error;

/// Errors that can occur when talking to a destination channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Channel is not configured
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Rate limited by the service
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The destination no longer exists on the platform
    #[error("Destination {0} not found")]
    NotFound(u64),

    /// The platform refused access to the destination
    #[error("Access to destination {0} is forbidden")]
    Forbidden(u64),

    /// Unexpected response status
    #[error("Platform returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ChannelError {
    /// Whether this error means the destination is permanently unusable
    /// (as opposed to a transient transport or platform failure).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Forbidden(_))
    }
}
