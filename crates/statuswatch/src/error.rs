//! Error types for the relay.

use notify::{ChannelError, DestinationAccess};
use thiserror::Error;

use crate::store::StoreError;

/// Failure to read the remote status source. Always transient: the cycle
/// that hit it is skipped and nothing is mutated.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Non-success HTTP status
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    /// Connection, TLS or timeout failure
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Body was not the expected JSON shape
    #[error("malformed response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
}

impl FeedError {
    /// HTTP status observed, if the server answered at all.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport { .. } | Self::Decode { .. } => None,
        }
    }
}

/// Errors that abort a single reconciliation cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("feed unavailable: {0}")]
    Fetch(#[from] FeedError),

    #[error("state store unavailable: {0}")]
    Persistence(#[from] StoreError),
}

/// Errors reported synchronously to whoever invoked a subscription command.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// Caller lacks the management capability on the destination
    #[error("caller must hold MANAGE_CHANNELS to change subscriptions")]
    MissingPermission,

    /// The bot cannot view, post or embed in the destination
    #[error("destination {destination_id} cannot receive notices ({access:?})")]
    DestinationUnusable {
        destination_id: u64,
        access: DestinationAccess,
    },

    /// No destination registered for the guild
    #[error("guild {0} has no destination")]
    NotSubscribed(u64),

    #[error("destination check failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("state store unavailable: {0}")]
    Persistence(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_error_status() {
        let err = FeedError::Status {
            endpoint: "/api/v2/incidents.json".to_string(),
            status: 503,
        };
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.to_string(), "/api/v2/incidents.json returned HTTP 503");

        let err = FeedError::Decode {
            endpoint: "/x".to_string(),
            reason: "eof".to_string(),
        };
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_cycle_error_from_feed() {
        let err: CycleError = FeedError::Status {
            endpoint: "/x".to_string(),
            status: 500,
        }
        .into();
        assert!(matches!(err, CycleError::Fetch(_)));
    }
}
