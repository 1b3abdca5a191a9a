//! Capability bits and the result of inspecting a destination.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Permission bit set as used by the chat platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Permissions(u64);

impl Permissions {
    pub const NONE: Self = Self(0);
    pub const ADMINISTRATOR: Self = Self(1 << 3);
    pub const MANAGE_CHANNELS: Self = Self(1 << 4);
    pub const VIEW_CHANNEL: Self = Self(1 << 10);
    pub const SEND_MESSAGES: Self = Self(1 << 11);
    pub const EMBED_LINKS: Self = Self(1 << 14);
    pub const ALL: Self = Self(u64::MAX);

    /// Minimum set a destination must grant before anything is posted to it.
    pub const DELIVERY: Self =
        Self(Self::VIEW_CHANNEL.0 | Self::SEND_MESSAGES.0 | Self::EMBED_LINKS.0);

    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Whether every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Parse the decimal string form the platform serializes bit sets as.
    ///
    /// Malformed values are treated as an empty set.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self(raw.trim().parse().unwrap_or(0))
    }

    /// Apply a deny/allow overwrite pair, deny first.
    #[must_use]
    pub const fn overwrite(self, allow: Self, deny: Self) -> Self {
        Self((self.0 & !deny.0) | allow.0)
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permissions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Permissions {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for Permissions {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the bot can do in a destination, as observed right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationAccess {
    /// The destination does not exist or cannot be seen at all.
    Missing,
    /// The destination exists but is not a kind that accepts notices.
    UnsupportedKind,
    /// The destination exists; these are the bot's effective permissions.
    Granted(Permissions),
}

impl DestinationAccess {
    /// Whether a notice may be posted here.
    #[must_use]
    pub const fn can_deliver(&self) -> bool {
        match self {
            Self::Granted(perms) => {
                perms.contains(Permissions::ADMINISTRATOR) || perms.contains(Permissions::DELIVERY)
            }
            Self::Missing | Self::UnsupportedKind => false,
        }
    }
}
