//! Connection lifecycle states.

/// Lifecycle state of a [`Connection`](super::Connection).
///
/// Transitions only move forward: `Connecting -> Open -> Closing -> Closed`,
/// with `Connecting -> Closed` and `Open -> Closed` as shortcuts. A connection
/// never re-enters `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Waiting for the opening handshake to complete.
    #[default]
    Connecting,
    /// Handshake done; data frames flow both ways.
    Open,
    /// We sent a close frame and wait for the peer's.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Anything but `Closed`.
    #[must_use]
    #[inline]
    pub const fn is_active(&self) -> bool {
        !matches!(self, ConnectionState::Closed)
    }

    /// Application data may only be sent while `Open`.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Frames are decoded while `Open` or `Closing`.
    #[must_use]
    #[inline]
    pub const fn can_receive(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Closing)
    }

    /// Lowercase name, used as a log field.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
