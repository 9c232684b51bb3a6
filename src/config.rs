//! Configuration and limits for WebSocket connections.

use std::time::Duration;

/// Resource limits for a single connection.
///
/// These bound the memory a peer can pin by sending bytes that never
/// complete a handshake or a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of unconsumed inbound bytes.
    ///
    /// Exceeding it after frame extraction closes the connection with 1009.
    /// Before the handshake completes, it also bounds the header block.
    ///
    /// Default: 2 MB (2 * 1024 * 1024)
    pub max_buffer_length: usize,

    /// Maximum size of handshake data in bytes.
    ///
    /// Applied together with `max_buffer_length`; the smaller one wins.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_buffer_length: 2 * 1024 * 1024,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(max_buffer_length: usize, max_handshake_size: usize) -> Self {
        Self {
            max_buffer_length,
            max_handshake_size,
        }
    }

    /// Effective limit on buffered bytes while the handshake is in progress.
    #[must_use]
    pub const fn handshake_limit(&self) -> usize {
        if self.max_handshake_size < self.max_buffer_length {
            self.max_handshake_size
        } else {
            self.max_buffer_length
        }
    }

    /// Validate that the unconsumed buffer is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooBig`](crate::Error::MessageTooBig) if `size` exceeds `max_buffer_length`.
    pub const fn check_buffer_length(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_buffer_length {
            Err(crate::Error::MessageTooBig {
                size,
                max: self.max_buffer_length,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`](crate::Error::HandshakeTooLarge) if `size` exceeds the handshake limit.
    pub const fn check_handshake_size(&self, size: usize) -> Result<(), crate::Error> {
        let max = self.handshake_limit();
        if size > max {
            Err(crate::Error::HandshakeTooLarge { size, max })
        } else {
            Ok(())
        }
    }
}

/// Timeout configuration, enforced by the async transport.
///
/// The engine itself never looks at the clock; these feed
/// [`Connection::timed_out`](crate::connection::Connection::timed_out).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum time to complete the opening handshake.
    ///
    /// Default: 30 seconds
    pub handshake: Duration,

    /// Maximum time an open connection may go without receiving bytes.
    ///
    /// Default: 300 seconds (5 minutes)
    pub idle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(30),
            idle: Duration::from_secs(300),
        }
    }
}

impl Timeouts {
    /// Create new timeouts with custom values.
    #[must_use]
    pub const fn new(handshake: Duration, idle: Duration) -> Self {
        Self { handshake, idle }
    }
}

/// WebSocket connection configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Sub-protocol to announce in the handshake.
    ///
    /// Servers echo it as `Sec-WebSocket-Protocol`; clients request it.
    /// Default: None
    pub protocol: Option<String>,

    /// Timeout configuration.
    ///
    /// If `None`, no deadlines are enforced (the host must impose its own).
    /// Default: None
    pub timeouts: Option<Timeouts>,
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the maximum unconsumed buffer length.
    #[must_use]
    pub fn with_max_buffer_length(mut self, size: usize) -> Self {
        self.limits.max_buffer_length = size;
        self
    }

    /// Set the sub-protocol announced during the handshake.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Set timeout configuration.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Configuration for the server role.
    #[must_use]
    pub fn server() -> Self {
        Self::default()
    }

    /// Configuration for the client role.
    #[must_use]
    pub fn client() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_limits_default() {
        let limits = Limits::default();
        assert_eq!(limits.max_buffer_length, 2 * 1024 * 1024);
        assert_eq!(limits.max_handshake_size, 8192);
    }

    #[test]
    fn test_handshake_limit_uses_smaller_bound() {
        assert_eq!(Limits::new(100, 8192).handshake_limit(), 100);
        assert_eq!(Limits::new(1 << 20, 8192).handshake_limit(), 8192);
    }

    #[test]
    fn test_limits_check_buffer_length() {
        let limits = Limits::new(1024, 512);
        assert!(limits.check_buffer_length(1024).is_ok());
        assert_eq!(
            limits.check_buffer_length(1025),
            Err(Error::MessageTooBig {
                size: 1025,
                max: 1024
            })
        );
    }

    #[test]
    fn test_limits_check_handshake_size() {
        let limits = Limits::default();
        assert!(limits.check_handshake_size(1024).is_ok());
        assert!(matches!(
            limits.check_handshake_size(10000),
            Err(Error::HandshakeTooLarge { max: 8192, .. })
        ));
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new()
            .with_limits(Limits::new(64 * 1024, 4096))
            .with_protocol("chat");

        assert_eq!(config.limits.max_buffer_length, 64 * 1024);
        assert_eq!(config.protocol.as_deref(), Some("chat"));
    }

    #[test]
    fn test_config_with_max_buffer_length() {
        let config = Config::server().with_max_buffer_length(4096);
        assert_eq!(config.limits.max_buffer_length, 4096);
        assert_eq!(config.limits.max_handshake_size, 8192);
    }

    #[test]
    fn test_timeouts_default() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.handshake, Duration::from_secs(30));
        assert_eq!(timeouts.idle, Duration::from_secs(300));
    }

    #[test]
    fn test_config_with_timeouts() {
        let timeouts = Timeouts::new(Duration::from_secs(1), Duration::from_secs(2));
        let config = Config::new().with_timeouts(timeouts.clone());
        assert_eq!(config.timeouts, Some(timeouts));
    }

    #[test]
    fn test_config_defaults_are_empty() {
        let config = Config::default();
        assert!(config.timeouts.is_none());
        assert!(config.protocol.is_none());
    }
}
