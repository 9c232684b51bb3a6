//! Error types for the WebSocket protocol engine.
//!
//! Every failure the engine can report is a variant of [`Error`]. Handshake
//! and framing errors are terminal for the connection that produced them;
//! misuse errors (sending on a connection that is not open) are local and
//! leave the connection untouched.

use thiserror::Error;

use crate::message::CloseCode;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Handshake header block grew past the limit before its terminator arrived.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes buffered so far.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Invalid WebSocket handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Not enough bytes buffered to decode a whole frame.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Reserved bits set without extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Control frame fragmented.
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Declared payload length does not fit in `usize` or has the top bit set.
    #[error("Payload too large for platform: {size} bytes (max: {max})")]
    PayloadTooLargeForPlatform {
        /// Declared payload length.
        size: u64,
        /// Largest representable length.
        max: u64,
    },

    /// Invalid UTF-8 in a text message.
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Unconsumed inbound data exceeds the configured buffer limit.
    #[error("Message too big: {size} bytes buffered (max: {max})")]
    MessageTooBig {
        /// Bytes buffered.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Operation requires an open connection.
    #[error("You can't write to a non-open connection")]
    NotOpen,

    /// A text frame was sent while a binary stream is still open.
    #[error("You can't send a text frame until you finish sending binary frames")]
    BinarySendInProgress,

    /// A binary chunk was sent without a preceding `begin_binary`.
    #[error("No binary stream in progress")]
    NoBinarySendInProgress,

    /// A host-imposed handshake or idle deadline expired.
    #[error("Connection timed out")]
    Timeout,

    /// Outgoing header value contains characters that would break the request.
    #[error("Invalid header value for {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Connection has been closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Close code the engine sends when this error terminates an open connection.
    #[must_use]
    pub const fn close_code(&self) -> CloseCode {
        match self {
            Error::InvalidUtf8 => CloseCode::InvalidPayload,
            Error::MessageTooBig { .. } => CloseCode::MessageTooBig,
            _ => CloseCode::ProtocolError,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::MessageTooBig {
            size: 3_000_000,
            max: 2_097_152,
        };
        assert_eq!(
            err.to_string(),
            "Message too big: 3000000 bytes buffered (max: 2097152)"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let ws_err: Error = io_err.into();
        assert!(matches!(ws_err, Error::Io(_)));
    }

    #[test]
    fn test_close_codes() {
        assert_eq!(Error::InvalidUtf8.close_code(), CloseCode::InvalidPayload);
        assert_eq!(
            Error::MessageTooBig { size: 2, max: 1 }.close_code(),
            CloseCode::MessageTooBig
        );
        assert_eq!(Error::ReservedOpcode(3).close_code(), CloseCode::ProtocolError);
        assert_eq!(
            Error::ProtocolViolation("x".into()).close_code().as_u16(),
            1002
        );
    }

    #[test]
    fn test_misuse_messages() {
        assert_eq!(
            Error::NotOpen.to_string(),
            "You can't write to a non-open connection"
        );
        assert!(Error::BinarySendInProgress.to_string().contains("binary"));
    }
}
