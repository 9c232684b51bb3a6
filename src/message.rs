//! Close status codes and close-frame payloads.

/// WebSocket close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// Normal closure (1000).
    #[default]
    Normal,
    /// Protocol error (1002). Malformed frame or sequencing violation.
    ProtocolError,
    /// No status received (1005). Never sent on the wire.
    NoStatus,
    /// Abnormal closure (1006). Never sent on the wire.
    Abnormal,
    /// Invalid payload (1007). Text message was not valid UTF-8.
    InvalidPayload,
    /// Message too big (1009). Unconsumed input exceeded the buffer limit.
    MessageTooBig,
    /// Any other code.
    Other(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1002 => CloseCode::ProtocolError,
            1005 => CloseCode::NoStatus,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1009 => CloseCode::MessageTooBig,
            other => CloseCode::Other(other),
        }
    }

    /// Numeric value of this close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::ProtocolError => 1002,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::MessageTooBig => 1009,
            CloseCode::Other(code) => *code,
        }
    }

    /// Codes that must never appear inside a close frame (1004-1006, 1015).
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        matches!(self.as_u16(), 1004..=1006 | 1015)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

/// Status code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The close status code.
    pub code: u16,
    /// Human-readable reason, possibly empty.
    pub reason: String,
}

impl CloseFrame {
    /// Create a new close frame with the given code and reason.
    #[must_use]
    pub fn new(code: impl Into<u16>, reason: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            reason: reason.into(),
        }
    }

    /// Interpret a received close payload.
    ///
    /// An empty payload means 1005 with an empty reason. A single byte cannot
    /// hold a status code and is reported as a protocol error (1002). The
    /// reason is decoded lossily; a close should always complete.
    #[must_use]
    pub fn from_payload(payload: &[u8]) -> Self {
        match payload {
            [] => Self::new(CloseCode::NoStatus, ""),
            [_] => Self::new(CloseCode::ProtocolError, ""),
            [hi, lo, reason @ ..] => Self::new(
                u16::from_be_bytes([*hi, *lo]),
                String::from_utf8_lossy(reason).into_owned(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_from_u16() {
        assert_eq!(CloseCode::from_u16(1000), CloseCode::Normal);
        assert_eq!(CloseCode::from_u16(1002), CloseCode::ProtocolError);
        assert_eq!(CloseCode::from_u16(1005), CloseCode::NoStatus);
        assert_eq!(CloseCode::from_u16(1006), CloseCode::Abnormal);
        assert_eq!(CloseCode::from_u16(1009), CloseCode::MessageTooBig);
        assert_eq!(CloseCode::from_u16(4000), CloseCode::Other(4000));
    }

    #[test]
    fn test_close_code_as_u16() {
        assert_eq!(CloseCode::Normal.as_u16(), 1000);
        assert_eq!(CloseCode::InvalidPayload.as_u16(), 1007);
        assert_eq!(CloseCode::Other(3500).as_u16(), 3500);
        assert_eq!(u16::from(CloseCode::MessageTooBig), 1009);
    }

    #[test]
    fn test_close_code_reserved() {
        assert!(CloseCode::NoStatus.is_reserved());
        assert!(CloseCode::Abnormal.is_reserved());
        assert!(CloseCode::Other(1015).is_reserved());
        assert!(!CloseCode::Normal.is_reserved());
        assert!(!CloseCode::Other(3000).is_reserved());
    }

    #[test]
    fn test_close_payload_empty_is_no_status() {
        let frame = CloseFrame::from_payload(&[]);
        assert_eq!(frame, CloseFrame::new(1005u16, ""));
    }

    #[test]
    fn test_close_payload_with_reason() {
        let frame = CloseFrame::from_payload(&[0x03, 0xe8, b'b', b'y', b'e']);
        assert_eq!(frame.code, 1000);
        assert_eq!(frame.reason, "bye");
    }

    #[test]
    fn test_close_payload_single_byte() {
        assert_eq!(CloseFrame::from_payload(&[0x03]).code, 1002);
    }
}
