//! Opening handshake: the HTTP/1.1 Upgrade exchange.
//!
//! The server side parses and validates the client's `GET` request and
//! answers with `101 Switching Protocols`; the client side builds the
//! request and checks the server's `Sec-WebSocket-Accept`.

use crate::error::{Error, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// The GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Response written back when a handshake is rejected.
pub const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

/// Marks the end of the header block.
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Headers that must not appear twice in a request.
const SECURITY_HEADERS: [&str; 5] = [
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// Locate the end of the header block.
///
/// Returns the number of bytes up to and including the blank line, or `None`
/// if the terminator has not arrived yet.
#[must_use]
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
}

/// Parse `name: value` lines into a map keyed by lowercase name.
///
/// Lines without a colon are skipped. When `security_headers` is given, a
/// repeated security-critical header is rejected.
fn parse_headers<'a, I>(
    lines: I,
    security_headers: Option<&[&str]>,
) -> Result<HashMap<String, String>>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers: HashMap<String, String> = HashMap::new();

    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name_lower = name.trim().to_ascii_lowercase();

        if let Some(sec_headers) = security_headers {
            if sec_headers.contains(&name_lower.as_str()) && headers.contains_key(&name_lower) {
                return Err(Error::InvalidHandshake(format!(
                    "Duplicate header: {}",
                    name.trim()
                )));
            }
        }

        headers.insert(name_lower, value.trim().to_string());
    }

    Ok(headers)
}

/// Whether a comma-separated header value contains `token`, ignoring case.
fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}

/// Check the `Upgrade` and `Connection` headers shared by requests and responses.
fn validate_upgrade_headers(headers: &HashMap<String, String>) -> Result<()> {
    let upgrade = headers
        .get("upgrade")
        .ok_or_else(|| Error::InvalidHandshake("Missing Upgrade header".into()))?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::InvalidHandshake(format!(
            "Invalid Upgrade header: {}",
            upgrade
        )));
    }

    let connection = headers
        .get("connection")
        .ok_or_else(|| Error::InvalidHandshake("Missing Connection header".into()))?;
    if !has_token(connection, "upgrade") {
        return Err(Error::InvalidHandshake(format!(
            "Invalid Connection header: {}",
            connection
        )));
    }
    Ok(())
}

/// Reject header values containing CR or LF.
fn validate_header_value(header_name: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::InvalidHeaderValue {
            header: header_name.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

/// Parse `GET <path> HTTP/<d>.<d>`, method case-insensitive. Returns the path.
fn parse_request_line(line: &str) -> Result<&str> {
    let invalid = || Error::InvalidHandshake(format!("Invalid request line: {}", line));

    let (method, rest) = line.split_once(' ').ok_or_else(invalid)?;
    let (path, version) = rest.rsplit_once(' ').ok_or_else(invalid)?;

    if !method.eq_ignore_ascii_case("GET") {
        return Err(Error::InvalidHandshake(format!(
            "Expected GET method, got {}",
            method
        )));
    }
    if path.is_empty() {
        return Err(invalid());
    }

    let version = version.as_bytes();
    let well_formed = version.len() == 8
        && version[..5].eq_ignore_ascii_case(b"HTTP/")
        && version[5].is_ascii_digit()
        && version[6] == b'.'
        && version[7].is_ascii_digit();
    if !well_formed {
        return Err(invalid());
    }

    Ok(path)
}

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsengine::protocol::handshake::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Generate a fresh `Sec-WebSocket-Key`: 16 random bytes, base64-encoded.
#[must_use]
pub fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    if getrandom::getrandom(&mut nonce).is_err() {
        use crate::protocol::mask::{MaskSource, RandomMask};
        let mut source = RandomMask::new();
        for chunk in nonce.chunks_mut(4) {
            chunk.copy_from_slice(&source.next_mask());
        }
    }
    BASE64.encode(nonce)
}

/// Client upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Request target, e.g. `/chat`.
    pub path: String,
    /// Every header, keyed by lowercase name.
    pub headers: HashMap<String, String>,
    /// The `Sec-WebSocket-Key` value.
    pub key: String,
    /// Sub-protocols offered by the client, in order.
    pub protocols: Vec<String>,
}

impl HandshakeRequest {
    /// Build the request a client sends.
    #[must_use]
    pub fn new(host: &str, path: &str, key: impl Into<String>) -> Self {
        let key = key.into();
        let mut headers = HashMap::new();
        headers.insert("host".to_string(), host.to_string());
        headers.insert("upgrade".to_string(), "websocket".to_string());
        headers.insert("connection".to_string(), "Upgrade".to_string());
        headers.insert("sec-websocket-key".to_string(), key.clone());
        headers.insert("sec-websocket-version".to_string(), "13".to_string());
        Self {
            path: path.to_string(),
            headers,
            key,
            protocols: Vec::new(),
        }
    }

    /// Offer a sub-protocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Parse and validate a request header block (request line through blank line).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - the data is not UTF-8 or the request line is not `GET <path> HTTP/<d>.<d>`
    /// - `Upgrade` is not `websocket` or `Connection` lacks the `upgrade` token
    /// - `Sec-WebSocket-Version` is not `13`
    /// - `Sec-WebSocket-Key` is missing, or a security header is duplicated
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;

        let mut lines = text.split("\r\n");
        let request_line = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| Error::InvalidHandshake("Empty request".into()))?;
        let path = parse_request_line(request_line)?.to_string();

        let headers = parse_headers(lines, Some(&SECURITY_HEADERS))?;
        validate_upgrade_headers(&headers)?;

        match headers.get("sec-websocket-version") {
            Some(version) if version == "13" => {}
            Some(version) => {
                return Err(Error::InvalidHandshake(format!(
                    "Unsupported WebSocket version: {} (expected 13)",
                    version
                )));
            }
            None => {
                return Err(Error::InvalidHandshake(
                    "Missing Sec-WebSocket-Version header".into(),
                ));
            }
        }

        let key = headers
            .get("sec-websocket-key")
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Key header".into()))?
            .clone();

        let protocols = headers
            .get("sec-websocket-protocol")
            .map(|p| p.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        Ok(Self {
            path,
            headers,
            key,
            protocols,
        })
    }

    /// Serialize the request.
    ///
    /// # Errors
    /// Returns `Error::InvalidHeaderValue` if the path, host or a protocol contains CR/LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        validate_header_value("Request-Target", &self.path)?;
        let host = self.headers.get("host").map(String::as_str).unwrap_or("");
        validate_header_value("Host", host)?;

        buf.extend_from_slice(format!("GET {} HTTP/1.1\r\n", self.path).as_bytes());
        buf.extend_from_slice(format!("Host: {}\r\n", host).as_bytes());
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Key: {}\r\n", self.key).as_bytes());
        buf.extend_from_slice(b"Sec-WebSocket-Version: 13\r\n");
        if !self.protocols.is_empty() {
            let joined = self.protocols.join(", ");
            validate_header_value("Sec-WebSocket-Protocol", &joined)?;
            buf.extend_from_slice(format!("Sec-WebSocket-Protocol: {}\r\n", joined).as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        Ok(())
    }
}

/// Server `101 Switching Protocols` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// The Sec-WebSocket-Accept value.
    pub accept: String,
    /// The selected Sec-WebSocket-Protocol, if any.
    pub protocol: Option<String>,
    /// Headers of a parsed response, keyed by lowercase name. Empty when built locally.
    pub headers: HashMap<String, String>,
}

impl HandshakeResponse {
    /// Build the response to a validated request.
    #[must_use]
    pub fn from_request(req: &HandshakeRequest, protocol: Option<&str>) -> Self {
        Self {
            accept: compute_accept_key(&req.key),
            protocol: protocol.map(str::to_string),
            headers: HashMap::new(),
        }
    }

    /// Write the HTTP response to a buffer.
    ///
    /// # Errors
    /// Returns `Error::InvalidHeaderValue` if the protocol contains CR/LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Accept: {}\r\n", self.accept).as_bytes());

        if let Some(ref proto) = self.protocol {
            validate_header_value("Sec-WebSocket-Protocol", proto)?;
            buf.extend_from_slice(format!("Sec-WebSocket-Protocol: {}\r\n", proto).as_bytes());
        }

        buf.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Parse a response header block received by a client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the status is not `101`, the
    /// Upgrade/Connection headers are wrong, or `Sec-WebSocket-Accept` is missing.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;

        let mut lines = text.split("\r\n");
        let status_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;

        let mut parts = status_line.split(' ');
        let version_ok = parts
            .next()
            .is_some_and(|v| v.len() == 8 && v.as_bytes()[..5].eq_ignore_ascii_case(b"HTTP/"));
        if !version_ok || parts.next() != Some("101") {
            return Err(Error::InvalidHandshake(format!(
                "Expected 101 status, got: {}",
                status_line
            )));
        }

        let headers = parse_headers(lines, None)?;
        validate_upgrade_headers(&headers)?;

        let accept = headers
            .get("sec-websocket-accept")
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Accept header".into()))?
            .clone();

        Ok(Self {
            accept,
            protocol: headers.get("sec-websocket-protocol").cloned(),
            headers,
        })
    }

    /// Check that the server answered the key we sent.
    ///
    /// # Errors
    /// Returns `Error::InvalidHandshake` on mismatch.
    pub fn verify(&self, key: &str) -> Result<()> {
        if self.accept == compute_accept_key(key) {
            Ok(())
        } else {
            Err(Error::InvalidHandshake(format!(
                "Sec-WebSocket-Accept mismatch: {}",
                self.accept
            )))
        }
    }
}
