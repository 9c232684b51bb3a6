use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::connection::buffer::InboundBuffer;
use crate::connection::event::{Event, Output};
use crate::connection::{ConnectionState, Role};
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame};
use crate::protocol::handshake::{self, BAD_REQUEST, HandshakeRequest, HandshakeResponse};
use crate::protocol::{Frame, MAX_CONTROL_FRAME_PAYLOAD, MaskSource, OpCode, RandomMask};

/// Room left for the reason once the 2-byte status code is in a close payload.
const MAX_CLOSE_REASON: usize = MAX_CONTROL_FRAME_PAYLOAD - 2;

const ABNORMAL_CLOSURE: u16 = CloseCode::Abnormal.as_u16();

/// A data message being reassembled from fragments.
#[derive(Debug)]
enum Fragment {
    Text(Vec<u8>),
    /// Binary messages are sequenced but not delivered; only the size is kept.
    Binary(usize),
}

impl Fragment {
    fn len(&self) -> usize {
        match self {
            Fragment::Text(bytes) => bytes.len(),
            Fragment::Binary(len) => *len,
        }
    }
}

/// Progress of an outbound binary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinarySend {
    Idle,
    /// `begin_binary` was called; the next chunk opens the message.
    Pending,
    Streaming,
}

/// The protocol state machine for one WebSocket connection.
///
/// `Connection` never touches a socket. Feed it bytes with
/// [`receive`](Self::receive), drive it with the send operations, and drain
/// [`poll_output`](Self::poll_output) (bytes to write, or a request to end the
/// transport) and [`poll_event`](Self::poll_event) (what the application
/// should see) after every call.
///
/// ```
/// use wsengine::connection::{Connection, Event, Output};
/// use wsengine::{Config, ConnectionState};
///
/// let mut conn = Connection::server(Config::server());
/// conn.receive(
///     b"GET /chat HTTP/1.1\r\n\
///       Upgrade: websocket\r\n\
///       Connection: Upgrade\r\n\
///       Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
///       Sec-WebSocket-Version: 13\r\n\r\n",
/// );
///
/// assert_eq!(conn.state(), ConnectionState::Open);
/// assert_eq!(conn.poll_event(), Some(Event::Connected));
/// assert!(matches!(conn.poll_output(), Some(Output::Write(_))));
/// ```
pub struct Connection {
    role: Role,
    state: ConnectionState,
    config: Config,
    inbound: InboundBuffer,
    fragment: Option<Fragment>,
    headers: HashMap<String, String>,
    host: String,
    path: String,
    protocol: Option<String>,
    client_key: Option<String>,
    binary_send: BinarySend,
    close_reported: bool,
    mask: Box<dyn MaskSource>,
    events: VecDeque<Event>,
    outputs: VecDeque<Output>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("path", &self.path)
            .field("buffered", &self.inbound.len())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create a connection in the `Connecting` state.
    ///
    /// A client built this way requests `/` from `localhost`; use
    /// [`Connection::client`] to choose the target.
    #[must_use]
    pub fn new(role: Role, config: Config) -> Self {
        let protocol = config.protocol.clone();
        Self {
            role,
            state: ConnectionState::Connecting,
            config,
            inbound: InboundBuffer::new(),
            fragment: None,
            headers: HashMap::new(),
            host: "localhost".to_string(),
            path: "/".to_string(),
            protocol,
            client_key: None,
            binary_send: BinarySend::Idle,
            close_reported: false,
            mask: Box::new(RandomMask::new()),
            events: VecDeque::new(),
            outputs: VecDeque::new(),
        }
    }

    /// Server side of an accepted stream.
    #[must_use]
    pub fn server(config: Config) -> Self {
        Self::new(Role::Server, config)
    }

    /// Client side, requesting `path` from `host`.
    #[must_use]
    pub fn client(host: &str, path: &str, config: Config) -> Self {
        let mut conn = Self::new(Role::Client, config);
        conn.host = host.to_string();
        conn.path = path.to_string();
        conn
    }

    /// Replace the source of client masking keys.
    #[must_use]
    pub fn with_mask_source(mut self, source: impl MaskSource + 'static) -> Self {
        self.mask = Box::new(source);
        self
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Request target: parsed from the request line on a server, requested on a client.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Handshake headers of the peer, keyed by lowercase name.
    ///
    /// Empty until the handshake has been parsed.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// The sub-protocol announced in the handshake, if any.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Set the sub-protocol. Only meaningful before the handshake completes.
    pub fn set_protocol(&mut self, protocol: impl Into<String>) {
        self.protocol = Some(protocol.into());
    }

    /// Bytes received but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.inbound.len()
    }

    /// Next queued application event.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Next queued transport action.
    pub fn poll_output(&mut self) -> Option<Output> {
        self.outputs.pop_front()
    }

    /// Begin the handshake. Clients queue their upgrade request; servers do nothing.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHeaderValue` if the host, path or protocol
    /// contains CR/LF. Nothing is written in that case.
    pub fn start(&mut self) -> Result<()> {
        if self.role != Role::Client
            || self.state != ConnectionState::Connecting
            || self.client_key.is_some()
        {
            return Ok(());
        }

        let key = handshake::generate_key();
        let mut request = HandshakeRequest::new(&self.host, &self.path, key.clone());
        if let Some(protocol) = &self.protocol {
            request = request.with_protocol(protocol.clone());
        }

        let mut buf = Vec::new();
        request.write(&mut buf)?;
        debug!(role = %self.role, path = %self.path, "sending upgrade request");
        self.outputs.push_back(Output::Write(Bytes::from(buf)));
        self.client_key = Some(key);
        Ok(())
    }

    /// Feed bytes read from the transport.
    pub fn receive(&mut self, data: &[u8]) {
        if self.state == ConnectionState::Closed {
            trace!(len = data.len(), "dropping bytes received after close");
            return;
        }
        self.inbound.extend(data);

        if self.state == ConnectionState::Connecting && !self.try_handshake() {
            return;
        }
        self.process_frames();
    }

    /// Send a text message as a single final frame.
    ///
    /// # Errors
    ///
    /// - `Error::NotOpen` unless the connection is `Open`
    /// - `Error::BinarySendInProgress` while a binary stream is unfinished
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::NotOpen);
        }
        if self.binary_send != BinarySend::Idle {
            return Err(Error::BinarySendInProgress);
        }
        self.send_frame(&Frame::text(text));
        Ok(())
    }

    /// Send a ping.
    ///
    /// # Errors
    ///
    /// `Error::NotOpen` unless `Open`; `Error::ControlFrameTooLarge` above 125 bytes.
    pub fn ping(&mut self, payload: impl Into<Vec<u8>>) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::NotOpen);
        }
        let payload = payload.into();
        if payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(payload.len()));
        }
        self.send_frame(&Frame::ping(payload));
        Ok(())
    }

    /// Start an outbound binary message. Text sends are refused until [`end_binary`](Self::end_binary).
    ///
    /// # Errors
    ///
    /// `Error::NotOpen` unless `Open`; `Error::BinarySendInProgress` if one is already open.
    pub fn begin_binary(&mut self) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::NotOpen);
        }
        if self.binary_send != BinarySend::Idle {
            return Err(Error::BinarySendInProgress);
        }
        self.binary_send = BinarySend::Pending;
        Ok(())
    }

    /// Send a non-final chunk of the open binary message.
    ///
    /// # Errors
    ///
    /// `Error::NotOpen` unless `Open`; `Error::NoBinarySendInProgress` without `begin_binary`.
    pub fn send_binary_chunk(&mut self, data: &[u8]) -> Result<()> {
        self.binary_frame(false, data)
    }

    /// Send the final chunk and finish the binary message.
    ///
    /// # Errors
    ///
    /// Same as [`send_binary_chunk`](Self::send_binary_chunk).
    pub fn end_binary(&mut self, data: &[u8]) -> Result<()> {
        self.binary_frame(true, data)?;
        self.binary_send = BinarySend::Idle;
        Ok(())
    }

    fn binary_frame(&mut self, fin: bool, data: &[u8]) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::NotOpen);
        }
        let opcode = match self.binary_send {
            BinarySend::Idle => return Err(Error::NoBinarySendInProgress),
            BinarySend::Pending => OpCode::Binary,
            BinarySend::Streaming => OpCode::Continuation,
        };
        self.send_frame(&Frame::new(fin, opcode, data.to_vec()));
        self.binary_send = BinarySend::Streaming;
        Ok(())
    }

    /// Close the connection.
    ///
    /// From `Open` this sends a close frame and waits in `Closing` for the
    /// peer's answer. From `Connecting` or `Closing` the transport is ended
    /// at once. Closing a closed connection does nothing.
    ///
    /// Reasons longer than 123 bytes are cut at a character boundary. Codes
    /// that may not appear on the wire (1005, 1006) send an empty close frame.
    pub fn close(&mut self, code: u16, reason: &str) {
        match self.state {
            ConnectionState::Open => {
                let reason = truncate_reason(reason);
                debug!(role = %self.role, code, reason, "closing connection");
                let frame = if CloseCode::from_u16(code).is_reserved() {
                    Frame::close(None, "")
                } else {
                    Frame::close(Some(code), reason)
                };
                self.send_frame(&frame);
                self.state = ConnectionState::Closing;
                self.binary_send = BinarySend::Idle;
            }
            ConnectionState::Connecting | ConnectionState::Closing => {
                debug!(role = %self.role, state = %self.state, "ending transport");
                self.outputs.push_back(Output::End);
                self.enter_closed();
                self.report_closed(ABNORMAL_CLOSURE, "");
            }
            ConnectionState::Closed => {}
        }
    }

    /// The transport went away without a completed close handshake.
    pub fn transport_closed(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        debug!(role = %self.role, state = %self.state, "transport closed");
        self.enter_closed();
        self.report_closed(ABNORMAL_CLOSURE, "");
    }

    /// A host deadline (handshake or idle) expired.
    pub fn timed_out(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        warn!(role = %self.role, state = %self.state, "connection timed out");
        if !self.close_reported {
            self.events.push_back(Event::Error(Error::Timeout));
        }
        self.outputs.push_back(Output::End);
        self.enter_closed();
        self.report_closed(ABNORMAL_CLOSURE, "");
    }

    /// Returns `true` once the connection is `Open`.
    fn try_handshake(&mut self) -> bool {
        let Some(end) = handshake::find_header_end(self.inbound.as_slice()) else {
            if let Err(err) = self.config.limits.check_handshake_size(self.inbound.len()) {
                self.fail_handshake(err);
            }
            return false;
        };
        if let Err(err) = self.config.limits.check_handshake_size(end) {
            self.fail_handshake(err);
            return false;
        }

        let result = match self.role {
            Role::Server => self.accept_request(end),
            Role::Client => self.verify_response(end),
        };
        match result {
            Ok(()) => {
                self.inbound.consume(end);
                self.state = ConnectionState::Open;
                info!(role = %self.role, path = %self.path, "connection open");
                self.events.push_back(Event::Connected);
                true
            }
            Err(err) => {
                self.fail_handshake(err);
                false
            }
        }
    }

    fn accept_request(&mut self, end: usize) -> Result<()> {
        let request = HandshakeRequest::parse(&self.inbound.as_slice()[..end])?;
        let response = HandshakeResponse::from_request(&request, self.protocol.as_deref());

        let mut buf = Vec::with_capacity(160);
        response.write(&mut buf)?;
        self.outputs.push_back(Output::Write(Bytes::from(buf)));

        self.path = request.path;
        self.headers = request.headers;
        Ok(())
    }

    fn verify_response(&mut self, end: usize) -> Result<()> {
        let response = HandshakeResponse::parse(&self.inbound.as_slice()[..end])?;
        let key = self
            .client_key
            .as_deref()
            .ok_or_else(|| Error::InvalidHandshake("Response before request was sent".into()))?;
        response.verify(key)?;

        if response.protocol.is_some() {
            self.protocol = response.protocol;
        }
        self.headers = response.headers;
        Ok(())
    }

    fn fail_handshake(&mut self, err: Error) {
        warn!(role = %self.role, error = %err, "handshake failed");
        // A client never answers a server with an HTTP response for an oversized header block.
        if self.role == Role::Server || !matches!(err, Error::HandshakeTooLarge { .. }) {
            self.outputs
                .push_back(Output::Write(Bytes::from_static(BAD_REQUEST)));
        }
        self.outputs.push_back(Output::End);
        self.enter_closed();
        self.events.push_back(Event::Error(err));
        self.report_closed(ABNORMAL_CLOSURE, "");
    }

    fn process_frames(&mut self) {
        while self.state.can_receive() {
            let result = match Frame::parse(self.inbound.as_slice()) {
                Ok((frame, used)) => {
                    self.inbound.consume(used);
                    self.dispatch(frame)
                }
                Err(Error::IncompleteFrame { .. }) => break,
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                self.fail(err);
                return;
            }
        }

        if self.state.can_receive() {
            if let Err(err) = self.config.limits.check_buffer_length(self.inbound.len()) {
                self.fail(err);
            }
        }
    }

    /// Handle one decoded frame. An error ends frame processing for this read.
    fn dispatch(&mut self, frame: Frame) -> Result<()> {
        trace!(
            role = %self.role,
            opcode = %frame.opcode,
            fin = frame.fin,
            len = frame.payload().len(),
            "frame received"
        );

        match frame.opcode {
            OpCode::Close => self.on_close(&frame),
            OpCode::Ping if self.state == ConnectionState::Open => {
                self.send_frame(&Frame::pong(frame.into_payload()));
            }
            OpCode::Ping => {
                trace!(state = %self.state, "ignoring ping");
            }
            OpCode::Pong => {
                let payload = String::from_utf8_lossy(frame.payload()).into_owned();
                self.events.push_back(Event::Pong(payload));
            }
            OpCode::Text | OpCode::Binary => {
                if self.fragment.is_some() {
                    return Err(Error::ProtocolViolation(format!(
                        "{} frame while a fragmented message is open",
                        frame.opcode
                    )));
                }
                let (fin, opcode) = (frame.fin, frame.opcode);
                self.fragment = Some(match opcode {
                    OpCode::Text => Fragment::Text(frame.into_payload()),
                    _ => Fragment::Binary(frame.payload().len()),
                });
                self.data_frame_done(fin)?;
            }
            OpCode::Continuation => {
                match self.fragment.as_mut() {
                    Some(Fragment::Text(bytes)) => bytes.extend_from_slice(frame.payload()),
                    Some(Fragment::Binary(len)) => *len += frame.payload().len(),
                    None => {
                        return Err(Error::ProtocolViolation(
                            "Continuation frame without a message to continue".into(),
                        ));
                    }
                }
                self.data_frame_done(frame.fin)?;
            }
        }
        Ok(())
    }

    /// Enforce the size limit on the open fragment and deliver it on `fin`.
    fn data_frame_done(&mut self, fin: bool) -> Result<()> {
        let size = self.fragment.as_ref().map_or(0, Fragment::len);
        if let Err(err) = self.config.limits.check_buffer_length(size) {
            self.fragment = None;
            return Err(err);
        }
        if !fin {
            return Ok(());
        }

        match self.fragment.take() {
            Some(Fragment::Text(bytes)) => {
                let text = String::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)?;
                debug!(role = %self.role, len = text.len(), "text message received");
                self.events.push_back(Event::Text(text));
            }
            Some(Fragment::Binary(len)) => {
                debug!(role = %self.role, len, "discarding binary message");
            }
            None => {}
        }
        Ok(())
    }

    fn on_close(&mut self, frame: &Frame) {
        let CloseFrame { code, reason } = CloseFrame::from_payload(frame.payload());
        match self.state {
            ConnectionState::Open => {
                debug!(role = %self.role, code, reason = %reason, "peer closed, echoing");
                self.send_frame(&Frame::close(Some(code), truncate_reason(&reason)));
            }
            ConnectionState::Closing => {
                debug!(role = %self.role, code, reason = %reason, "close handshake complete");
            }
            ConnectionState::Connecting | ConnectionState::Closed => return,
        }
        self.outputs.push_back(Output::End);
        self.enter_closed();
        self.report_closed(code, &reason);
    }

    /// Report a protocol, payload or size error and close with its status code.
    fn fail(&mut self, err: Error) {
        let code = err.close_code().as_u16();
        warn!(role = %self.role, error = %err, code, "closing on error");
        self.events.push_back(Event::Error(err));
        self.close(code, "");
    }

    fn send_frame(&mut self, frame: &Frame) {
        let mask = self.role.must_mask().then(|| self.mask.next_mask());
        self.outputs.push_back(Output::Write(frame.encode(mask)));
    }

    fn enter_closed(&mut self) {
        self.state = ConnectionState::Closed;
        self.fragment = None;
        self.binary_send = BinarySend::Idle;
        self.inbound.clear();
    }

    fn report_closed(&mut self, code: u16, reason: &str) {
        if self.close_reported {
            return;
        }
        self.close_reported = true;
        info!(role = %self.role, code, reason, "connection closed");
        self.events.push_back(Event::Closed {
            code,
            reason: reason.to_string(),
        });
    }
}

fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}
