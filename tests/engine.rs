//! End-to-end tests of the sans-IO engine: two `Connection`s wired back to
//! back, and a server fed hand-built client frames.

use bytes::Bytes;
use wsengine::connection::{Connection, Event, Output};
use wsengine::protocol::{FixedMask, Frame, OpCode};
use wsengine::{Config, ConnectionState, Error, Limits};

const REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
    Host: example.com\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
    Sec-WebSocket-Version: 13\r\n\r\n";

const MASK: [u8; 4] = [0xa1, 0xb2, 0xc3, 0xd4];

fn events(conn: &mut Connection) -> Vec<Event> {
    std::iter::from_fn(|| conn.poll_event()).collect()
}

fn outputs(conn: &mut Connection) -> Vec<Output> {
    std::iter::from_fn(|| conn.poll_output()).collect()
}

fn closed(code: u16, reason: &str) -> Event {
    Event::Closed {
        code,
        reason: reason.to_string(),
    }
}

fn open_server(config: Config) -> Connection {
    let mut conn = Connection::server(config);
    conn.receive(REQUEST);
    assert_eq!(events(&mut conn), vec![Event::Connected]);
    let _ = outputs(&mut conn);
    conn
}

fn masked(frame: Frame) -> Bytes {
    frame.encode(Some(MASK))
}

/// Move every queued write from `from` into `to`. Returns whether `from` asked to end.
fn pump(from: &mut Connection, to: &mut Connection) -> bool {
    let mut ended = false;
    while let Some(output) = from.poll_output() {
        match output {
            Output::Write(bytes) => to.receive(&bytes),
            Output::End => ended = true,
        }
    }
    ended
}

#[test]
fn test_client_server_back_to_back() {
    let mut client = Connection::client("example.com", "/room", Config::client())
        .with_mask_source(FixedMask(MASK));
    let mut server = Connection::server(Config::server());

    client.start().unwrap();
    pump(&mut client, &mut server);
    pump(&mut server, &mut client);

    assert_eq!(server.path(), "/room");
    assert_eq!(events(&mut server), vec![Event::Connected]);
    assert_eq!(events(&mut client), vec![Event::Connected]);

    client.send_text("hello server").unwrap();
    pump(&mut client, &mut server);
    assert_eq!(events(&mut server), vec![Event::Text("hello server".into())]);

    server.send_text("hello client").unwrap();
    pump(&mut server, &mut client);
    assert_eq!(events(&mut client), vec![Event::Text("hello client".into())]);

    client.ping("are you there").unwrap();
    pump(&mut client, &mut server);
    pump(&mut server, &mut client);
    assert_eq!(events(&mut client), vec![Event::Pong("are you there".into())]);

    client.close(1000, "bye");
    assert_eq!(client.state(), ConnectionState::Closing);
    assert!(!pump(&mut client, &mut server));
    assert!(pump(&mut server, &mut client));

    assert_eq!(server.state(), ConnectionState::Closed);
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(events(&mut server), vec![closed(1000, "bye")]);
    assert_eq!(events(&mut client), vec![closed(1000, "bye")]);

    client.transport_closed();
    server.transport_closed();
    assert!(events(&mut client).is_empty());
    assert!(events(&mut server).is_empty());
}

#[test]
fn test_client_frames_are_masked() {
    let mut client = Connection::client("example.com", "/", Config::client())
        .with_mask_source(FixedMask(MASK));
    let mut server = Connection::server(Config::server());
    client.start().unwrap();
    pump(&mut client, &mut server);
    pump(&mut server, &mut client);
    let _ = outputs(&mut client);

    client.send_text("x").unwrap();
    let Some(Output::Write(bytes)) = client.poll_output() else {
        panic!("expected a frame");
    };
    assert_eq!(bytes[1] & 0x80, 0x80);
    assert_eq!(&bytes[2..6], &MASK);
}

#[test]
fn test_client_rejects_wrong_accept() {
    let mut client = Connection::client("example.com", "/", Config::client());
    client.start().unwrap();
    let _ = outputs(&mut client);

    client.receive(
        b"HTTP/1.1 101 Switching Protocols\r\n\
          Upgrade: websocket\r\n\
          Connection: Upgrade\r\n\
          Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n",
    );

    assert_eq!(client.state(), ConnectionState::Closed);
    let events = events(&mut client);
    assert!(matches!(&events[0], Event::Error(Error::InvalidHandshake(msg)) if msg.contains("mismatch")));
    assert_eq!(events[1], closed(1006, ""));
    assert_eq!(outputs(&mut client).last(), Some(&Output::End));
}

#[test]
fn test_fragmented_text_with_interleaved_ping() {
    let mut server = open_server(Config::server());

    server.receive(&masked(Frame::new(false, OpCode::Text, b"Hel".to_vec())));
    server.receive(&masked(Frame::ping(b"mid".to_vec())));
    server.receive(&masked(Frame::new(false, OpCode::Continuation, b"lo, ".to_vec())));
    server.receive(&masked(Frame::new(true, OpCode::Continuation, b"world".to_vec())));

    assert_eq!(events(&mut server), vec![Event::Text("Hello, world".into())]);
    assert_eq!(
        outputs(&mut server),
        vec![Output::Write(Frame::pong(b"mid".to_vec()).encode(None))]
    );
}

#[test]
fn test_inbound_binary_is_consumed_silently() {
    let mut server = open_server(Config::server());
    server.receive(&masked(Frame::binary(false, vec![1, 2, 3])));
    server.receive(&masked(Frame::new(true, OpCode::Continuation, vec![4])));
    server.receive(&masked(Frame::text("after")));

    assert_eq!(events(&mut server), vec![Event::Text("after".into())]);
    assert_eq!(server.buffered(), 0);
}

#[test]
fn test_continuation_without_start_is_protocol_error() {
    let mut server = open_server(Config::server());
    server.receive(&masked(Frame::new(true, OpCode::Continuation, b"x".to_vec())));

    let events = events(&mut server);
    assert!(matches!(events[..], [Event::Error(Error::ProtocolViolation(_))]));
    assert_eq!(server.state(), ConnectionState::Closing);
    assert_eq!(
        outputs(&mut server),
        vec![Output::Write(Frame::close(Some(1002), "").encode(None))]
    );
}

#[test]
fn test_protocol_error_stops_processing_the_read() {
    let mut server = open_server(Config::server());
    let mut wire = masked(Frame::new(true, OpCode::Continuation, b"x".to_vec())).to_vec();
    wire.extend_from_slice(&masked(Frame::close(Some(1000), "peer")));
    server.receive(&wire);

    let events = events(&mut server);
    assert!(matches!(events[..], [Event::Error(Error::ProtocolViolation(_))]));
    assert_eq!(server.state(), ConnectionState::Closing);
    assert_eq!(
        outputs(&mut server),
        vec![Output::Write(Frame::close(Some(1002), "").encode(None))]
    );
}

#[test]
fn test_new_message_inside_fragment_is_protocol_error() {
    let mut server = open_server(Config::server());
    server.receive(&masked(Frame::new(false, OpCode::Text, b"a".to_vec())));
    server.receive(&masked(Frame::text("b")));

    assert!(matches!(
        events(&mut server)[..],
        [Event::Error(Error::ProtocolViolation(_))]
    ));
    assert_eq!(server.state(), ConnectionState::Closing);
}

#[test]
fn test_reserved_opcode_closes_with_1002() {
    let mut server = open_server(Config::server());
    server.receive(&[0x83, 0x80, 0, 0, 0, 0]);

    assert_eq!(events(&mut server), vec![Event::Error(Error::ReservedOpcode(3))]);
    assert_eq!(
        outputs(&mut server),
        vec![Output::Write(Frame::close(Some(1002), "").encode(None))]
    );
}

#[test]
fn test_invalid_utf8_closes_with_1007() {
    let mut server = open_server(Config::server());
    server.receive(&masked(Frame::new(true, OpCode::Text, vec![0xff, 0xfe])));

    assert_eq!(events(&mut server), vec![Event::Error(Error::InvalidUtf8)]);
    assert_eq!(
        outputs(&mut server),
        vec![Output::Write(Frame::close(Some(1007), "").encode(None))]
    );
}

#[test]
fn test_empty_close_reports_1005_and_echoes_empty() {
    let mut server = open_server(Config::server());
    server.receive(&masked(Frame::close(None, "")));

    assert_eq!(events(&mut server), vec![closed(1005, "")]);
    assert_eq!(
        outputs(&mut server),
        vec![
            Output::Write(Bytes::from_static(&[0x88, 0x00])),
            Output::End
        ]
    );
    assert_eq!(server.state(), ConnectionState::Closed);
}

#[test]
fn test_frames_after_close_are_ignored() {
    let mut server = open_server(Config::server());
    let mut wire = masked(Frame::close(Some(1000), "")).to_vec();
    wire.extend_from_slice(&masked(Frame::text("late")));
    server.receive(&wire);

    assert_eq!(events(&mut server), vec![closed(1000, "")]);
}

#[test]
fn test_buffer_overflow_closes_with_1009() {
    let config = Config::server().with_max_buffer_length(1024);
    let mut server = open_server(config);

    // Header of a 4 KiB frame followed by more than the limit of its payload.
    let frame = masked(Frame::binary(true, vec![0u8; 4096]));
    server.receive(&frame[..2048]);

    let events = events(&mut server);
    assert!(matches!(
        events[..],
        [Event::Error(Error::MessageTooBig { max: 1024, .. })]
    ));
    assert_eq!(
        outputs(&mut server),
        vec![Output::Write(Frame::close(Some(1009), "").encode(None))]
    );
}

#[test]
fn test_fragmented_message_over_limit_closes_with_1009() {
    // Large enough for the handshake and for any single frame, not for the message.
    let config = Config::server().with_max_buffer_length(200);
    let mut server = open_server(config);

    server.receive(&masked(Frame::new(false, OpCode::Text, vec![b'a'; 80])));
    server.receive(&masked(Frame::new(false, OpCode::Continuation, vec![b'a'; 80])));
    assert!(events(&mut server).is_empty());
    server.receive(&masked(Frame::new(false, OpCode::Continuation, vec![b'a'; 80])));

    assert!(matches!(
        events(&mut server)[..],
        [Event::Error(Error::MessageTooBig { size: 240, max: 200 })]
    ));
    assert_eq!(server.state(), ConnectionState::Closing);
    assert_eq!(
        outputs(&mut server),
        vec![Output::Write(Frame::close(Some(1009), "").encode(None))]
    );
}

#[test]
fn test_handshake_too_large() {
    let config = Config::server().with_limits(Limits::new(2 * 1024 * 1024, 64));
    let mut server = Connection::server(config);
    server.receive(&[b'a'; 65]);

    let events = events(&mut server);
    assert!(matches!(
        events[0],
        Event::Error(Error::HandshakeTooLarge { size: 65, max: 64 })
    ));
    assert_eq!(events[1], closed(1006, ""));
    assert_eq!(
        outputs(&mut server),
        vec![
            Output::Write(Bytes::from_static(b"HTTP/1.1 400 Bad Request\r\n\r\n")),
            Output::End
        ]
    );
}

#[test]
fn test_incomplete_handshake_waits() {
    let mut server = Connection::server(Config::server());
    server.receive(&REQUEST[..REQUEST.len() - 2]);
    assert_eq!(server.state(), ConnectionState::Connecting);
    assert!(events(&mut server).is_empty());
    assert!(outputs(&mut server).is_empty());

    server.receive(&REQUEST[REQUEST.len() - 2..]);
    assert_eq!(events(&mut server), vec![Event::Connected]);
}

#[test]
fn test_exactly_one_closed_under_overlapping_shutdown() {
    let mut server = open_server(Config::server());
    server.close(1000, "first");
    server.timed_out();
    server.transport_closed();
    server.close(1001, "again");

    let closes: Vec<_> = events(&mut server)
        .into_iter()
        .filter(|e| matches!(e, Event::Closed { .. }))
        .collect();
    assert_eq!(closes, vec![closed(1006, "")]);
}
