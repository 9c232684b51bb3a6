//! # wsengine - a sans-IO WebSocket protocol engine
//!
//! `wsengine` implements the RFC 6455 wire protocol over any bidirectional
//! byte stream: the HTTP Upgrade handshake, frame encoding and decoding with
//! masking, message reassembly, and the ping/pong/close control flow.
//!
//! ## Layers
//!
//! - [`protocol`]: pure frame and handshake codecs
//! - [`connection::Connection`]: the per-connection state machine; bytes in,
//!   [`Output`]s and [`Event`]s out, no I/O
//! - [`transport::WebSocket`]: drives a `Connection` over a tokio stream
//!   (feature `async-tokio`)
//! - [`server`]: TCP acceptor, connection registry and broadcast
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wsengine::{Config, Event, WebSocket};
//!
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:8080").await?;
//! let mut ws = WebSocket::connect(stream, "127.0.0.1", "/chat", Config::client()).await?;
//! ws.send_text("hello").await?;
//! while let Some(event) = ws.recv().await {
//!     println!("{event:?}");
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;

#[cfg(feature = "async-tokio")]
pub mod server;
#[cfg(feature = "async-tokio")]
pub mod transport;

pub use config::{Config, Limits, Timeouts};
pub use connection::{Connection, ConnectionState, Event, Output, Role};
pub use error::{Error, Result};
pub use message::{CloseCode, CloseFrame};
pub use protocol::{Frame, HandshakeRequest, HandshakeResponse, OpCode, WS_GUID, compute_accept_key};

#[cfg(feature = "async-tokio")]
pub use server::{Command, ConnectionHandle, ConnectionId, Handler, Registry, Server};
#[cfg(feature = "async-tokio")]
pub use transport::WebSocket;
