//! Drive a [`Connection`] over a tokio stream.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::config::{Config, Timeouts};
use crate::connection::{Connection, ConnectionState, Event, Output};
use crate::error::{Error, Result};

const READ_CHUNK: usize = 4096;

/// A WebSocket over an async byte stream.
///
/// Every engine call is followed by writing whatever the engine queued.
/// [`recv`](Self::recv) is cancel safe, so it can sit in a `tokio::select!`
/// next to other work: partially written output stays buffered and a
/// cancelled read loses nothing.
#[derive(Debug)]
pub struct WebSocket<T> {
    io: T,
    conn: Connection,
    timeouts: Option<Timeouts>,
    handshake_deadline: Option<Instant>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    end_requested: bool,
    shut_down: bool,
}

impl<T: AsyncRead + AsyncWrite + Unpin> WebSocket<T> {
    /// Wrap a stream and an engine that has not started its handshake yet.
    ///
    /// The handshake deadline, if configured, starts counting now.
    pub fn new(io: T, conn: Connection, timeouts: Option<Timeouts>) -> Self {
        let handshake_deadline = timeouts.as_ref().map(|t| Instant::now() + t.handshake);
        Self {
            io,
            conn,
            timeouts,
            handshake_deadline,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::new(),
            end_requested: false,
            shut_down: false,
        }
    }

    /// Run the server handshake on an accepted stream.
    ///
    /// # Errors
    ///
    /// Returns the handshake error (the 400 response has already been
    /// written), `Error::Timeout`, or `Error::ConnectionClosed` if the peer
    /// left first.
    pub async fn accept(io: T, config: Config) -> Result<Self> {
        let timeouts = config.timeouts.clone();
        let mut ws = Self::new(io, Connection::server(config), timeouts);
        ws.handshake().await?;
        Ok(ws)
    }

    /// Run the client handshake, requesting `path` from `host`.
    ///
    /// # Errors
    ///
    /// Same as [`accept`](Self::accept), plus `Error::InvalidHeaderValue`
    /// for a host or path containing CR/LF.
    pub async fn connect(io: T, host: &str, path: &str, config: Config) -> Result<Self> {
        let timeouts = config.timeouts.clone();
        let mut ws = Self::new(io, Connection::client(host, path, config), timeouts);
        ws.conn.start()?;
        ws.handshake().await?;
        Ok(ws)
    }

    async fn handshake(&mut self) -> Result<()> {
        let mut failure = None;
        while let Some(event) = self.recv().await {
            match event {
                Event::Connected => return Ok(()),
                Event::Error(err) => failure = Some(err),
                Event::Closed { .. } => break,
                other => debug!(?other, "event before handshake completed"),
            }
        }
        Err(failure.unwrap_or(Error::ConnectionClosed))
    }

    /// The engine, for state and handshake details.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the connection is closed and its final
    /// [`Event::Closed`] has been returned. Transport errors are not
    /// returned; they end the connection with a 1006 close.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            // Errors are already folded into the engine state.
            let _ = self.flush().await;

            if let Some(event) = self.conn.poll_event() {
                return Some(event);
            }
            if !self.conn.state().is_active() {
                return None;
            }

            let deadline = match self.conn.state() {
                ConnectionState::Connecting => self.handshake_deadline,
                _ => self.timeouts.as_ref().map(|t| Instant::now() + t.idle),
            };

            self.read_buf.reserve(READ_CHUNK);
            let read = self.io.read_buf(&mut self.read_buf);
            let result = match deadline {
                Some(deadline) => match timeout_at(deadline, read).await {
                    Ok(result) => result,
                    Err(_) => {
                        self.conn.timed_out();
                        continue;
                    }
                },
                None => read.await,
            };

            match result {
                Ok(0) => {
                    debug!(state = %self.conn.state(), "peer closed the stream");
                    self.conn.transport_closed();
                }
                Ok(_) => {
                    self.conn.receive(&self.read_buf);
                    self.read_buf.clear();
                }
                Err(err) => {
                    warn!(error = %err, "read failed");
                    self.conn.transport_closed();
                }
            }
        }
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// Misuse errors from [`Connection::send_text`], or `Error::Io` if the write failed.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.conn.send_text(text)?;
        self.flush().await
    }

    /// Send a ping.
    ///
    /// # Errors
    ///
    /// Misuse errors from [`Connection::ping`], or `Error::Io` if the write failed.
    pub async fn ping(&mut self, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.conn.ping(payload)?;
        self.flush().await
    }

    /// Start the close handshake. Keep calling [`recv`](Self::recv) to see it finish.
    ///
    /// # Errors
    ///
    /// `Error::Io` if the close frame could not be written.
    pub async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        self.conn.close(code, reason);
        self.flush().await
    }

    /// Write everything the engine queued and shut the stream down if it asked to.
    async fn flush(&mut self) -> Result<()> {
        while let Some(output) = self.conn.poll_output() {
            match output {
                Output::Write(bytes) if !self.end_requested => self.write_buf.extend_from_slice(&bytes),
                Output::Write(_) => {}
                Output::End => self.end_requested = true,
            }
        }

        if !self.write_buf.is_empty() && !self.shut_down {
            let written = async {
                self.io.write_all_buf(&mut self.write_buf).await?;
                self.io.flush().await
            }
            .await;
            if let Err(err) = written {
                warn!(error = %err, "write failed");
                self.write_buf.clear();
                self.conn.transport_closed();
                return Err(err.into());
            }
        }

        if self.end_requested && !self.shut_down {
            self.shut_down = true;
            if let Err(err) = self.io.shutdown().await {
                debug!(error = %err, "shutdown failed");
            }
        }
        Ok(())
    }
}
