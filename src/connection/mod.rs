//! The per-connection protocol state machine.
//!
//! [`Connection`] is sans-IO: it consumes bytes and produces [`Output`]s
//! for the transport and [`Event`]s for the application. The async adapter
//! in [`crate::transport`] drives it over a tokio stream.
//!
//! ## Connection Lifecycle
//!
//! 1. **Connecting** - waiting for the opening handshake
//! 2. **Open** - handshake done, messages flow
//! 3. **Closing** - close frame sent, waiting for the peer's
//! 4. **Closed** - terminal; exactly one [`Event::Closed`] has been emitted

mod buffer;
mod engine;
mod event;
mod role;
mod state;

pub use buffer::InboundBuffer;
pub use engine::Connection;
pub use event::{Event, Output};
pub use role::Role;
pub use state::ConnectionState;
