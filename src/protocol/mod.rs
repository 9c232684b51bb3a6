//! Wire-level pieces of RFC 6455: opcodes, masking, frames and the opening handshake.

pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;

pub use frame::{Frame, MAX_CONTROL_FRAME_PAYLOAD};
pub use handshake::{HandshakeRequest, HandshakeResponse, WS_GUID, compute_accept_key};
pub use mask::{FixedMask, MaskSource, RandomMask, apply_mask};
pub use opcode::OpCode;
