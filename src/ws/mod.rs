//! WebSocket support: handshake, frame codec, and the per-connection pumps.
//!
//! Only single-frame messages are supported. Outgoing frames are never
//! fragmented or masked; incoming fragmented frames are a protocol error.

pub mod frame;
pub mod handshake;
pub mod socket;

pub use frame::{Frame, Opcode};
pub use handshake::{Handshake, accept_key, negotiate};
pub use socket::{ConnectionState, WebSocket, WebSocketHandler, WebSocketSender, handler};
