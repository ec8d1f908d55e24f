//! Client-side WebSocket support: frame primitives, the opening
//! handshake, and a streaming connection type.

pub mod conn;
pub mod frame;
pub mod handshake;

pub use conn::{FrameInfo, WsConn};
