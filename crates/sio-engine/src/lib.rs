#![deny(unsafe_code)]

//! The engine layer as the Socket.IO core consumes it.
//!
//! The engine is a byte-framed, message-oriented duplex channel with
//! heartbeats. This crate defines only the seam: the packet vocabulary, the
//! [`EngineConn`] send half, the [`Callbacks`] the core hands to the engine
//! for inbound delivery, and the [`EngineDialer`] factory used by clients.
//! Concrete transports (long-polling, WebSocket, WebTransport) live behind
//! those traits; the [`mem`] module provides the in-process one used by
//! tests and demos.

mod conn;
pub mod mem;
mod packet;
mod reason;

pub use conn::{Callbacks, EngineConn, EngineDialer, EngineError};
pub use packet::{HandshakeInfo, Packet, PacketType};
pub use reason::Reason;
