#![deny(unsafe_code)]

//! Bidirectional, event-oriented messaging over a long-lived transport
//! connection, wire-compatible with Socket.IO v4.
//!
//! This crate is the facade over the workspace: the packet codec lives in
//! [`parser`], the engine-layer seam in [`engine`], and the two halves of
//! the system in [`server`] and [`client`]. The most commonly used types
//! are re-exported at the root.
//!
//! ```no_run
//! use sio::engine::mem::MemHub;
//! use sio::{Manager, ManagerConfig, Server, ServerConfig};
//!
//! # async fn demo() {
//! let hub = MemHub::new();
//! let server = Server::new(ServerConfig::default());
//! let acceptor = server.clone();
//! hub.set_acceptor(move |conn| acceptor.accept(conn));
//!
//! server.on_connection(|socket| {
//!     socket.on("greet", |(name,): (String,), ack| {
//!         if let Some(ack) = ack {
//!             let _ = ack.send((format!("hello, {name}"),));
//!         }
//!     });
//! });
//!
//! let manager = Manager::new("mem://demo", hub.dialer(), ManagerConfig::default());
//! let socket = manager.socket("/");
//! socket.connect();
//! # }
//! ```

pub use sio_client as client;
pub use sio_engine as engine;
pub use sio_parser as parser;
pub use sio_server as server;

pub use sio_client::{AuthError, ClientSocket, Manager, ManagerConfig};
pub use sio_core::{AckError, AckSender, EmitError, HandlerId, PacketQueue, Room, Sid, SioError};
pub use sio_engine::Reason;
pub use sio_parser::{FromArgs, FromValue, IntoArgs, IntoValue, Json, PacketHeader, PacketType, Value};
pub use sio_server::{
    Adapter, BroadcastOperator, ConnectionStateRecovery, Handshake, InMemoryAdapter, Namespace,
    Server, ServerConfig, ServerSocket,
};
