#![deny(unsafe_code)]

//! Server half of the Socket.IO core.
//!
//! A [`Server`] accepts engine-layer connections and multiplexes them into
//! [`Namespace`]s. Each namespace owns its connected [`ServerSocket`]s, an
//! ordered middleware chain, and an [`Adapter`] that tracks room membership
//! and performs broadcast fan-out. [`BroadcastOperator`] is the fluent
//! filter builder shared by namespaces and sockets.

mod adapter;
mod config;
mod conn;
mod handshake;
mod namespace;
mod operator;
mod server;
mod session;
mod socket;
mod store;

pub use adapter::{Adapter, AdapterFactory, BroadcastAck, BroadcastOptions, InMemoryAdapter};
pub use config::{ConnectionStateRecovery, ServerConfig};
pub use handshake::Handshake;
pub use namespace::{ConnectRejection, Middleware, Namespace};
pub use operator::BroadcastOperator;
pub use server::Server;
pub use session::{PersistedSession, SessionAwareAdapter};
pub use socket::ServerSocket;
pub use store::SocketStore;
