#![deny(unsafe_code)]

//! Client half of the Socket.IO core.
//!
//! A [`Manager`] owns one engine-layer connection and multiplexes any number
//! of per-namespace [`ClientSocket`]s over it. When the transport drops, the
//! manager's reconnect controller retries with exponential backoff and
//! jitter, and sockets that were connected reattach transparently,
//! preserving their subscription state.

mod backoff;
mod config;
mod manager;
mod socket;

pub use backoff::Backoff;
pub use config::ManagerConfig;
pub use manager::Manager;
pub use socket::{AuthError, ClientSocket};
