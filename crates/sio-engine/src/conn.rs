use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::{Packet, Reason};

/// Engine transport failure.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("engine transport unreachable: {0}")]
    Unreachable(String),

    #[error("engine connection is closed")]
    Closed,

    #[error("engine transport failure: {0}")]
    Transport(String),
}

/// The send half of one engine connection.
///
/// `send` is fire-and-forget: the transport owns its own write queue and
/// failure reporting goes through [`Callbacks::on_error`] / `on_close`.
/// Both operations must be safe to call after the connection died.
pub trait EngineConn: Send + Sync {
    fn send(&self, packets: Vec<Packet>);
    fn close(&self);
}

type PacketFn = dyn Fn(Vec<Packet>) + Send + Sync;
type ErrorFn = dyn Fn(EngineError) + Send + Sync;
type CloseFn = dyn Fn(Reason, Option<EngineError>) + Send + Sync;

/// Inbound delivery callbacks the core hands to the engine.
///
/// The engine may invoke these from any thread; `on_close` fires at most
/// once per connection.
pub struct Callbacks {
    on_packet: Box<PacketFn>,
    on_error: Box<ErrorFn>,
    on_close: Box<CloseFn>,
}

impl Callbacks {
    pub fn new(
        on_packet: impl Fn(Vec<Packet>) + Send + Sync + 'static,
        on_error: impl Fn(EngineError) + Send + Sync + 'static,
        on_close: impl Fn(Reason, Option<EngineError>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_packet: Box::new(on_packet),
            on_error: Box::new(on_error),
            on_close: Box::new(on_close),
        }
    }

    pub fn packet(&self, packets: Vec<Packet>) {
        (self.on_packet)(packets);
    }

    pub fn error(&self, err: EngineError) {
        (self.on_error)(err);
    }

    pub fn close(&self, reason: Reason, err: Option<EngineError>) {
        (self.on_close)(reason, err);
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks").finish_non_exhaustive()
    }
}

/// Factory for outbound engine connections, called once per connect attempt.
pub trait EngineDialer: Send + Sync {
    fn dial(
        &self,
        url: &str,
        callbacks: Callbacks,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn EngineConn>, EngineError>> + Send + '_>>;
}
