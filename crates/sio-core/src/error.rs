use thiserror::Error;

use sio_engine::EngineError;
use sio_parser::{ArgsError, EncodeError, ParseError};

/// Event names the protocol claims for itself. User code cannot emit these.
pub const RESERVED_EVENTS: &[&str] = &["connect", "connection", "disconnect", "disconnecting", ""];

pub fn is_reserved_event(event: &str) -> bool {
    RESERVED_EVENTS.contains(&event)
}

/// Error surfaced synchronously from an emit call.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("\"{0}\" is a reserved event name")]
    ReservedEvent(String),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("connection is gone")]
    Closed,
}

/// Why an ack callback fired without a reply.
#[derive(Debug, Error)]
pub enum AckError {
    #[error("ack timeout")]
    Timeout,

    #[error("socket disconnected before the ack arrived")]
    Disconnected,

    #[error(transparent)]
    Decode(#[from] ArgsError),
}

/// Errors routed to user-registered error handlers.
///
/// Protocol and internal errors are fatal for the connection that produced
/// them; dispatch errors only concern the packet they decode.
#[derive(Debug, Error)]
pub enum SioError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] ArgsError),

    #[error("internal error: {0}")]
    Internal(String),
}
