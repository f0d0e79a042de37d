#![deny(unsafe_code)]

//! Machinery shared by the server and client halves of the system:
//! identifiers, the outbound packet queue, handler stores, the typed event
//! registry with ack-callback synthesis, and the pending-ack table.

mod ack;
mod error;
mod events;
mod handler;
mod id;
mod queue;

pub use ack::{AckCallback, AckTable};
pub use error::{is_reserved_event, AckError, EmitError, SioError, RESERVED_EVENTS};
pub use events::{AckSender, AckSink, EventRegistry};
pub use handler::{HandlerId, HandlerStore};
pub use id::{AckIdGenerator, Room, Sid};
pub use queue::PacketQueue;
