#![deny(unsafe_code)]

//! Socket.IO v4 packet codec.
//!
//! A logical packet travels as an ordered list of engine-level buffers: one
//! text buffer carrying the header grammar plus the JSON payload, followed by
//! zero or more raw binary attachments. Binary values inside the payload are
//! swept out on encode and replaced by `{"_placeholder":true,"num":N}`
//! objects; the [`Decoder`] reassembles them on the way back in.
//!
//! The codec is deliberately stateless on the encode side ([`encode`]) and
//! stateful on the decode side ([`Decoder`]), because attachments arrive in
//! separate engine messages and have to be collected per connection.

mod args;
mod decode;
mod encode;
mod error;
mod packet;
mod value;

pub use args::{FromArgs, FromValue, IntoArgs, IntoValue, Json};
pub use decode::{DecodedPacket, Decoder};
pub use encode::encode;
pub use error::{ArgsError, EncodeError, ParseError};
pub use packet::{PacketHeader, PacketType};
pub use value::Value;

/// Default namespace every packet belongs to unless it says otherwise.
pub const DEFAULT_NAMESPACE: &str = "/";
