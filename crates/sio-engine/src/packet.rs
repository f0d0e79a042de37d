use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Engine-level packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Open,
    Close,
    Ping,
    Pong,
    Message,
    Upgrade,
    Noop,
}

/// One framed engine message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    /// Whether `data` is a raw binary frame rather than text.
    pub is_binary: bool,
    pub data: Bytes,
}

impl Packet {
    pub fn new(packet_type: PacketType, is_binary: bool, data: Bytes) -> Self {
        Self {
            packet_type,
            is_binary,
            data,
        }
    }

    /// A text MESSAGE frame.
    pub fn message(data: Bytes) -> Self {
        Self::new(PacketType::Message, false, data)
    }

    /// A binary MESSAGE frame.
    pub fn binary_message(data: Bytes) -> Self {
        Self::new(PacketType::Message, true, data)
    }

    pub fn ping() -> Self {
        Self::new(PacketType::Ping, false, Bytes::new())
    }

    pub fn pong() -> Self {
        Self::new(PacketType::Pong, false, Bytes::new())
    }
}

/// JSON payload of the engine OPEN packet: the transport announces its
/// session id and heartbeat schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeInfo {
    pub sid: String,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the peer may stay silent after a ping.
    pub ping_timeout: u64,
}
