use crate::ParseError;

/// Socket.IO packet type, encoded on the wire as a single ASCII digit equal
/// to the enum discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 0,
    Disconnect = 1,
    Event = 2,
    Ack = 3,
    ConnectError = 4,
    BinaryEvent = 5,
    BinaryAck = 6,
}

impl PacketType {
    const MAX: u8 = PacketType::BinaryAck as u8;

    /// The wire digit for this type.
    pub fn to_char(self) -> u8 {
        b'0' + self as u8
    }

    /// Parse a wire digit back into a packet type.
    pub fn from_char(c: u8) -> Result<Self, ParseError> {
        match c.checked_sub(b'0') {
            Some(0) => Ok(PacketType::Connect),
            Some(1) => Ok(PacketType::Disconnect),
            Some(2) => Ok(PacketType::Event),
            Some(3) => Ok(PacketType::Ack),
            Some(4) => Ok(PacketType::ConnectError),
            Some(5) => Ok(PacketType::BinaryEvent),
            Some(6) => Ok(PacketType::BinaryAck),
            _ => Err(ParseError::InvalidPacketType),
        }
    }

    /// True for the attachment-carrying variants.
    pub fn is_binary(self) -> bool {
        matches!(self, PacketType::BinaryEvent | PacketType::BinaryAck)
    }

    /// True for event packets, binary or not.
    pub fn is_event(self) -> bool {
        matches!(self, PacketType::Event | PacketType::BinaryEvent)
    }

    /// True for acknowledgement packets, binary or not.
    pub fn is_ack(self) -> bool {
        matches!(self, PacketType::Ack | PacketType::BinaryAck)
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            PacketType::Connect => "CONNECT",
            PacketType::Disconnect => "DISCONNECT",
            PacketType::Event => "EVENT",
            PacketType::Ack => "ACK",
            PacketType::ConnectError => "CONNECT_ERROR",
            PacketType::BinaryEvent => "BINARY_EVENT",
            PacketType::BinaryAck => "BINARY_ACK",
        }
    }
}

/// Header of a logical packet: everything except the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    /// Namespace the packet belongs to. Defaults to `/`.
    pub namespace: String,
    /// Ack id, present when the packet expects or answers an acknowledgement.
    pub id: Option<u64>,
    /// Number of binary attachments following the header buffer.
    pub attachments: usize,
}

impl PacketHeader {
    pub fn new(packet_type: PacketType, namespace: impl Into<String>) -> Self {
        Self {
            packet_type,
            namespace: namespace.into(),
            id: None,
            attachments: 0,
        }
    }

    pub fn is_binary(&self) -> bool {
        self.packet_type.is_binary()
    }

    pub fn is_event(&self) -> bool {
        self.packet_type.is_event()
    }

    pub fn is_ack(&self) -> bool {
        self.packet_type.is_ack()
    }
}
