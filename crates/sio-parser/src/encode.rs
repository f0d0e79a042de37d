use bytes::Bytes;

use crate::value::sweep_binary;
use crate::{EncodeError, PacketHeader, PacketType, Value, DEFAULT_NAMESPACE};

/// Encode one logical packet into its wire buffers.
///
/// The first buffer is the header text followed by the JSON payload; any
/// binary leaves found in the payload are swept into the remaining buffers
/// and referenced by placeholder. The packet type is normalized against what
/// the sweep actually found: a packet ends up binary-typed exactly when it
/// carries attachments.
pub fn encode(
    mut header: PacketHeader,
    payload: Option<&Value>,
) -> Result<Vec<Bytes>, EncodeError> {
    let mut attachments = Vec::new();
    let json_payload = payload.map(|value| sweep_binary(value, &mut attachments));

    header.packet_type = match (header.packet_type, attachments.is_empty()) {
        (PacketType::Event | PacketType::BinaryEvent, false) => PacketType::BinaryEvent,
        (PacketType::Ack | PacketType::BinaryAck, false) => PacketType::BinaryAck,
        (PacketType::BinaryEvent, true) => PacketType::Event,
        (PacketType::BinaryAck, true) => PacketType::Ack,
        (other, true) => other,
        (other, false) => return Err(EncodeError::BinaryNotAllowed(other.name())),
    };
    header.attachments = attachments.len();

    let mut text = String::new();
    text.push(header.packet_type.to_char() as char);

    if header.is_binary() {
        text.push_str(&header.attachments.to_string());
        text.push('-');
    }

    // The default namespace is elided only when nothing follows it; a bare
    // "0" stays unambiguous, while "2/,[...]" keeps the payload out of the
    // namespace position.
    let has_tail = header.id.is_some() || json_payload.is_some();
    if header.namespace != DEFAULT_NAMESPACE {
        text.push_str(&header.namespace);
        text.push(',');
    } else if has_tail {
        text.push_str("/,");
    }

    if let Some(id) = header.id {
        text.push_str(&id.to_string());
    }

    if let Some(json) = &json_payload {
        text.push_str(&serde_json::to_string(json)?);
    }

    let mut buffers = Vec::with_capacity(1 + attachments.len());
    buffers.push(Bytes::from(text));
    buffers.extend(attachments);
    Ok(buffers)
}
