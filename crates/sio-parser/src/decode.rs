use bytes::Bytes;

use crate::value::hydrate_binary;
use crate::{PacketHeader, PacketType, ParseError, Value, DEFAULT_NAMESPACE};

/// Per-connection decoder with attachment reassembly.
///
/// Buffers are fed in arrival order through [`add`](Decoder::add). A packet
/// without attachments completes immediately; a binary packet parks its
/// header and payload until the declared number of binary buffers has
/// arrived. The decoder is not thread-safe by design — the owning connection
/// serializes access.
pub struct Decoder {
    /// Maximum accepted attachment count per packet. Zero means unlimited.
    max_attachments: usize,
    pending: Option<Pending>,
}

struct Pending {
    header: PacketHeader,
    event: Option<String>,
    payload: Option<serde_json::Value>,
    buffers: Vec<Bytes>,
}

impl Pending {
    fn finish(self) -> DecodedPacket {
        DecodedPacket {
            header: self.header,
            event: self.event,
            payload: self.payload,
            buffers: self.buffers,
        }
    }
}

impl Decoder {
    pub fn new(max_attachments: usize) -> Self {
        Self {
            max_attachments,
            pending: None,
        }
    }

    /// Feed one engine-level buffer. Returns a packet when one completes.
    pub fn add(&mut self, data: Bytes, is_binary: bool) -> Result<Option<DecodedPacket>, ParseError> {
        if is_binary {
            return self.add_attachment(data);
        }

        if self.pending.is_some() {
            return Err(ParseError::UnexpectedText);
        }

        let pending = self.parse_header(&data)?;
        if pending.header.attachments == 0 {
            return Ok(Some(pending.finish()));
        }
        self.pending = Some(pending);
        Ok(None)
    }

    /// Drop any partially reassembled packet.
    pub fn reset(&mut self) {
        self.pending = None;
    }

    fn add_attachment(&mut self, data: Bytes) -> Result<Option<DecodedPacket>, ParseError> {
        let pending = self.pending.as_mut().ok_or(ParseError::UnexpectedBinary)?;
        pending.buffers.push(data);
        if pending.buffers.len() == pending.header.attachments {
            let pending = self.pending.take().ok_or(ParseError::UnexpectedBinary)?;
            return Ok(Some(pending.finish()));
        }
        Ok(None)
    }

    fn parse_header(&self, data: &[u8]) -> Result<Pending, ParseError> {
        let first = *data.first().ok_or(ParseError::MalformedHeader("empty packet"))?;
        let packet_type = PacketType::from_char(first)?;
        let mut i = 1;

        let mut attachments = 0usize;
        if packet_type.is_binary() {
            let start = i;
            while i < data.len() && data[i].is_ascii_digit() {
                attachments = attachments
                    .checked_mul(10)
                    .and_then(|n| n.checked_add((data[i] - b'0') as usize))
                    .ok_or(ParseError::MalformedHeader("attachment count overflow"))?;
                i += 1;
            }
            if i == start || data.get(i) != Some(&b'-') {
                return Err(ParseError::MalformedHeader("missing attachment count"));
            }
            i += 1;
            if attachments == 0 {
                return Err(ParseError::MalformedHeader(
                    "binary packet with zero attachments",
                ));
            }
            if self.max_attachments != 0 && attachments > self.max_attachments {
                return Err(ParseError::TooManyAttachments {
                    count: attachments,
                    max: self.max_attachments,
                });
            }
        }

        let namespace = if data.get(i) == Some(&b'/') {
            let raw = match data[i..].iter().position(|b| *b == b',') {
                Some(rel) => {
                    let raw = &data[i..i + rel];
                    i += rel + 1;
                    raw
                }
                None => {
                    let raw = &data[i..];
                    i = data.len();
                    raw
                }
            };
            String::from_utf8(raw.to_vec())
                .map_err(|_| ParseError::MalformedHeader("namespace is not valid utf-8"))?
        } else {
            DEFAULT_NAMESPACE.to_owned()
        };

        let mut id: Option<u64> = None;
        while i < data.len() && data[i].is_ascii_digit() {
            let digit = (data[i] - b'0') as u64;
            let next = id
                .unwrap_or(0)
                .checked_mul(10)
                .and_then(|n| n.checked_add(digit))
                .ok_or(ParseError::MalformedHeader("ack id overflow"))?;
            id = Some(next);
            i += 1;
        }

        let payload = if i < data.len() {
            Some(serde_json::from_slice::<serde_json::Value>(&data[i..])?)
        } else {
            None
        };

        let mut event = None;
        if packet_type.is_event() || packet_type.is_ack() {
            let items = payload
                .as_ref()
                .and_then(serde_json::Value::as_array)
                .ok_or(ParseError::MalformedPayload(
                    "event and ack payloads must be arrays",
                ))?;
            if packet_type.is_event() {
                event = Some(
                    items
                        .first()
                        .and_then(serde_json::Value::as_str)
                        .ok_or(ParseError::MalformedPayload(
                            "event payload must start with the event name",
                        ))?
                        .to_owned(),
                );
            }
        }
        if packet_type.is_ack() && id.is_none() {
            return Err(ParseError::MalformedHeader("ack packet without an id"));
        }

        Ok(Pending {
            header: PacketHeader {
                packet_type,
                namespace,
                id,
                attachments,
            },
            event,
            payload,
            buffers: Vec::new(),
        })
    }
}

/// A fully reassembled inbound packet.
///
/// The payload JSON is parsed eagerly (the event name has to be known before
/// a handler can be looked up), but placeholder substitution and typed
/// argument conversion are deferred until [`args`](DecodedPacket::args) runs.
#[derive(Debug)]
pub struct DecodedPacket {
    pub header: PacketHeader,
    event: Option<String>,
    payload: Option<serde_json::Value>,
    buffers: Vec<Bytes>,
}

impl DecodedPacket {
    /// Event name, present for EVENT / BINARY_EVENT packets.
    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    /// Raw JSON payload, placeholders not yet substituted. This is what
    /// CONNECT auth and CONNECT_ERROR payloads are read from.
    pub fn payload_json(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    /// Decode the packet's argument list, substituting binary placeholders
    /// with the collected attachments. For event packets the leading event
    /// name is not part of the arguments.
    pub fn args(self) -> Result<Vec<Value>, ParseError> {
        let payload = match self.payload {
            Some(payload) => payload,
            None => return Ok(Vec::new()),
        };
        match hydrate_binary(payload, &self.buffers)? {
            Value::Array(mut items) => {
                if self.header.is_event() {
                    if items.is_empty() {
                        return Err(ParseError::MalformedPayload(
                            "event payload must start with the event name",
                        ));
                    }
                    items.remove(0);
                }
                Ok(items)
            }
            other => Ok(vec![other]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode;

    fn feed(decoder: &mut Decoder, buffers: Vec<Bytes>) -> DecodedPacket {
        let mut out = None;
        let total = buffers.len();
        for (i, buf) in buffers.into_iter().enumerate() {
            let done = decoder.add(buf, i > 0).unwrap();
            if i + 1 == total {
                out = done;
            } else {
                assert!(done.is_none());
            }
        }
        out.expect("packet should complete with the last buffer")
    }

    #[test]
    fn bare_connect() {
        let mut decoder = Decoder::new(0);
        let packet = decoder
            .add(Bytes::from_static(b"0"), false)
            .unwrap()
            .unwrap();
        assert_eq!(packet.header.packet_type, PacketType::Connect);
        assert_eq!(packet.header.namespace, "/");
        assert_eq!(packet.header.id, None);
    }

    #[test]
    fn event_with_namespace_and_id() {
        let mut decoder = Decoder::new(0);
        let packet = decoder
            .add(
                Bytes::from_static(br#"2/admin,456["project:delete",123]"#),
                false,
            )
            .unwrap()
            .unwrap();
        assert_eq!(packet.header.packet_type, PacketType::Event);
        assert_eq!(packet.header.namespace, "/admin");
        assert_eq!(packet.header.id, Some(456));
        assert_eq!(packet.event(), Some("project:delete"));
        let args = packet.args().unwrap();
        assert_eq!(args, vec![Value::from_json(serde_json::json!(123))]);
    }

    #[test]
    fn default_namespace_forms_are_equivalent() {
        for wire in [&br#"21["hello"]"#[..], &br#"2/,1["hello"]"#[..]] {
            let mut decoder = Decoder::new(0);
            let packet = decoder
                .add(Bytes::copy_from_slice(wire), false)
                .unwrap()
                .unwrap();
            assert_eq!(packet.header.namespace, "/");
            assert_eq!(packet.header.id, Some(1));
            assert_eq!(packet.event(), Some("hello"));
        }
    }

    #[test]
    fn binary_event_reassembles_attachments() {
        let mut decoder = Decoder::new(0);
        assert!(decoder
            .add(
                Bytes::from_static(br#"52-["blobs",{"_placeholder":true,"num":0},{"_placeholder":true,"num":1}]"#),
                false,
            )
            .unwrap()
            .is_none());
        assert!(decoder
            .add(Bytes::from_static(&[0xDE, 0xAD]), true)
            .unwrap()
            .is_none());
        let packet = decoder
            .add(Bytes::from_static(&[0xBE, 0xEF]), true)
            .unwrap()
            .unwrap();
        assert_eq!(packet.header.attachments, 2);
        let args = packet.args().unwrap();
        assert_eq!(
            args,
            vec![
                Value::Binary(Bytes::from_static(&[0xDE, 0xAD])),
                Value::Binary(Bytes::from_static(&[0xBE, 0xEF])),
            ]
        );
    }

    #[test]
    fn encode_decode_roundtrip_with_binary() {
        let mut header = PacketHeader::new(PacketType::Event, "/chat");
        header.id = Some(9);
        let payload = Value::Array(vec![
            Value::String("mixed".into()),
            Value::from_json(serde_json::json!({ "n": 1 })),
            Value::Binary(Bytes::from_static(&[7, 7, 7])),
        ]);
        let buffers = encode(header, Some(&payload)).unwrap();

        let mut decoder = Decoder::new(0);
        let packet = feed(&mut decoder, buffers);
        assert_eq!(packet.header.packet_type, PacketType::BinaryEvent);
        assert_eq!(packet.header.namespace, "/chat");
        assert_eq!(packet.header.id, Some(9));
        assert_eq!(packet.event(), Some("mixed"));
        let args = packet.args().unwrap();
        assert_eq!(
            args,
            vec![
                Value::from_json(serde_json::json!({ "n": 1 })),
                Value::Binary(Bytes::from_static(&[7, 7, 7])),
            ]
        );
    }

    #[test]
    fn binary_in_idle_state_is_rejected() {
        let mut decoder = Decoder::new(0);
        assert!(matches!(
            decoder.add(Bytes::from_static(&[1]), true),
            Err(ParseError::UnexpectedBinary)
        ));
    }

    #[test]
    fn text_while_collecting_is_rejected() {
        let mut decoder = Decoder::new(0);
        decoder
            .add(
                Bytes::from_static(br#"51-["x",{"_placeholder":true,"num":0}]"#),
                false,
            )
            .unwrap();
        assert!(matches!(
            decoder.add(Bytes::from_static(b"0"), false),
            Err(ParseError::UnexpectedText)
        ));
    }

    #[test]
    fn attachment_limit_is_enforced() {
        let mut decoder = Decoder::new(1);
        let err = decoder
            .add(
                Bytes::from_static(br#"52-["x",{"_placeholder":true,"num":0},{"_placeholder":true,"num":1}]"#),
                false,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ParseError::TooManyAttachments { count: 2, max: 1 }
        ));
    }

    #[test]
    fn binary_type_with_zero_attachments_is_malformed() {
        let mut decoder = Decoder::new(0);
        assert!(matches!(
            decoder.add(Bytes::from_static(br#"50-["x"]"#), false),
            Err(ParseError::MalformedHeader(_))
        ));
    }

    #[test]
    fn reset_discards_partial_state() {
        let mut decoder = Decoder::new(0);
        decoder
            .add(
                Bytes::from_static(br#"51-["x",{"_placeholder":true,"num":0}]"#),
                false,
            )
            .unwrap();
        decoder.reset();
        // Back in the idle state: binary buffers are unexpected again.
        assert!(matches!(
            decoder.add(Bytes::from_static(&[1]), true),
            Err(ParseError::UnexpectedBinary)
        ));
    }

    #[test]
    fn invalid_type_digit() {
        let mut decoder = Decoder::new(0);
        assert!(matches!(
            decoder.add(Bytes::from_static(b"9"), false),
            Err(ParseError::InvalidPacketType)
        ));
    }

    #[test]
    fn event_payload_must_be_array() {
        let mut decoder = Decoder::new(0);
        assert!(matches!(
            decoder.add(Bytes::from_static(br#"2{"not":"array"}"#), false),
            Err(ParseError::MalformedPayload(_))
        ));
    }
}
