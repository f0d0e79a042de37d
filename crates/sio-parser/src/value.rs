use std::collections::BTreeMap;

use bytes::Bytes;

use crate::{ArgsError, ParseError};

/// A JSON value with one extra leaf kind: raw binary data.
///
/// This is the payload tree the rest of the system works with. On the wire,
/// [`Binary`](Value::Binary) leaves never appear inside the JSON text; the
/// encoder sweeps them into the packet's attachment list and writes a
/// placeholder object in their place, and the decoder reverses that.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Binary(Bytes),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Lift a plain JSON value. No placeholder interpretation happens here.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Lower back into plain JSON. Fails if any binary leaf is present.
    pub fn try_into_json(self) -> Result<serde_json::Value, ArgsError> {
        match self {
            Value::Null => Ok(serde_json::Value::Null),
            Value::Bool(b) => Ok(serde_json::Value::Bool(b)),
            Value::Number(n) => Ok(serde_json::Value::Number(n)),
            Value::String(s) => Ok(serde_json::Value::String(s)),
            Value::Binary(_) => Err(ArgsError::UnexpectedBinary),
            Value::Array(items) => Ok(serde_json::Value::Array(
                items
                    .into_iter()
                    .map(Value::try_into_json)
                    .collect::<Result<_, _>>()?,
            )),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k, v.try_into_json()?);
                }
                Ok(serde_json::Value::Object(out))
            }
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Value::Binary(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::from_json(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Binary(value)
    }
}

/// Walk `value` in pre-order, moving every binary leaf into `attachments`
/// and leaving a numbered placeholder behind.
pub(crate) fn sweep_binary(value: &Value, attachments: &mut Vec<Bytes>) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Value::Number(n.clone()),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Binary(data) => {
            let num = attachments.len();
            attachments.push(data.clone());
            serde_json::json!({ "_placeholder": true, "num": num })
        }
        Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| sweep_binary(item, attachments))
                .collect(),
        ),
        Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sweep_binary(v, attachments)))
                .collect(),
        ),
    }
}

/// Reverse of [`sweep_binary`]: replace placeholder objects with the
/// collected attachment buffers.
pub(crate) fn hydrate_binary(
    value: serde_json::Value,
    buffers: &[Bytes],
) -> Result<Value, ParseError> {
    match value {
        serde_json::Value::Object(map) => {
            if map.get("_placeholder").and_then(serde_json::Value::as_bool) == Some(true) {
                let num = map
                    .get("num")
                    .and_then(serde_json::Value::as_u64)
                    .ok_or(ParseError::MalformedPlaceholder)? as usize;
                let buf = buffers
                    .get(num)
                    .cloned()
                    .ok_or(ParseError::PlaceholderOutOfRange(num))?;
                return Ok(Value::Binary(buf));
            }
            let mut out = BTreeMap::new();
            for (k, v) in map {
                out.insert(k, hydrate_binary(v, buffers)?);
            }
            Ok(Value::Object(out))
        }
        serde_json::Value::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(|item| hydrate_binary(item, buffers))
                .collect::<Result<_, _>>()?,
        )),
        other => Ok(Value::from_json(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_numbers_placeholders_in_preorder() {
        let mut map = BTreeMap::new();
        map.insert("a".to_owned(), Value::Binary(Bytes::from_static(b"one")));
        let value = Value::Array(vec![
            Value::Object(map),
            Value::Binary(Bytes::from_static(b"two")),
        ]);

        let mut attachments = Vec::new();
        let json = sweep_binary(&value, &mut attachments);

        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0], Bytes::from_static(b"one"));
        assert_eq!(attachments[1], Bytes::from_static(b"two"));
        assert_eq!(
            json,
            serde_json::json!([
                { "a": { "_placeholder": true, "num": 0 } },
                { "_placeholder": true, "num": 1 },
            ])
        );
    }

    #[test]
    fn hydrate_roundtrips_sweep() {
        let value = Value::Array(vec![
            Value::String("ev".to_owned()),
            Value::Binary(Bytes::from_static(&[1, 2, 3])),
        ]);
        let mut attachments = Vec::new();
        let json = sweep_binary(&value, &mut attachments);
        let back = hydrate_binary(json, &attachments).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn hydrate_rejects_out_of_range_placeholder() {
        let json = serde_json::json!({ "_placeholder": true, "num": 3 });
        let err = hydrate_binary(json, &[]).unwrap_err();
        assert!(matches!(err, ParseError::PlaceholderOutOfRange(3)));
    }

    #[test]
    fn binary_leaf_cannot_become_plain_json() {
        let value = Value::Array(vec![Value::Binary(Bytes::from_static(b"x"))]);
        assert!(matches!(
            value.try_into_json(),
            Err(ArgsError::UnexpectedBinary)
        ));
    }
}
