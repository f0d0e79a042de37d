use std::time::SystemTime;

/// Per-namespace connection context handed to middlewares.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Wall-clock time the CONNECT packet was processed.
    pub time: SystemTime,
    /// Opaque auth blob sent by the client, `null` when absent.
    pub auth: serde_json::Value,
}

impl Handshake {
    pub fn new(auth: serde_json::Value) -> Self {
        Self {
            time: SystemTime::now(),
            auth,
        }
    }
}

/// Recovery fields the client piggybacks on the auth blob.
pub(crate) fn recovery_fields(auth: &serde_json::Value) -> Option<(String, String)> {
    let obj = auth.as_object()?;
    let pid = obj.get("sessionID")?.as_str()?;
    let offset = obj.get("offset")?.as_str()?;
    if pid.is_empty() || offset.is_empty() {
        return None;
    }
    Some((pid.to_owned(), offset.to_owned()))
}
