use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Socket identifier, unique per server instance and unguessable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid(Arc<str>);

impl Sid {
    const LEN: usize = 20;

    /// Generate a fresh random id.
    pub fn random() -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(Self::LEN)
            .map(char::from)
            .collect();
        Sid(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Sid {
    fn from(value: &str) -> Self {
        Sid(value.into())
    }
}

impl From<String> for Sid {
    fn from(value: String) -> Self {
        Sid(value.into())
    }
}

/// Room name. Cheap to clone; rooms are passed around a lot during fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Room(Arc<str>);

impl Room {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Room {
    fn from(value: &str) -> Self {
        Room(value.into())
    }
}

impl From<String> for Room {
    fn from(value: String) -> Self {
        Room(value.into())
    }
}

impl From<&Sid> for Room {
    fn from(value: &Sid) -> Self {
        Room(Arc::clone(&value.0))
    }
}

/// Monotonic ack id source.
///
/// The client allocates per manager, the server per namespace; either way an
/// id is never handed out twice by the same generator.
#[derive(Debug, Default)]
pub struct AckIdGenerator {
    next: AtomicU64,
}

impl AckIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
