use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use sio_parser::Value;

use crate::AckError;

/// Callback for an outstanding acknowledgement.
pub type AckCallback = Box<dyn FnOnce(Result<Vec<Value>, AckError>) + Send>;

/// Pending outbound acks, keyed by ack id.
///
/// An entry is created at emit time and consumed exactly once: by the
/// matching ACK packet, by its timeout, or by disconnect. Callbacks always
/// run outside the table's lock.
pub struct AckTable {
    entries: Mutex<HashMap<u64, AckCallback>>,
}

impl AckTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Register a callback and arm its timeout.
    pub fn register(self: &Arc<Self>, id: u64, timeout: Duration, callback: AckCallback) {
        self.entries.lock().insert(id, callback);

        let table = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(table) = table.upgrade() else {
                return;
            };
            let callback = table.entries.lock().remove(&id);
            if let Some(callback) = callback {
                trace!(id, "ack timed out");
                callback(Err(AckError::Timeout));
            }
        });
    }

    /// Deliver a reply. Unknown ids are ignored, best-effort.
    pub fn resolve(&self, id: u64, args: Vec<Value>) -> bool {
        let callback = self.entries.lock().remove(&id);
        match callback {
            Some(callback) => {
                callback(Ok(args));
                true
            }
            None => {
                trace!(id, "ack reply for unknown id, ignoring");
                false
            }
        }
    }

    /// Fail every outstanding entry, typically on disconnect.
    pub fn fail_all(&self) {
        let entries: Vec<AckCallback> = {
            let mut guard = self.entries.lock();
            guard.drain().map(|(_, cb)| cb).collect()
        };
        for callback in entries {
            callback(Err(AckError::Disconnected));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn resolve_consumes_the_entry() {
        let table = AckTable::new();
        let (tx, mut rx) = unbounded_channel();
        table.register(
            1,
            Duration::from_secs(5),
            Box::new(move |result| {
                let _ = tx.send(result.is_ok());
            }),
        );

        assert!(table.resolve(1, vec![Value::String("ok".into())]));
        assert!(rx.recv().await.unwrap());
        assert!(table.is_empty());
        // Unknown id after consumption is a no-op.
        assert!(!table.resolve(1, Vec::new()));
    }

    #[tokio::test]
    async fn timeout_fires_when_no_reply_arrives() {
        let table = AckTable::new();
        let (tx, mut rx) = unbounded_channel();
        table.register(
            2,
            Duration::from_millis(10),
            Box::new(move |result| {
                let _ = tx.send(matches!(result, Err(AckError::Timeout)));
            }),
        );

        assert!(rx.recv().await.unwrap());
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn fail_all_reports_disconnect() {
        let table = AckTable::new();
        let (tx, mut rx) = unbounded_channel();
        for id in 0..3 {
            let tx = tx.clone();
            table.register(
                id,
                Duration::from_secs(5),
                Box::new(move |result| {
                    let _ = tx.send(matches!(result, Err(AckError::Disconnected)));
                }),
            );
        }

        table.fail_all();
        for _ in 0..3 {
            assert!(rx.recv().await.unwrap());
        }
        assert!(table.is_empty());
    }
}
