use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use sio_parser::{ArgsError, FromArgs, IntoArgs, Value};

use crate::{EmitError, HandlerId};

/// Where a synthesized ack reply goes: the owning socket encodes and queues
/// the ACK packet carrying the given arguments.
pub trait AckSink: Send + Sync {
    fn send_ack(&self, id: u64, args: Vec<Value>) -> Result<(), EmitError>;
}

/// The callable handed to event handlers when the inbound packet asked for
/// an acknowledgement. The first invocation sends the ACK; later ones are
/// ignored.
#[derive(Clone)]
pub struct AckSender {
    id: u64,
    used: Arc<AtomicBool>,
    sink: Arc<dyn AckSink>,
}

impl AckSender {
    pub fn new(id: u64, sink: Arc<dyn AckSink>) -> Self {
        Self {
            id,
            used: Arc::new(AtomicBool::new(false)),
            sink,
        }
    }

    /// Ack id this reply correlates with.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn send<A: IntoArgs>(&self, args: A) -> Result<(), EmitError> {
        if self.used.swap(true, Ordering::SeqCst) {
            debug!(id = self.id, "ignoring repeated ack send");
            return Ok(());
        }
        self.sink.send_ack(self.id, args.into_args()?)
    }
}

impl std::fmt::Debug for AckSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckSender").field("id", &self.id).finish()
    }
}

type RawHandler = dyn Fn(Vec<Value>, Option<AckSender>) -> Result<(), ArgsError> + Send + Sync;

struct EventEntry {
    id: HandlerId,
    once: bool,
    handler: Arc<RawHandler>,
}

/// Handlers keyed by event name, with typed positional argument decoding.
///
/// Registration declares the argument tuple; dispatch decodes the packet's
/// values against that declaration. A packet with fewer arguments than
/// declared is an arity mismatch and the handler does not run; surplus
/// arguments are dropped with a log line.
pub struct EventRegistry {
    next_id: AtomicU64,
    events: Mutex<HashMap<String, Vec<EventEntry>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            events: Mutex::new(HashMap::new()),
        }
    }

    pub fn on<A, F>(&self, event: &str, handler: F) -> HandlerId
    where
        A: FromArgs + Send + 'static,
        F: Fn(A, Option<AckSender>) + Send + Sync + 'static,
    {
        self.insert(event, false, wrap::<A, F>(event, handler))
    }

    pub fn once<A, F>(&self, event: &str, handler: F) -> HandlerId
    where
        A: FromArgs + Send + 'static,
        F: Fn(A, Option<AckSender>) + Send + Sync + 'static,
    {
        self.insert(event, true, wrap::<A, F>(event, handler))
    }

    fn insert(&self, event: &str, once: bool, handler: Arc<RawHandler>) -> HandlerId {
        let id = HandlerId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.events
            .lock()
            .entry(event.to_owned())
            .or_default()
            .push(EventEntry { id, once, handler });
        id
    }

    /// Remove one registration from an event.
    pub fn off(&self, event: &str, id: HandlerId) {
        let mut events = self.events.lock();
        if let Some(entries) = events.get_mut(event) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                events.remove(event);
            }
        }
    }

    /// Remove every registration for an event.
    pub fn off_event(&self, event: &str) {
        self.events.lock().remove(event);
    }

    pub fn off_all(&self) {
        self.events.lock().clear();
    }

    /// Handlers for an event in registration order, consuming `once`
    /// entries. The lock is released before anything runs.
    pub fn handlers(&self, event: &str) -> Vec<Arc<RawHandler>> {
        let mut events = self.events.lock();
        let Some(entries) = events.get_mut(event) else {
            return Vec::new();
        };
        let out: Vec<Arc<RawHandler>> = entries.iter().map(|e| Arc::clone(&e.handler)).collect();
        entries.retain(|e| !e.once);
        if entries.is_empty() {
            events.remove(event);
        }
        out
    }

    pub fn has(&self, event: &str) -> bool {
        self.events.lock().contains_key(event)
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn wrap<A, F>(event: &str, handler: F) -> Arc<RawHandler>
where
    A: FromArgs + Send + 'static,
    F: Fn(A, Option<AckSender>) + Send + Sync + 'static,
{
    let event = event.to_owned();
    Arc::new(move |args: Vec<Value>, ack: Option<AckSender>| {
        if let Some(expected) = A::arity() {
            if args.len() > expected {
                debug!(
                    event = %event,
                    surplus = args.len() - expected,
                    "dropping surplus event arguments"
                );
            }
        }
        let decoded = A::from_args(args)?;
        handler(decoded, ack);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct NullSink;

    impl AckSink for NullSink {
        fn send_ack(&self, _id: u64, _args: Vec<Value>) -> Result<(), EmitError> {
            Ok(())
        }
    }

    struct RecordingSink {
        sent: Mutex<Vec<(u64, Vec<Value>)>>,
    }

    impl AckSink for RecordingSink {
        fn send_ack(&self, id: u64, args: Vec<Value>) -> Result<(), EmitError> {
            self.sent.lock().push((id, args));
            Ok(())
        }
    }

    #[test]
    fn typed_dispatch_decodes_positionally() {
        let registry = EventRegistry::new();
        let got = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&got);
        registry.on("msg", move |(text, n): (String, u64), _ack| {
            *slot.lock() = Some((text, n));
        });

        let args = ("hi", 3u64).into_args().unwrap();
        for handler in registry.handlers("msg") {
            handler(args.clone(), None).unwrap();
        }
        assert_eq!(got.lock().clone(), Some(("hi".to_owned(), 3)));
    }

    #[test]
    fn arity_deficit_skips_the_handler() {
        let registry = EventRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        registry.on("msg", move |_args: (String, String), _ack| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let args = ("only one",).into_args().unwrap();
        let mut errors = 0;
        for handler in registry.handlers("msg") {
            if handler(args.clone(), None).is_err() {
                errors += 1;
            }
        }
        assert_eq!(errors, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn surplus_arguments_still_dispatch() {
        let registry = EventRegistry::new();
        let got = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&got);
        registry.on("msg", move |(first,): (String,), _ack| {
            *slot.lock() = Some(first);
        });

        let args = ("kept", "dropped", 1u64).into_args().unwrap();
        for handler in registry.handlers("msg") {
            handler(args.clone(), None).unwrap();
        }
        assert_eq!(got.lock().clone(), Some("kept".to_owned()));
    }

    #[test]
    fn once_registrations_are_consumed() {
        let registry = EventRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        registry.once("ping", move |_: (), _ack| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for handler in registry.handlers("ping") {
            handler(Vec::new(), None).unwrap();
        }
        assert!(registry.handlers("ping").is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ack_sender_fires_once() {
        let sink = Arc::new(RecordingSink {
            sent: Mutex::new(Vec::new()),
        });
        let ack = AckSender::new(7, Arc::clone(&sink) as Arc<dyn AckSink>);

        ack.send(("first",)).unwrap();
        ack.clone().send(("second",)).unwrap();

        let sent = sink.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 7);
        assert_eq!(sent[0].1, vec![Value::String("first".into())]);
    }

    #[test]
    fn off_and_off_event() {
        let registry = EventRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&hits);
        let id = registry.on("a", move |_: (), _| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&hits);
        registry.on("a", move |_: (), _| {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        registry.off("a", id);
        assert_eq!(registry.handlers("a").len(), 1);

        registry.off_event("a");
        assert!(!registry.has("a"));

        let _ = AckSender::new(0, Arc::new(NullSink) as Arc<dyn AckSink>);
    }
}
