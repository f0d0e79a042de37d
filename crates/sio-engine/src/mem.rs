//! In-process engine transport.
//!
//! A [`MemHub`] plays the part of the network: an acceptor registered on the
//! hub answers dial attempts, and each successful dial produces a connected
//! pair of [`EngineConn`] halves whose frames are pumped through unbounded
//! channels. The hub can be taken down and brought back up to exercise
//! reconnection paths without real sockets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::{Callbacks, EngineConn, EngineDialer, EngineError, Packet, Reason};

/// Server-side factory: turns a freshly accepted connection into the
/// callbacks the engine should deliver inbound frames to.
pub type Acceptor = dyn Fn(Arc<dyn EngineConn>) -> Callbacks + Send + Sync;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Dialer,
    Acceptor,
}

struct Shared {
    closed: AtomicBool,
    dialer_cbs: OnceLock<Arc<Callbacks>>,
    acceptor_cbs: OnceLock<Arc<Callbacks>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            dialer_cbs: OnceLock::new(),
            acceptor_cbs: OnceLock::new(),
        }
    }

    fn callbacks(&self, side: Side) -> Option<&Arc<Callbacks>> {
        match side {
            Side::Dialer => self.dialer_cbs.get(),
            Side::Acceptor => self.acceptor_cbs.get(),
        }
    }

    /// Tear the pair down exactly once. `closer` sees a forced close, the
    /// peer sees the transport going away.
    fn close_from(&self, closer: Option<Side>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for side in [Side::Dialer, Side::Acceptor] {
            let reason = match closer {
                Some(c) if c == side => Reason::ForcedClose,
                _ => Reason::TransportClose,
            };
            if let Some(cbs) = self.callbacks(side) {
                cbs.close(reason, None);
            }
        }
    }
}

/// One half of an in-memory connection pair.
pub struct MemConn {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Vec<Packet>>,
    side: Side,
}

impl EngineConn for MemConn {
    fn send(&self, packets: Vec<Packet>) {
        if self.shared.closed.load(Ordering::SeqCst) {
            trace!("dropping {} packet(s) on closed mem conn", packets.len());
            return;
        }
        let _ = self.tx.send(packets);
    }

    fn close(&self) {
        self.shared.close_from(Some(self.side));
    }
}

fn spawn_pump(
    mut rx: mpsc::UnboundedReceiver<Vec<Packet>>,
    shared: Arc<Shared>,
    side: Side,
) {
    tokio::spawn(async move {
        while let Some(packets) = rx.recv().await {
            if shared.closed.load(Ordering::SeqCst) {
                break;
            }
            if let Some(cbs) = shared.callbacks(side) {
                cbs.packet(packets);
            }
        }
    });
}

struct HubInner {
    up: bool,
    acceptor: Option<Arc<Acceptor>>,
    pairs: Vec<Weak<Shared>>,
}

/// The in-process "network".
pub struct MemHub {
    inner: Mutex<HubInner>,
}

impl MemHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HubInner {
                up: true,
                acceptor: None,
                pairs: Vec::new(),
            }),
        })
    }

    /// Install the server-side acceptor. Replaces any previous one; live
    /// connections are unaffected.
    pub fn set_acceptor(&self, acceptor: impl Fn(Arc<dyn EngineConn>) -> Callbacks + Send + Sync + 'static) {
        self.inner.lock().acceptor = Some(Arc::new(acceptor));
    }

    /// Refuse new dials and drop every live connection, as if the server
    /// process died.
    pub fn take_down(&self) {
        let pairs = {
            let mut inner = self.inner.lock();
            inner.up = false;
            std::mem::take(&mut inner.pairs)
        };
        for pair in pairs.iter().filter_map(Weak::upgrade) {
            pair.close_from(None);
        }
    }

    /// Accept dials again.
    pub fn bring_up(&self) {
        self.inner.lock().up = true;
    }

    pub fn is_up(&self) -> bool {
        self.inner.lock().up
    }

    /// A dialer whose attempts terminate at this hub.
    pub fn dialer(self: &Arc<Self>) -> Arc<dyn EngineDialer> {
        Arc::new(MemDialer {
            hub: Arc::clone(self),
        })
    }

    fn connect(&self, callbacks: Callbacks) -> Result<Arc<dyn EngineConn>, EngineError> {
        let acceptor = {
            let inner = self.inner.lock();
            if !inner.up {
                return Err(EngineError::Unreachable("hub is down".into()));
            }
            inner
                .acceptor
                .clone()
                .ok_or_else(|| EngineError::Unreachable("no acceptor registered".into()))?
        };

        let shared = Arc::new(Shared::new());
        let (to_acceptor, at_acceptor) = mpsc::unbounded_channel();
        let (to_dialer, at_dialer) = mpsc::unbounded_channel();

        let dialer_conn = Arc::new(MemConn {
            shared: Arc::clone(&shared),
            tx: to_acceptor,
            side: Side::Dialer,
        });
        let acceptor_conn = Arc::new(MemConn {
            shared: Arc::clone(&shared),
            tx: to_dialer,
            side: Side::Acceptor,
        });

        let _ = shared.dialer_cbs.set(Arc::new(callbacks));
        let acceptor_callbacks = acceptor(acceptor_conn);
        let _ = shared.acceptor_cbs.set(Arc::new(acceptor_callbacks));

        spawn_pump(at_acceptor, Arc::clone(&shared), Side::Acceptor);
        spawn_pump(at_dialer, Arc::clone(&shared), Side::Dialer);

        let mut inner = self.inner.lock();
        inner.pairs.retain(|p| p.strong_count() > 0);
        inner.pairs.push(Arc::downgrade(&shared));
        Ok(dialer_conn)
    }
}

struct MemDialer {
    hub: Arc<MemHub>,
}

impl EngineDialer for MemDialer {
    fn dial(
        &self,
        _url: &str,
        callbacks: Callbacks,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Arc<dyn EngineConn>, EngineError>> + Send + '_>,
    > {
        Box::pin(async move { self.hub.connect(callbacks) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;

    fn collecting_callbacks() -> (Callbacks, mpsc::UnboundedReceiver<Vec<Packet>>, mpsc::UnboundedReceiver<Reason>) {
        let (packet_tx, packet_rx) = unbounded_channel();
        let (close_tx, close_rx) = unbounded_channel();
        let callbacks = Callbacks::new(
            move |packets| {
                let _ = packet_tx.send(packets);
            },
            |_err| {},
            move |reason, _err| {
                let _ = close_tx.send(reason);
            },
        );
        (callbacks, packet_rx, close_rx)
    }

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let hub = MemHub::new();
        let (server_cbs, mut server_rx, _server_close) = collecting_callbacks();
        let server_conn: Arc<Mutex<Option<Arc<dyn EngineConn>>>> = Arc::new(Mutex::new(None));
        let server_conn_slot = Arc::clone(&server_conn);
        let server_cbs = Mutex::new(Some(server_cbs));
        hub.set_acceptor(move |conn| {
            *server_conn_slot.lock() = Some(conn);
            server_cbs.lock().take().expect("single dial in this test")
        });

        let (client_cbs, mut client_rx, _client_close) = collecting_callbacks();
        let client = hub.dialer().dial("mem://", client_cbs).await.unwrap();

        client.send(vec![Packet::message(Bytes::from_static(b"hi"))]);
        let got = server_rx.recv().await.unwrap();
        assert_eq!(got[0].data, Bytes::from_static(b"hi"));

        let server = server_conn.lock().clone().unwrap();
        server.send(vec![Packet::ping()]);
        let got = client_rx.recv().await.unwrap();
        assert_eq!(got[0].packet_type, crate::PacketType::Ping);
    }

    #[tokio::test]
    async fn close_notifies_both_sides_once() {
        let hub = MemHub::new();
        let (server_cbs, _server_rx, mut server_close) = collecting_callbacks();
        let server_cbs = Mutex::new(Some(server_cbs));
        hub.set_acceptor(move |_conn| server_cbs.lock().take().expect("single dial"));

        let (client_cbs, _client_rx, mut client_close) = collecting_callbacks();
        let client = hub.dialer().dial("mem://", client_cbs).await.unwrap();

        client.close();
        client.close();

        assert_eq!(client_close.recv().await.unwrap(), Reason::ForcedClose);
        assert_eq!(server_close.recv().await.unwrap(), Reason::TransportClose);
        // Second close must not produce a second notification.
        assert!(
            tokio::time::timeout(Duration::from_millis(50), client_close.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn downed_hub_refuses_dials_and_drops_connections() {
        let hub = MemHub::new();
        let (server_cbs, _server_rx, _server_close) = collecting_callbacks();
        let server_cbs = Mutex::new(Some(server_cbs));
        hub.set_acceptor(move |_conn| server_cbs.lock().take().expect("single dial"));

        let (client_cbs, _client_rx, mut client_close) = collecting_callbacks();
        let _client = hub.dialer().dial("mem://", client_cbs).await.unwrap();

        hub.take_down();
        assert_eq!(client_close.recv().await.unwrap(), Reason::TransportClose);

        let (client_cbs, _rx, _close) = collecting_callbacks();
        assert!(matches!(
            hub.dialer().dial("mem://", client_cbs).await,
            Err(EngineError::Unreachable(_))
        ));

        hub.bring_up();
        assert!(hub.is_up());
    }
}
