use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use sio_core::{AckIdGenerator, HandlerId, HandlerStore, PacketQueue, SioError};
use sio_engine::{
    Callbacks, EngineConn, EngineDialer, Packet, PacketType as EnginePacketType, Reason,
};
use sio_parser::{DecodedPacket, Decoder};

use crate::socket::ClientSocket;
use crate::ManagerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Disconnected,
    Connecting,
    Connected,
}

type VoidFn = dyn Fn() + Send + Sync;
type ReasonFn = dyn Fn(Reason) + Send + Sync;
type ErrorFn = dyn Fn(&SioError) + Send + Sync;
type AttemptFn = dyn Fn(u32) + Send + Sync;

pub(crate) struct ManagerInner {
    url: String,
    dialer: Arc<dyn EngineDialer>,
    pub(crate) config: ManagerConfig,

    /// The decoder is stateful; the engine may deliver from any task, so
    /// every access is serialized here.
    decoder: Mutex<Decoder>,
    sockets: Mutex<HashMap<String, Arc<ClientSocket>>>,
    queue: Arc<PacketQueue>,
    engine: Mutex<Option<Arc<dyn EngineConn>>>,
    state: Mutex<ConnState>,
    skip_reconnect: AtomicBool,
    reconnecting: AtomicBool,
    backoff: crate::Backoff,
    ack_ids: AckIdGenerator,

    open_handlers: HandlerStore<VoidFn>,
    ping_handlers: HandlerStore<VoidFn>,
    error_handlers: HandlerStore<ErrorFn>,
    close_handlers: HandlerStore<ReasonFn>,
    reconnect_handlers: HandlerStore<AttemptFn>,
    reconnect_attempt_handlers: HandlerStore<AttemptFn>,
    reconnect_error_handlers: HandlerStore<ErrorFn>,
    reconnect_failed_handlers: HandlerStore<VoidFn>,
}

impl ManagerInner {
    pub(crate) fn is_open(&self) -> bool {
        *self.state.lock() == ConnState::Connected
    }

    pub(crate) fn next_ack_id(&self) -> u64 {
        self.ack_ids.next()
    }

    /// Packetize wire buffers onto the outbound queue: header buffer as a
    /// text MESSAGE, attachments as binary MESSAGEs.
    pub(crate) fn send_buffers(&self, buffers: Vec<Bytes>) {
        let mut iter = buffers.into_iter();
        let Some(first) = iter.next() else {
            return;
        };
        let mut packets = Vec::with_capacity(1 + iter.len());
        packets.push(Packet::message(first));
        packets.extend(iter.map(Packet::binary_message));
        self.queue.add(packets);
    }

    fn sockets_snapshot(&self) -> Vec<Arc<ClientSocket>> {
        self.sockets.lock().values().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Connecting
    // ------------------------------------------------------------------

    pub(crate) async fn connect(self: &Arc<Self>) -> Result<(), SioError> {
        {
            let mut state = self.state.lock();
            if *state != ConnState::Disconnected {
                return Ok(());
            }
            *state = ConnState::Connecting;
        }

        debug!(url = %self.url, "dialing");
        let callbacks = self.engine_callbacks();
        match self.dialer.dial(&self.url, callbacks).await {
            Ok(engine) => {
                *self.engine.lock() = Some(engine);
                *self.state.lock() = ConnState::Connected;
                self.on_open();
                Ok(())
            }
            Err(err) => {
                *self.state.lock() = ConnState::Disconnected;
                let err = SioError::Engine(err);
                self.notify_error(&err);
                Err(err)
            }
        }
    }

    fn engine_callbacks(self: &Arc<Self>) -> Callbacks {
        let on_packet = {
            let inner = Arc::downgrade(self);
            move |packets: Vec<Packet>| {
                if let Some(inner) = inner.upgrade() {
                    inner.on_engine_packets(packets);
                }
            }
        };
        let on_error = {
            let inner = Arc::downgrade(self);
            move |err| {
                if let Some(inner) = inner.upgrade() {
                    inner.notify_error(&SioError::Engine(err));
                }
            }
        };
        let on_close = {
            let inner = Arc::downgrade(self);
            move |reason, _err| {
                if let Some(inner) = inner.upgrade() {
                    inner.on_engine_close(reason);
                }
            }
        };
        Callbacks::new(on_packet, on_error, on_close)
    }

    fn on_open(self: &Arc<Self>) {
        let attempts = self.backoff.attempts();
        self.backoff.reset();
        debug!(attempts, "manager open");

        let open_handlers = self.open_handlers.snapshot();
        let reconnect_handlers = if attempts > 0 {
            self.reconnect_handlers.snapshot()
        } else {
            Vec::new()
        };
        tokio::spawn(async move {
            for handler in open_handlers {
                handler();
            }
            for handler in reconnect_handlers {
                handler(attempts);
            }
        });

        for socket in self.sockets_snapshot() {
            socket.on_manager_open();
        }
    }

    /// First connect attempt failed before the engine ever opened: start
    /// the retry loop unless reconnection is off or already underway.
    pub(crate) fn maybe_reconnect_on_open(self: &Arc<Self>) {
        if self.backoff.attempts() == 0
            && !self.config.no_reconnection
            && !self.skip_reconnect.load(Ordering::SeqCst)
        {
            self.spawn_reconnect();
        }
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.reconnect_loop().await;
            inner.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    async fn reconnect_loop(self: &Arc<Self>) {
        loop {
            if self.skip_reconnect.load(Ordering::SeqCst) {
                return;
            }

            let attempts = self.backoff.attempts();
            let max = self.config.reconnection_attempts;
            if max != 0 && attempts >= max {
                debug!(attempts, "reconnection attempts exhausted");
                self.backoff.reset();
                for handler in self.reconnect_failed_handlers.snapshot() {
                    handler();
                }
                return;
            }

            let delay = self.backoff.next_delay();
            trace!(?delay, "sleeping before reconnect attempt");
            tokio::time::sleep(delay).await;
            if self.skip_reconnect.load(Ordering::SeqCst) {
                return;
            }

            let attempt = self.backoff.attempts();
            for handler in self.reconnect_attempt_handlers.snapshot() {
                handler(attempt);
            }

            match self.connect().await {
                // on_open already announced the successful retry.
                Ok(()) => return,
                Err(err) => {
                    for handler in self.reconnect_error_handlers.snapshot() {
                        handler(&err);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    fn on_engine_packets(self: &Arc<Self>, packets: Vec<Packet>) {
        for packet in packets {
            match packet.packet_type {
                EnginePacketType::Message => {
                    let decoded = {
                        let mut decoder = self.decoder.lock();
                        decoder.add(packet.data, packet.is_binary)
                    };
                    match decoded {
                        Ok(Some(packet)) => self.on_packet(packet),
                        Ok(None) => {}
                        Err(err) => {
                            warn!(%err, "protocol error, dropping connection");
                            self.notify_error(&SioError::Protocol(err));
                            let engine = self.engine.lock().clone();
                            self.on_engine_close(Reason::ParseError);
                            if let Some(engine) = engine {
                                engine.close();
                            }
                            return;
                        }
                    }
                }
                EnginePacketType::Ping => {
                    let handlers = self.ping_handlers.snapshot();
                    if !handlers.is_empty() {
                        tokio::spawn(async move {
                            for handler in handlers {
                                handler();
                            }
                        });
                    }
                }
                _ => {}
            }
        }
    }

    fn on_packet(self: &Arc<Self>, packet: DecodedPacket) {
        let nsp = packet.header.namespace.clone();
        let socket = self.sockets.lock().get(&nsp).cloned();
        match socket {
            Some(socket) => socket.on_packet(packet),
            None => trace!(namespace = %nsp, "packet for unknown namespace, dropping"),
        }
    }

    pub(crate) fn notify_error(&self, err: &SioError) {
        for handler in self.error_handlers.snapshot() {
            handler(err);
        }
    }

    // ------------------------------------------------------------------
    // Closing
    // ------------------------------------------------------------------

    fn on_engine_close(self: &Arc<Self>, reason: Reason) {
        {
            let mut state = self.state.lock();
            if *state == ConnState::Disconnected {
                return;
            }
            *state = ConnState::Disconnected;
        }
        debug!(%reason, "manager closed");

        *self.engine.lock() = None;
        self.decoder.lock().reset();
        self.backoff.reset();
        // Frames addressed to the dead transport are stale; sockets will
        // re-send their CONNECTs after the next open.
        self.queue.reset();

        for socket in self.sockets_snapshot() {
            socket.on_connection_close(reason);
        }
        let close_handlers = self.close_handlers.snapshot();
        tokio::spawn(async move {
            for handler in close_handlers {
                handler(reason);
            }
        });

        if !self.config.no_reconnection && !self.skip_reconnect.load(Ordering::SeqCst) {
            self.spawn_reconnect();
        }
    }

    /// Close for good once every socket went inactive.
    pub(crate) fn destroy(self: &Arc<Self>) {
        let any_active = self.sockets_snapshot().iter().any(|s| s.active());
        if any_active {
            trace!("sockets still active, keeping the manager");
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.shutdown().await;
        });
    }

    pub(crate) async fn shutdown(self: &Arc<Self>) {
        self.skip_reconnect.store(true, Ordering::SeqCst);
        // Give queued DISCONNECT packets a chance to leave.
        self.queue.wait_for_drain(Duration::from_secs(5)).await;
        let engine = self.engine.lock().clone();
        if let Some(engine) = engine {
            engine.close();
        }
        self.on_engine_close(Reason::ForcedClose);
    }

    pub(crate) fn open_in_background(self: &Arc<Self>) {
        self.skip_reconnect.store(false, Ordering::SeqCst);
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if inner.connect().await.is_err() {
                inner.maybe_reconnect_on_open();
            }
        });
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.queue.close();
    }
}

/// Client-side connection owner and reconnect controller.
///
/// Cheap to clone; all clones share the same connection state.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

impl Manager {
    pub fn new(url: impl Into<String>, dialer: Arc<dyn EngineDialer>, config: ManagerConfig) -> Self {
        let backoff = crate::Backoff::new(
            config.reconnection_delay,
            config.reconnection_delay_max,
            config.randomization_factor,
        );
        let inner = Arc::new(ManagerInner {
            url: url.into(),
            dialer,
            decoder: Mutex::new(Decoder::new(config.max_attachments)),
            config,
            sockets: Mutex::new(HashMap::new()),
            queue: Arc::new(PacketQueue::new()),
            engine: Mutex::new(None),
            state: Mutex::new(ConnState::Disconnected),
            skip_reconnect: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            backoff,
            ack_ids: AckIdGenerator::new(),
            open_handlers: HandlerStore::new(),
            ping_handlers: HandlerStore::new(),
            error_handlers: HandlerStore::new(),
            close_handlers: HandlerStore::new(),
            reconnect_handlers: HandlerStore::new(),
            reconnect_attempt_handlers: HandlerStore::new(),
            reconnect_error_handlers: HandlerStore::new(),
            reconnect_failed_handlers: HandlerStore::new(),
        });

        // One writer for the manager's lifetime; it survives reconnects and
        // always writes to whatever engine is current.
        let queue = Arc::clone(&inner.queue);
        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            loop {
                let batch = queue.poll().await;
                if batch.is_empty() {
                    break;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let engine = inner.engine.lock().clone();
                match engine {
                    Some(engine) => engine.send(batch),
                    None => trace!(dropped = batch.len(), "no engine, dropping packets"),
                }
            }
        });

        Self { inner }
    }

    /// Start one connect attempt in the background.
    pub fn open(&self) {
        self.inner.open_in_background();
    }

    /// The socket bound to `namespace`, created on first reference.
    /// `""` and `"/"` are the same namespace.
    pub fn socket(&self, namespace: &str) -> Arc<ClientSocket> {
        let name = normalize(namespace);
        let mut sockets = self.inner.sockets.lock();
        if let Some(socket) = sockets.get(&name) {
            return Arc::clone(socket);
        }
        let socket = ClientSocket::new(&self.inner, name.clone());
        sockets.insert(name, Arc::clone(&socket));
        socket
    }

    /// Disconnect every socket, wait up to five seconds for the outbound
    /// queue to drain, then drop the engine connection. Reconnection stays
    /// suppressed afterwards.
    pub async fn close(&self) {
        self.inner.skip_reconnect.store(true, Ordering::SeqCst);
        for socket in self.inner.sockets_snapshot() {
            socket.disconnect();
        }
        self.inner.shutdown().await;
    }

    // ------------------------------------------------------------------
    // Manager events
    // ------------------------------------------------------------------

    pub fn on_open(&self, handler: impl Fn() + Send + Sync + 'static) -> HandlerId {
        self.inner.open_handlers.on(Arc::new(handler))
    }

    pub fn off_open(&self, id: HandlerId) {
        self.inner.open_handlers.off(id);
    }

    /// Engine-layer heartbeat observed.
    pub fn on_ping(&self, handler: impl Fn() + Send + Sync + 'static) -> HandlerId {
        self.inner.ping_handlers.on(Arc::new(handler))
    }

    pub fn off_ping(&self, id: HandlerId) {
        self.inner.ping_handlers.off(id);
    }

    pub fn on_error(&self, handler: impl Fn(&SioError) + Send + Sync + 'static) -> HandlerId {
        self.inner.error_handlers.on(Arc::new(handler))
    }

    pub fn off_error(&self, id: HandlerId) {
        self.inner.error_handlers.off(id);
    }

    pub fn on_close(&self, handler: impl Fn(Reason) + Send + Sync + 'static) -> HandlerId {
        self.inner.close_handlers.on(Arc::new(handler))
    }

    pub fn off_close(&self, id: HandlerId) {
        self.inner.close_handlers.off(id);
    }

    /// Successful reconnection, with the number of attempts it took.
    pub fn on_reconnect(&self, handler: impl Fn(u32) + Send + Sync + 'static) -> HandlerId {
        self.inner.reconnect_handlers.on(Arc::new(handler))
    }

    pub fn off_reconnect(&self, id: HandlerId) {
        self.inner.reconnect_handlers.off(id);
    }

    pub fn on_reconnect_attempt(&self, handler: impl Fn(u32) + Send + Sync + 'static) -> HandlerId {
        self.inner.reconnect_attempt_handlers.on(Arc::new(handler))
    }

    pub fn off_reconnect_attempt(&self, id: HandlerId) {
        self.inner.reconnect_attempt_handlers.off(id);
    }

    pub fn on_reconnect_error(
        &self,
        handler: impl Fn(&SioError) + Send + Sync + 'static,
    ) -> HandlerId {
        self.inner.reconnect_error_handlers.on(Arc::new(handler))
    }

    pub fn off_reconnect_error(&self, id: HandlerId) {
        self.inner.reconnect_error_handlers.off(id);
    }

    /// The attempt bound was reached without getting through.
    pub fn on_reconnect_failed(&self, handler: impl Fn() + Send + Sync + 'static) -> HandlerId {
        self.inner.reconnect_failed_handlers.on(Arc::new(handler))
    }

    pub fn off_reconnect_failed(&self, id: HandlerId) {
        self.inner.reconnect_failed_handlers.off(id);
    }
}

fn normalize(name: &str) -> String {
    if name.is_empty() {
        return "/".to_owned();
    }
    if name.starts_with('/') {
        name.to_owned()
    } else {
        format!("/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_normalization() {
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("chat"), "/chat");
        assert_eq!(normalize("/chat"), "/chat");
    }
}
