use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use sio_core::{
    is_reserved_event, AckError, AckSender, AckSink, AckTable, EmitError, EventRegistry,
    HandlerId, HandlerStore, Room, Sid, SioError,
};
use sio_engine::Reason;
use sio_parser::{DecodedPacket, FromArgs, IntoArgs, PacketHeader, PacketType, Value};

use crate::conn::ServerConn;
use crate::{Adapter, BroadcastOperator, Namespace, PersistedSession};

type ReasonFn = dyn Fn(Reason) + Send + Sync;
type ErrorFn = dyn Fn(&SioError) + Send + Sync;

/// One client's session inside one namespace.
///
/// Owned by the namespace; the connection only keeps a weak index. Room
/// membership is staged locally until the connect lifecycle completes, so a
/// middleware that joins rooms and then rejects the connection leaves no
/// trace in the adapter.
pub struct ServerSocket {
    id: Sid,
    /// Private session id, present when connection state recovery is on.
    pid: Option<String>,
    recovered: bool,
    nsp_name: String,
    nsp: Weak<Namespace>,
    conn: Weak<ServerConn>,
    adapter: Arc<dyn Adapter>,
    connected: AtomicBool,
    staged_rooms: Mutex<HashSet<Room>>,
    /// Packets to replay right after the CONNECT reply, recovery only.
    missed: Mutex<Vec<(PacketHeader, Value)>>,
    acks: Arc<AckTable>,
    events: EventRegistry,
    disconnecting_handlers: HandlerStore<ReasonFn>,
    disconnect_handlers: HandlerStore<ReasonFn>,
    error_handlers: HandlerStore<ErrorFn>,
}

impl ServerSocket {
    pub(crate) fn new(
        nsp: &Arc<Namespace>,
        conn: &Arc<ServerConn>,
        session: Option<PersistedSession>,
        recovery_enabled: bool,
    ) -> Arc<Self> {
        let (id, pid, recovered, rooms, missed) = match session {
            Some(session) => (
                session.sid,
                Some(session.pid),
                true,
                session.rooms,
                session.missed,
            ),
            None => {
                let pid = recovery_enabled.then(|| Sid::random().as_str().to_owned());
                (Sid::random(), pid, false, Vec::new(), Vec::new())
            }
        };

        Arc::new(Self {
            id,
            pid,
            recovered,
            nsp_name: nsp.name().to_owned(),
            nsp: Arc::downgrade(nsp),
            conn: Arc::downgrade(conn),
            adapter: nsp.adapter(),
            connected: AtomicBool::new(false),
            staged_rooms: Mutex::new(rooms.into_iter().collect()),
            missed: Mutex::new(missed),
            acks: AckTable::new(),
            events: EventRegistry::new(),
            disconnecting_handlers: HandlerStore::new(),
            disconnect_handlers: HandlerStore::new(),
            error_handlers: HandlerStore::new(),
        })
    }

    pub fn id(&self) -> &Sid {
        &self.id
    }

    /// Whether this socket was reconstituted through connection state
    /// recovery rather than freshly connected.
    pub fn recovered(&self) -> bool {
        self.recovered
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn namespace(&self) -> Option<Arc<Namespace>> {
        self.nsp.upgrade()
    }

    pub(crate) fn acks(&self) -> &Arc<AckTable> {
        &self.acks
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Emit an event to this socket.
    pub fn emit<A: IntoArgs>(&self, event: &str, args: A) -> Result<(), EmitError> {
        self.emit_inner(event, args.into_args()?, None)
    }

    /// Emit an event and expect an acknowledgement within `timeout`.
    ///
    /// Returns immediately; `callback` runs on a worker when the ack
    /// arrives, or with [`AckError::Timeout`] when the deadline passes.
    pub fn emit_with_ack<A, R, F>(
        &self,
        event: &str,
        args: A,
        timeout: Duration,
        callback: F,
    ) -> Result<(), EmitError>
    where
        A: IntoArgs,
        R: FromArgs + Send + 'static,
        F: FnOnce(Result<R, AckError>) + Send + 'static,
    {
        if is_reserved_event(event) {
            return Err(EmitError::ReservedEvent(event.to_owned()));
        }
        let args = args.into_args()?;
        let nsp = self.nsp.upgrade().ok_or(EmitError::Closed)?;
        let id = nsp.next_ack_id();
        self.acks.register(
            id,
            timeout,
            Box::new(move |result| {
                callback(result.and_then(|args| R::from_args(args).map_err(AckError::from)));
            }),
        );
        self.emit_inner(event, args, Some(id))
    }

    fn emit_inner(&self, event: &str, args: Vec<Value>, id: Option<u64>) -> Result<(), EmitError> {
        if is_reserved_event(event) {
            return Err(EmitError::ReservedEvent(event.to_owned()));
        }
        let mut header = PacketHeader::new(PacketType::Event, self.nsp_name.clone());
        header.id = id;
        let mut payload = Vec::with_capacity(args.len() + 1);
        payload.push(Value::String(event.to_owned()));
        payload.extend(args);
        self.send_packet(header, Some(&Value::Array(payload)))
    }

    pub(crate) fn send_packet(
        &self,
        header: PacketHeader,
        payload: Option<&Value>,
    ) -> Result<(), EmitError> {
        let conn = self.conn.upgrade().ok_or(EmitError::Closed)?;
        let buffers = sio_parser::encode(header, payload)?;
        conn.send_buffers(buffers);
        Ok(())
    }

    /// Deliver pre-encoded wire buffers. This is the adapter fan-out path;
    /// the packet was encoded once for every target.
    pub fn send_encoded(&self, buffers: Vec<Bytes>) {
        if let Some(conn) = self.conn.upgrade() {
            conn.send_buffers(buffers);
        }
    }

    // ------------------------------------------------------------------
    // Rooms
    // ------------------------------------------------------------------

    pub fn join<I, R>(&self, rooms: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        let rooms: Vec<Room> = rooms.into_iter().map(Into::into).collect();
        if self.connected() {
            self.adapter.add_all(&self.id, &rooms);
        } else {
            self.staged_rooms.lock().extend(rooms);
        }
    }

    pub fn leave(&self, room: impl Into<Room>) {
        let room = room.into();
        if self.connected() {
            self.adapter.del(&self.id, &room);
        } else {
            self.staged_rooms.lock().remove(&room);
        }
    }

    /// Rooms this socket is currently subscribed to.
    pub fn rooms(&self) -> HashSet<Room> {
        if self.connected() {
            self.adapter.socket_rooms(&self.id).unwrap_or_default()
        } else {
            self.staged_rooms.lock().clone()
        }
    }

    // ------------------------------------------------------------------
    // Broadcast entry points (scoped to this socket's namespace, excluding
    // the socket itself)
    // ------------------------------------------------------------------

    pub fn to(&self, room: impl Into<Room>) -> BroadcastOperator {
        self.operator().to([room])
    }

    pub fn in_(&self, room: impl Into<Room>) -> BroadcastOperator {
        self.operator().in_([room])
    }

    pub fn except(&self, room: impl Into<Room>) -> BroadcastOperator {
        self.operator().except([room])
    }

    pub fn local(&self) -> BroadcastOperator {
        self.operator().local()
    }

    pub fn compress(&self, compress: bool) -> BroadcastOperator {
        self.operator().compress(compress)
    }

    /// Broadcast to everyone else in the namespace.
    pub fn broadcast(&self) -> BroadcastOperator {
        self.operator()
    }

    fn operator(&self) -> BroadcastOperator {
        BroadcastOperator::detached(
            &self.nsp,
            self.nsp_name.clone(),
            Arc::clone(&self.adapter),
        )
        .except([Room::from(&self.id)])
    }

    // ------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------

    pub fn on<A, F>(&self, event: &str, handler: F) -> HandlerId
    where
        A: FromArgs + Send + 'static,
        F: Fn(A, Option<AckSender>) + Send + Sync + 'static,
    {
        self.events.on(event, handler)
    }

    pub fn once<A, F>(&self, event: &str, handler: F) -> HandlerId
    where
        A: FromArgs + Send + 'static,
        F: Fn(A, Option<AckSender>) + Send + Sync + 'static,
    {
        self.events.once(event, handler)
    }

    pub fn off(&self, event: &str, id: HandlerId) {
        self.events.off(event, id);
    }

    pub fn off_event(&self, event: &str) {
        self.events.off_event(event);
    }

    pub fn off_all(&self) {
        self.events.off_all();
    }

    pub fn on_disconnecting(&self, handler: impl Fn(Reason) + Send + Sync + 'static) -> HandlerId {
        self.disconnecting_handlers.on(Arc::new(handler))
    }

    pub fn on_disconnect(&self, handler: impl Fn(Reason) + Send + Sync + 'static) -> HandlerId {
        self.disconnect_handlers.on(Arc::new(handler))
    }

    pub fn on_error(&self, handler: impl Fn(&SioError) + Send + Sync + 'static) -> HandlerId {
        self.error_handlers.on(Arc::new(handler))
    }

    pub(crate) fn notify_error(&self, err: &SioError) {
        for handler in self.error_handlers.snapshot() {
            handler(err);
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Materialize room membership, send the CONNECT reply and replay any
    /// missed packets. Runs before user connect handlers observe the socket.
    pub(crate) fn on_connect(&self) -> Result<(), EmitError> {
        self.connected.store(true, Ordering::SeqCst);

        let mut rooms: Vec<Room> = self.staged_rooms.lock().drain().collect();
        rooms.push(Room::from(&self.id));
        self.adapter.add_all(&self.id, &rooms);

        let mut payload = serde_json::Map::new();
        payload.insert(
            "sid".to_owned(),
            serde_json::Value::String(self.id.as_str().to_owned()),
        );
        if let Some(pid) = &self.pid {
            payload.insert("pid".to_owned(), serde_json::Value::String(pid.clone()));
        }
        let header = PacketHeader::new(PacketType::Connect, self.nsp_name.clone());
        self.send_packet(
            header,
            Some(&Value::from_json(serde_json::Value::Object(payload))),
        )?;

        let missed: Vec<(PacketHeader, Value)> = std::mem::take(&mut *self.missed.lock());
        for (mut header, payload) in missed {
            header.namespace = self.nsp_name.clone();
            if let Err(err) = self.send_packet(header, Some(&payload)) {
                warn!(sid = %self.id, %err, "failed to replay missed packet");
            }
        }
        Ok(())
    }

    /// Server-initiated disconnect. With `close` the whole transport goes
    /// down; without it only this namespace is detached.
    pub fn disconnect(&self, close: bool) {
        if close {
            if let Some(conn) = self.conn.upgrade() {
                conn.close();
            }
            return;
        }
        let header = PacketHeader::new(PacketType::Disconnect, self.nsp_name.clone());
        if let Err(err) = self.send_packet(header, None) {
            debug!(sid = %self.id, %err, "disconnect packet not sent");
        }
        self.teardown(Reason::ServerNamespaceDisconnect, false);
    }

    /// Transport went away underneath us.
    pub(crate) fn on_close(&self, reason: Reason) {
        let recoverable = matches!(
            reason,
            Reason::TransportClose | Reason::TransportError | Reason::PingTimeout
        );
        self.teardown(reason, recoverable);
    }

    fn teardown(&self, reason: Reason, recoverable: bool) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        trace!(sid = %self.id, %reason, "socket teardown");

        // "disconnecting" observers still see the room subscriptions.
        for handler in self.disconnecting_handlers.snapshot() {
            handler(reason);
        }

        if recoverable {
            if let Some(pid) = &self.pid {
                let rooms: Vec<Room> = self
                    .adapter
                    .socket_rooms(&self.id)
                    .unwrap_or_default()
                    .into_iter()
                    .collect();
                self.adapter.persist_session(PersistedSession {
                    sid: self.id.clone(),
                    pid: pid.clone(),
                    rooms,
                    missed: Vec::new(),
                });
            }
        }

        self.adapter.del_all(&self.id);
        if let Some(nsp) = self.nsp.upgrade() {
            nsp.remove(&self.id);
        }
        if let Some(conn) = self.conn.upgrade() {
            conn.detach(&self.nsp_name);
        }
        self.acks.fail_all();

        for handler in self.disconnect_handlers.snapshot() {
            handler(reason);
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    pub(crate) fn on_packet(self: &Arc<Self>, packet: DecodedPacket) -> Result<(), SioError> {
        match packet.header.packet_type {
            PacketType::Event | PacketType::BinaryEvent => self.dispatch_event(packet),
            PacketType::Ack | PacketType::BinaryAck => {
                let id = packet
                    .header
                    .id
                    .ok_or_else(|| SioError::Internal("ack packet without an id".to_owned()))?;
                let args = packet.args()?;
                let acks = Arc::clone(&self.acks);
                tokio::spawn(async move {
                    acks.resolve(id, args);
                });
                Ok(())
            }
            PacketType::Disconnect => {
                self.teardown(Reason::ClientNamespaceDisconnect, false);
                Ok(())
            }
            other => Err(SioError::Internal(format!(
                "unexpected {other:?} packet for an attached namespace"
            ))),
        }
    }

    fn dispatch_event(self: &Arc<Self>, packet: DecodedPacket) -> Result<(), SioError> {
        let event = packet.event().unwrap_or_default().to_owned();
        let ack_id = packet.header.id;
        let args = packet.args()?;

        let handlers = self.events.handlers(&event);
        if handlers.is_empty() {
            trace!(sid = %self.id, %event, "no handlers registered");
            return Ok(());
        }

        let ack = ack_id.map(|id| AckSender::new(id, Arc::clone(self) as Arc<dyn AckSink>));
        let socket = Arc::clone(self);
        tokio::spawn(async move {
            for handler in handlers {
                if let Err(err) = handler(args.clone(), ack.clone()) {
                    socket.notify_error(&SioError::Dispatch(err));
                }
            }
        });
        Ok(())
    }
}

impl AckSink for ServerSocket {
    fn send_ack(&self, id: u64, args: Vec<Value>) -> Result<(), EmitError> {
        let mut header = PacketHeader::new(PacketType::Ack, self.nsp_name.clone());
        header.id = Some(id);
        self.send_packet(header, Some(&Value::Array(args)))
    }
}

impl std::fmt::Debug for ServerSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSocket")
            .field("id", &self.id)
            .field("namespace", &self.nsp_name)
            .field("connected", &self.connected())
            .field("recovered", &self.recovered)
            .finish()
    }
}
