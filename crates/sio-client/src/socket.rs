use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace, warn};

use sio_core::{
    is_reserved_event, AckError, AckSender, AckSink, AckTable, EmitError, EventRegistry,
    HandlerId, HandlerStore, Sid, SioError,
};
use sio_engine::Reason;
use sio_parser::{DecodedPacket, FromArgs, IntoArgs, PacketHeader, PacketType, Value};

use crate::manager::ManagerInner;

/// Auth payloads must be JSON objects (or null): anything else cannot carry
/// the recovery fields and is rejected by the server side.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("auth must serialize to a JSON object or be null")]
    NonJsonAuth,

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketState {
    Disconnected,
    Connecting,
    Connected,
}

type VoidFn = dyn Fn() + Send + Sync;
type ReasonFn = dyn Fn(Reason) + Send + Sync;
type ErrorFn = dyn Fn(&SioError) + Send + Sync;
type ConnectErrorFn = dyn Fn(&serde_json::Value) + Send + Sync;

/// Client-side mirror of one namespace session.
///
/// Emits issued before the namespace handshake completes are buffered in
/// order and flushed on CONNECT. Across manager reconnects the socket
/// reattaches by itself as long as the user has not disconnected it.
pub struct ClientSocket {
    namespace: String,
    manager: Weak<ManagerInner>,
    state: Mutex<SocketState>,
    /// Set by `connect`, cleared by user disconnect, namespace rejection
    /// and server kick; drives reattach-on-reconnect and manager teardown.
    wants_connection: AtomicBool,
    id: Mutex<Option<Sid>>,
    auth: Mutex<serde_json::Value>,
    /// Connection state recovery context received from the server.
    pid: Mutex<Option<String>>,
    offset: Mutex<Option<String>>,
    send_buffer: Mutex<Vec<Vec<Bytes>>>,
    acks: Arc<AckTable>,
    events: EventRegistry,
    connect_handlers: HandlerStore<VoidFn>,
    disconnect_handlers: HandlerStore<ReasonFn>,
    connect_error_handlers: HandlerStore<ConnectErrorFn>,
    error_handlers: HandlerStore<ErrorFn>,
}

impl ClientSocket {
    pub(crate) fn new(manager: &Arc<ManagerInner>, namespace: String) -> Arc<Self> {
        Arc::new(Self {
            namespace,
            manager: Arc::downgrade(manager),
            state: Mutex::new(SocketState::Disconnected),
            wants_connection: AtomicBool::new(false),
            id: Mutex::new(None),
            auth: Mutex::new(serde_json::Value::Null),
            pid: Mutex::new(None),
            offset: Mutex::new(None),
            send_buffer: Mutex::new(Vec::new()),
            acks: AckTable::new(),
            events: EventRegistry::new(),
            connect_handlers: HandlerStore::new(),
            disconnect_handlers: HandlerStore::new(),
            connect_error_handlers: HandlerStore::new(),
            error_handlers: HandlerStore::new(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Server-assigned socket id, present while connected.
    pub fn id(&self) -> Option<Sid> {
        self.id.lock().clone()
    }

    pub fn connected(&self) -> bool {
        *self.state.lock() == SocketState::Connected
    }

    /// Whether the user wants this socket connected. Inactive sockets do
    /// not reattach on reconnect, and a manager with no active sockets
    /// closes itself.
    pub fn active(&self) -> bool {
        self.wants_connection.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Auth
    // ------------------------------------------------------------------

    /// Set the auth blob sent with the namespace CONNECT.
    pub fn set_auth(&self, auth: impl Serialize) -> Result<(), AuthError> {
        let value = serde_json::to_value(auth)?;
        if !(value.is_object() || value.is_null()) {
            return Err(AuthError::NonJsonAuth);
        }
        *self.auth.lock() = value;
        Ok(())
    }

    pub fn auth(&self) -> serde_json::Value {
        self.auth.lock().clone()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Connect this namespace, opening the manager's transport when needed.
    pub fn connect(self: &Arc<Self>) {
        self.wants_connection.store(true, Ordering::SeqCst);
        {
            let mut state = self.state.lock();
            if *state != SocketState::Disconnected {
                return;
            }
            *state = SocketState::Connecting;
        }
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        if manager.is_open() {
            self.send_connect_packet(&manager);
        } else {
            manager.open_in_background();
        }
    }

    /// Disconnect this namespace only; the transport stays up while other
    /// namespaces use it, and the manager closes once none are active.
    pub fn disconnect(self: &Arc<Self>) {
        self.wants_connection.store(false, Ordering::SeqCst);
        if self.connected() {
            if let Some(manager) = self.manager.upgrade() {
                let header = PacketHeader::new(PacketType::Disconnect, self.namespace.clone());
                match sio_parser::encode(header, None) {
                    Ok(buffers) => manager.send_buffers(buffers),
                    Err(err) => debug!(%err, "disconnect packet not sent"),
                }
            }
        }
        self.teardown(Reason::IoClientDisconnect);
        if let Some(manager) = self.manager.upgrade() {
            manager.destroy();
        }
    }

    /// Engine opened (first time or reconnect): reattach if the user still
    /// wants this namespace.
    pub(crate) fn on_manager_open(self: &Arc<Self>) {
        if !self.wants_connection.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock();
            if *state == SocketState::Connected {
                return;
            }
            *state = SocketState::Connecting;
        }
        if let Some(manager) = self.manager.upgrade() {
            self.send_connect_packet(&manager);
        }
    }

    /// The manager's transport went away.
    pub(crate) fn on_connection_close(self: &Arc<Self>, reason: Reason) {
        self.teardown(reason);
    }

    fn send_connect_packet(&self, manager: &Arc<ManagerInner>) {
        let mut auth = self.auth.lock().clone();
        let recovery = (self.pid.lock().clone(), self.offset.lock().clone());
        if let (Some(pid), Some(offset)) = recovery {
            if !auth.is_object() {
                auth = serde_json::Value::Object(serde_json::Map::new());
            }
            if let Some(fields) = auth.as_object_mut() {
                fields.insert("sessionID".to_owned(), serde_json::Value::String(pid));
                fields.insert("offset".to_owned(), serde_json::Value::String(offset));
            }
        }

        let header = PacketHeader::new(PacketType::Connect, self.namespace.clone());
        let payload = if auth.is_null() {
            None
        } else {
            Some(Value::from_json(auth))
        };
        trace!(namespace = %self.namespace, "sending CONNECT");
        match sio_parser::encode(header, payload.as_ref()) {
            Ok(buffers) => manager.send_buffers(buffers),
            Err(err) => self.notify_error(&SioError::Encode(err)),
        }
    }

    fn teardown(self: &Arc<Self>, reason: Reason) {
        let was = {
            let mut state = self.state.lock();
            let was = *state;
            *state = SocketState::Disconnected;
            was
        };
        *self.id.lock() = None;
        self.acks.fail_all();

        if was == SocketState::Connected {
            let handlers = self.disconnect_handlers.snapshot();
            tokio::spawn(async move {
                for handler in handlers {
                    handler(reason);
                }
            });
        }
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Emit an event. Before the namespace handshake completes the packet
    /// is buffered and flushed on connect.
    pub fn emit<A: IntoArgs>(&self, event: &str, args: A) -> Result<(), EmitError> {
        self.emit_inner(event, args.into_args()?, None)
    }

    /// Emit and expect an acknowledgement within `timeout`.
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
        let manager = self.manager.upgrade().ok_or(EmitError::Closed)?;
        let id = manager.next_ack_id();
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
        let manager = self.manager.upgrade().ok_or(EmitError::Closed)?;

        let mut header = PacketHeader::new(PacketType::Event, self.namespace.clone());
        header.id = id;
        let mut payload = Vec::with_capacity(args.len() + 1);
        payload.push(Value::String(event.to_owned()));
        payload.extend(args);
        let buffers = sio_parser::encode(header, Some(&Value::Array(payload)))?;

        if self.connected() {
            manager.send_buffers(buffers);
        } else {
            trace!(event, "buffering emit until connected");
            self.send_buffer.lock().push(buffers);
        }
        Ok(())
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

    pub fn on_connect(&self, handler: impl Fn() + Send + Sync + 'static) -> HandlerId {
        self.connect_handlers.on(Arc::new(handler))
    }

    pub fn off_connect(&self, id: HandlerId) {
        self.connect_handlers.off(id);
    }

    pub fn on_disconnect(&self, handler: impl Fn(Reason) + Send + Sync + 'static) -> HandlerId {
        self.disconnect_handlers.on(Arc::new(handler))
    }

    pub fn off_disconnect(&self, id: HandlerId) {
        self.disconnect_handlers.off(id);
    }

    /// The server rejected the namespace connection; the payload is the
    /// CONNECT_ERROR body, usually `{"message": ...}`.
    pub fn on_connect_error(
        &self,
        handler: impl Fn(&serde_json::Value) + Send + Sync + 'static,
    ) -> HandlerId {
        self.connect_error_handlers.on(Arc::new(handler))
    }

    pub fn off_connect_error(&self, id: HandlerId) {
        self.connect_error_handlers.off(id);
    }

    pub fn on_error(&self, handler: impl Fn(&SioError) + Send + Sync + 'static) -> HandlerId {
        self.error_handlers.on(Arc::new(handler))
    }

    pub fn off_error(&self, id: HandlerId) {
        self.error_handlers.off(id);
    }

    pub(crate) fn notify_error(&self, err: &SioError) {
        for handler in self.error_handlers.snapshot() {
            handler(err);
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    pub(crate) fn on_packet(self: &Arc<Self>, packet: DecodedPacket) {
        match packet.header.packet_type {
            PacketType::Connect => self.on_connect_packet(packet),
            PacketType::ConnectError => self.on_connect_error_packet(packet),
            PacketType::Event | PacketType::BinaryEvent => self.dispatch_event(packet),
            PacketType::Ack | PacketType::BinaryAck => self.on_ack(packet),
            PacketType::Disconnect => {
                // Kicked from the namespace; reconnecting the transport
                // must not silently rejoin.
                self.wants_connection.store(false, Ordering::SeqCst);
                self.teardown(Reason::IoServerDisconnect);
            }
        }
    }

    fn on_connect_packet(self: &Arc<Self>, packet: DecodedPacket) {
        let Some(sid) = packet
            .payload_json()
            .and_then(|payload| payload.get("sid"))
            .and_then(serde_json::Value::as_str)
        else {
            warn!(namespace = %self.namespace, "CONNECT without a sid");
            self.notify_error(&SioError::Internal(
                "CONNECT reply did not carry a socket id".to_owned(),
            ));
            return;
        };
        *self.id.lock() = Some(Sid::from(sid));
        if let Some(pid) = packet
            .payload_json()
            .and_then(|payload| payload.get("pid"))
            .and_then(serde_json::Value::as_str)
        {
            *self.pid.lock() = Some(pid.to_owned());
        }
        *self.state.lock() = SocketState::Connected;
        debug!(namespace = %self.namespace, sid, "socket connected");

        let buffered: Vec<Vec<Bytes>> = std::mem::take(&mut *self.send_buffer.lock());
        if let Some(manager) = self.manager.upgrade() {
            for buffers in buffered {
                manager.send_buffers(buffers);
            }
        }

        let handlers = self.connect_handlers.snapshot();
        tokio::spawn(async move {
            for handler in handlers {
                handler();
            }
        });
    }

    fn on_connect_error_packet(self: &Arc<Self>, packet: DecodedPacket) {
        // A rejected namespace is not retried by the reconnect logic.
        self.wants_connection.store(false, Ordering::SeqCst);
        *self.state.lock() = SocketState::Disconnected;
        self.acks.fail_all();

        let payload = packet
            .payload_json()
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        debug!(namespace = %self.namespace, %payload, "connect rejected");
        let handlers = self.connect_error_handlers.snapshot();
        tokio::spawn(async move {
            for handler in handlers {
                handler(&payload);
            }
        });
    }

    fn dispatch_event(self: &Arc<Self>, packet: DecodedPacket) {
        let event = packet.event().unwrap_or_default().to_owned();
        let ack_id = packet.header.id;
        let mut args = match packet.args() {
            Ok(args) => args,
            Err(err) => {
                self.notify_error(&SioError::Protocol(err));
                return;
            }
        };

        // Under connection state recovery the server stamps each event with
        // its offset as the trailing argument; remember it for the next
        // CONNECT and keep it away from user handlers.
        if self.pid.lock().is_some() {
            if let Some(Value::String(offset)) = args.last() {
                let offset = offset.clone();
                args.pop();
                *self.offset.lock() = Some(offset);
            }
        }

        let handlers = self.events.handlers(&event);
        if handlers.is_empty() {
            trace!(namespace = %self.namespace, %event, "no handlers registered");
            return;
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
    }

    fn on_ack(self: &Arc<Self>, packet: DecodedPacket) {
        let Some(id) = packet.header.id else {
            return;
        };
        let args = match packet.args() {
            Ok(args) => args,
            Err(err) => {
                self.notify_error(&SioError::Protocol(err));
                return;
            }
        };
        let acks = Arc::clone(&self.acks);
        tokio::spawn(async move {
            acks.resolve(id, args);
        });
    }
}

impl AckSink for ClientSocket {
    fn send_ack(&self, id: u64, args: Vec<Value>) -> Result<(), EmitError> {
        let manager = self.manager.upgrade().ok_or(EmitError::Closed)?;
        let mut header = PacketHeader::new(PacketType::Ack, self.namespace.clone());
        header.id = Some(id);
        let buffers = sio_parser::encode(header, Some(&Value::Array(args)))?;
        manager.send_buffers(buffers);
        Ok(())
    }
}

impl std::fmt::Debug for ClientSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSocket")
            .field("namespace", &self.namespace)
            .field("connected", &self.connected())
            .field("active", &self.active())
            .finish()
    }
}
