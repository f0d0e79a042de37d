use std::error::Error;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use thiserror::Error as ThisError;
use tracing::{debug, warn};

use sio_core::{
    is_reserved_event, AckIdGenerator, EmitError, EventRegistry, HandlerId, HandlerStore, Room,
    Sid,
};
use sio_parser::{FromArgs, IntoArgs, Value};

use crate::adapter::AdapterFactory;
use crate::conn::ServerConn;
use crate::handshake::recovery_fields;
use crate::server::ServerShared;
use crate::{
    Adapter, BroadcastOperator, ConnectionStateRecovery, Handshake, ServerSocket, SessionAwareAdapter,
    SocketStore,
};

/// Middleware run against every incoming connection, in registration order.
/// An error aborts the connect and its message travels to the client in a
/// CONNECT_ERROR packet.
pub type Middleware = dyn Fn(&Arc<ServerSocket>, &Handshake) -> Result<(), Box<dyn Error + Send + Sync>>
    + Send
    + Sync;

/// A middleware or namespace-level rejection of an incoming connection.
#[derive(Debug, ThisError)]
#[error("{0}")]
pub struct ConnectRejection(pub String);

type ConnectFn = dyn Fn(Arc<ServerSocket>) + Send + Sync;

/// A logical channel multiplexed over every physical connection.
///
/// Created on first reference and kept for the lifetime of the server. Owns
/// its sockets, its middleware chain and its adapter.
pub struct Namespace {
    name: String,
    server: Weak<ServerShared>,
    recovery: ConnectionStateRecovery,
    sockets: Arc<SocketStore>,
    adapter: Arc<dyn Adapter>,
    middlewares: RwLock<Vec<Arc<Middleware>>>,
    connect_handlers: HandlerStore<ConnectFn>,
    /// Handlers for events arriving via `server_side_emit` from other nodes
    /// (or, on a single node, from the local loopback).
    server_side_events: EventRegistry,
    ack_ids: AckIdGenerator,
}

impl Namespace {
    pub(crate) fn new(
        name: String,
        server: &Arc<ServerShared>,
        factory: &Arc<AdapterFactory>,
    ) -> Arc<Self> {
        let recovery = server.config.connection_state_recovery.clone();
        Arc::new_cyclic(|weak: &Weak<Namespace>| {
            let sockets = SocketStore::new();
            let fan = Weak::clone(weak);
            let local_fan: Arc<dyn Fn(&str, Vec<Value>) + Send + Sync> =
                Arc::new(move |event, args| {
                    if let Some(nsp) = fan.upgrade() {
                        nsp.dispatch_server_side(event, args);
                    }
                });

            let mut adapter = factory(Arc::clone(&sockets), local_fan);
            if recovery.enabled {
                adapter = Arc::new(SessionAwareAdapter::new(
                    adapter,
                    recovery.max_disconnection_duration,
                ));
            }

            Namespace {
                name,
                server: Arc::downgrade(server),
                recovery,
                sockets,
                adapter,
                middlewares: RwLock::new(Vec::new()),
                connect_handlers: HandlerStore::new(),
                server_side_events: EventRegistry::new(),
                ack_ids: AckIdGenerator::new(),
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn adapter(&self) -> Arc<dyn Adapter> {
        Arc::clone(&self.adapter)
    }

    pub(crate) fn sockets_store(&self) -> Arc<SocketStore> {
        Arc::clone(&self.sockets)
    }

    pub(crate) fn next_ack_id(&self) -> u64 {
        self.ack_ids.next()
    }

    /// Connected sockets of this namespace, local node.
    pub fn sockets(&self) -> Vec<Arc<ServerSocket>> {
        self.sockets.all()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub fn use_middleware(
        &self,
        middleware: impl Fn(&Arc<ServerSocket>, &Handshake) -> Result<(), Box<dyn Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    ) {
        self.middlewares.write().push(Arc::new(middleware));
    }

    pub fn on_connection(
        &self,
        handler: impl Fn(Arc<ServerSocket>) + Send + Sync + 'static,
    ) -> HandlerId {
        self.connect_handlers.on(Arc::new(handler))
    }

    pub fn once_connection(
        &self,
        handler: impl Fn(Arc<ServerSocket>) + Send + Sync + 'static,
    ) -> HandlerId {
        self.connect_handlers.once(Arc::new(handler))
    }

    pub fn off_connection(&self, id: HandlerId) {
        self.connect_handlers.off(id);
    }

    pub fn on_server_side_emit<A, F>(&self, event: &str, handler: F) -> HandlerId
    where
        A: FromArgs + Send + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        self.server_side_events
            .on(event, move |args: A, _ack| handler(args))
    }

    // ------------------------------------------------------------------
    // Broadcast surface
    // ------------------------------------------------------------------

    pub fn operator(self: &Arc<Self>) -> BroadcastOperator {
        BroadcastOperator::new(self)
    }

    /// Emit to every connected socket in this namespace.
    pub fn emit<A: IntoArgs>(self: &Arc<Self>, event: &str, args: A) -> Result<(), EmitError> {
        self.operator().emit(event, args)
    }

    pub fn to<I, R>(self: &Arc<Self>, rooms: I) -> BroadcastOperator
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        self.operator().to(rooms)
    }

    pub fn in_<I, R>(self: &Arc<Self>, rooms: I) -> BroadcastOperator
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        self.operator().in_(rooms)
    }

    pub fn except<I, R>(self: &Arc<Self>, rooms: I) -> BroadcastOperator
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        self.operator().except(rooms)
    }

    pub fn local(self: &Arc<Self>) -> BroadcastOperator {
        self.operator().local()
    }

    pub fn compress(self: &Arc<Self>, compress: bool) -> BroadcastOperator {
        self.operator().compress(compress)
    }

    pub fn fetch_sockets(self: &Arc<Self>) -> Vec<Arc<ServerSocket>> {
        self.operator().fetch_sockets()
    }

    pub fn sockets_join<I, R>(self: &Arc<Self>, rooms: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        self.operator().sockets_join(rooms)
    }

    pub fn sockets_leave<I, R>(self: &Arc<Self>, rooms: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        self.operator().sockets_leave(rooms)
    }

    pub fn disconnect_sockets(self: &Arc<Self>, close: bool) {
        self.operator().disconnect_sockets(close)
    }

    /// Send an event to the other servers of the cluster. On a single node
    /// this loops straight back to [`on_server_side_emit`] handlers.
    pub fn server_side_emit<A: IntoArgs>(&self, event: &str, args: A) -> Result<(), EmitError> {
        if is_reserved_event(event) {
            return Err(EmitError::ReservedEvent(event.to_owned()));
        }
        self.adapter.server_side_emit(event, args.into_args()?);
        Ok(())
    }

    fn dispatch_server_side(self: &Arc<Self>, event: &str, args: Vec<Value>) {
        let handlers = self.server_side_events.handlers(event);
        if handlers.is_empty() {
            return;
        }
        let event = event.to_owned();
        tokio::spawn(async move {
            for handler in handlers {
                if let Err(err) = handler(args.clone(), None) {
                    warn!(%event, %err, "server-side event handler rejected arguments");
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Connect lifecycle
    // ------------------------------------------------------------------

    pub(crate) fn add(
        self: &Arc<Self>,
        conn: &Arc<ServerConn>,
        auth: serde_json::Value,
    ) -> Result<Arc<ServerSocket>, ConnectRejection> {
        let handshake = Handshake::new(auth);

        let mut socket: Option<Arc<ServerSocket>> = None;
        if self.recovery.enabled {
            if let Some((pid, offset)) = recovery_fields(&handshake.auth) {
                if let Some(session) = self.adapter.restore_session(&pid, &offset) {
                    socket = Some(ServerSocket::new(self, conn, Some(session), true));
                }
            }
        }

        let recovered = socket.is_some();
        let socket =
            socket.unwrap_or_else(|| ServerSocket::new(self, conn, None, self.recovery.enabled));

        // A recovered socket already passed the middleware chain in its
        // first life; rerunning it is opt-in.
        if !(recovered && !self.recovery.use_middlewares) {
            self.run_middlewares(&socket, &handshake)
                .map_err(|err| ConnectRejection(err.to_string()))?;
        }

        self.do_connect(&socket)?;
        Ok(socket)
    }

    fn run_middlewares(
        &self,
        socket: &Arc<ServerSocket>,
        handshake: &Handshake,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let middlewares = self.middlewares.read();
        for middleware in middlewares.iter() {
            middleware(socket, handshake)?;
        }
        Ok(())
    }

    fn do_connect(self: &Arc<Self>, socket: &Arc<ServerSocket>) -> Result<(), ConnectRejection> {
        self.sockets.insert(Arc::clone(socket));

        // The internal connect logic has to complete before user handlers
        // observe the socket, or a fast disconnect could overtake it.
        if let Err(err) = socket.on_connect() {
            self.sockets.remove(socket.id());
            return Err(ConnectRejection(err.to_string()));
        }
        debug!(namespace = %self.name, sid = %socket.id(), recovered = socket.recovered(), "socket connected");

        let connect_handlers = self.connect_handlers.snapshot();
        let any_handlers = self
            .server
            .upgrade()
            .map(|server| server.any_connection_snapshot())
            .unwrap_or_default();
        let name = self.name.clone();
        let socket = Arc::clone(socket);
        tokio::spawn(async move {
            for handler in any_handlers {
                handler(&name, &socket);
            }
            for handler in connect_handlers {
                handler(Arc::clone(&socket));
            }
        });
        Ok(())
    }

    pub(crate) fn remove(&self, sid: &Sid) {
        self.sockets.remove(sid);
    }

    /// Disconnect everything, used at server shutdown.
    pub(crate) fn close(&self) {
        for socket in self.sockets.all() {
            socket.disconnect(true);
        }
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("sockets", &self.sockets.len())
            .finish()
    }
}
