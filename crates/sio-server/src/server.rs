use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use sio_core::{HandlerId, HandlerStore};
use sio_engine::{Callbacks, EngineConn};

use crate::adapter::AdapterFactory;
use crate::conn::ServerConn;
use crate::{InMemoryAdapter, Namespace, ServerConfig, ServerSocket};

type AnyConnectionFn = dyn Fn(&str, &Arc<ServerSocket>) + Send + Sync;

pub(crate) struct ServerShared {
    pub(crate) config: ServerConfig,
    adapter_factory: Arc<AdapterFactory>,
    namespaces: Mutex<HashMap<String, Arc<Namespace>>>,
    conns: Mutex<HashMap<u64, Arc<ServerConn>>>,
    next_conn_id: AtomicU64,
    any_connection: HandlerStore<AnyConnectionFn>,
}

impl ServerShared {
    pub(crate) fn get_namespace(self: &Arc<Self>, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces.lock().get(&normalize(name)).cloned()
    }

    pub(crate) fn get_or_create_namespace(self: &Arc<Self>, name: &str) -> Arc<Namespace> {
        let name = normalize(name);
        let mut namespaces = self.namespaces.lock();
        if let Some(nsp) = namespaces.get(&name) {
            return Arc::clone(nsp);
        }
        debug!(namespace = %name, "creating namespace");
        let nsp = Namespace::new(name.clone(), self, &self.adapter_factory);
        namespaces.insert(name, Arc::clone(&nsp));
        nsp
    }

    pub(crate) fn any_connection_snapshot(&self) -> Vec<Arc<AnyConnectionFn>> {
        self.any_connection.snapshot()
    }

    pub(crate) fn remove_conn(&self, conn_id: u64) {
        self.conns.lock().remove(&conn_id);
    }
}

/// The server front: namespace registry plus engine-connection intake.
///
/// HTTP serving and the concrete transports live outside the core; whatever
/// hosts them calls [`accept`](Server::accept) once per fresh engine
/// connection and wires the returned callbacks into the transport. Cheap to
/// clone; all clones share the same state.
#[derive(Clone)]
pub struct Server {
    shared: Arc<ServerShared>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_adapter(config, InMemoryAdapter::factory())
    }

    /// A server whose namespaces use a custom adapter.
    pub fn with_adapter(config: ServerConfig, adapter_factory: Arc<AdapterFactory>) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                config,
                adapter_factory,
                namespaces: Mutex::new(HashMap::new()),
                conns: Mutex::new(HashMap::new()),
                next_conn_id: AtomicU64::new(1),
                any_connection: HandlerStore::new(),
            }),
        }
    }

    /// The namespace with the given name, created on first reference.
    /// `""` and `"/"` are the same namespace.
    pub fn of(&self, name: &str) -> Arc<Namespace> {
        self.shared.get_or_create_namespace(name)
    }

    /// Register a connect handler on the root namespace.
    pub fn on_connection(
        &self,
        handler: impl Fn(Arc<ServerSocket>) + Send + Sync + 'static,
    ) -> HandlerId {
        self.of("/").on_connection(handler)
    }

    /// Register a handler observing connects on every namespace.
    pub fn on_any_connection(
        &self,
        handler: impl Fn(&str, &Arc<ServerSocket>) + Send + Sync + 'static,
    ) -> HandlerId {
        self.shared.any_connection.on(Arc::new(handler))
    }

    pub fn off_any_connection(&self, id: HandlerId) {
        self.shared.any_connection.off(id);
    }

    /// Take ownership of a fresh engine connection. The returned callbacks
    /// are how the engine delivers inbound frames, errors and close events
    /// for this connection.
    pub fn accept(&self, engine: Arc<dyn EngineConn>) -> Callbacks {
        let conn_id = self.shared.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (conn, callbacks) = ServerConn::new(Arc::clone(&self.shared), engine, conn_id);
        self.shared.conns.lock().insert(conn_id, conn);
        callbacks
    }

    /// Number of live engine connections.
    pub fn connection_count(&self) -> usize {
        self.shared.conns.lock().len()
    }

    /// Disconnect every socket and drop every connection.
    pub fn close(&self) {
        let namespaces: Vec<Arc<Namespace>> =
            self.shared.namespaces.lock().values().cloned().collect();
        for nsp in namespaces {
            nsp.close();
        }
        let conns: Vec<Arc<ServerConn>> = {
            let mut map = self.shared.conns.lock();
            map.drain().map(|(_, conn)| conn).collect()
        };
        for conn in conns {
            conn.close();
        }
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
