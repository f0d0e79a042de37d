use std::sync::Arc;

use parking_lot::RwLock;
use std::collections::HashMap;

use sio_core::Sid;

use crate::ServerSocket;

/// Connected sockets of one namespace, keyed by id.
///
/// The namespace is the owning side of the socket graph; everything else
/// holds weak references. Lookups snapshot under a short read lock so no
/// lock is ever held while user code runs.
pub struct SocketStore {
    sockets: RwLock<HashMap<Sid, Arc<ServerSocket>>>,
}

impl SocketStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            sockets: RwLock::new(HashMap::new()),
        })
    }

    pub fn get(&self, sid: &Sid) -> Option<Arc<ServerSocket>> {
        self.sockets.read().get(sid).cloned()
    }

    pub fn all(&self) -> Vec<Arc<ServerSocket>> {
        self.sockets.read().values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<Sid> {
        self.sockets.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sockets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.read().is_empty()
    }

    pub(crate) fn insert(&self, socket: Arc<ServerSocket>) {
        self.sockets.write().insert(socket.id().clone(), socket);
    }

    pub(crate) fn remove(&self, sid: &Sid) -> Option<Arc<ServerSocket>> {
        self.sockets.write().remove(sid)
    }
}
