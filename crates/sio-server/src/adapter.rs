use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use sio_core::{AckError, EmitError, Room, Sid};
use sio_parser::{PacketHeader, Value};

use crate::{PersistedSession, SocketStore};

/// Accumulated broadcast filter set.
#[derive(Debug, Clone, Default)]
pub struct BroadcastOptions {
    /// Target rooms; empty means every socket in the namespace.
    pub rooms: HashSet<Room>,
    /// Rooms whose members are excluded from the target set.
    pub except: HashSet<Room>,
    /// Restrict the broadcast to this node.
    pub local: bool,
    /// Ask the transport to compress the frames. Advisory.
    pub compress: bool,
}

/// Callback invoked once per broadcast-ack responder, or once with a
/// timeout error when the deadline passes with responders still missing.
pub type BroadcastAck = Arc<dyn Fn(Result<Vec<Value>, AckError>) + Send + Sync>;

/// Factory installed per namespace.
pub type AdapterFactory =
    dyn Fn(Arc<SocketStore>, Arc<dyn Fn(&str, Vec<Value>) + Send + Sync>) -> Arc<dyn Adapter>
        + Send
        + Sync;

/// Room membership index and broadcast fan-out for one namespace.
///
/// Implementations other than [`InMemoryAdapter`] may span several nodes;
/// the trait deliberately stays message-shaped so a cluster adapter only
/// has to forward what it receives. Session persistence is part of the
/// adapter because that is where missed broadcasts can be observed.
pub trait Adapter: Send + Sync {
    fn add_all(&self, sid: &Sid, rooms: &[Room]);

    fn del(&self, sid: &Sid, room: &Room);

    fn del_all(&self, sid: &Sid);

    /// Encode once and deliver to every socket selected by `opts`.
    fn broadcast(
        &self,
        header: PacketHeader,
        payload: Value,
        opts: &BroadcastOptions,
    ) -> Result<(), EmitError>;

    /// Broadcast expecting one acknowledgement per target socket.
    fn broadcast_with_ack(
        &self,
        header: PacketHeader,
        payload: Value,
        opts: &BroadcastOptions,
        ack_id: u64,
        timeout: Duration,
        ack: BroadcastAck,
    ) -> Result<(), EmitError>;

    /// Socket ids selected by the filter set.
    fn sockets(&self, opts: &BroadcastOptions) -> HashSet<Sid>;

    /// Rooms a socket is currently a member of, `None` for unknown sockets.
    fn socket_rooms(&self, sid: &Sid) -> Option<HashSet<Room>>;

    /// Cluster hook. The in-process implementation only fans the event out
    /// to locally registered server-side handlers.
    fn server_side_emit(&self, event: &str, args: Vec<Value>);

    /// Connection-state-recovery hook; the default adapter recovers nothing.
    fn restore_session(&self, pid: &str, offset: &str) -> Option<PersistedSession> {
        let _ = (pid, offset);
        None
    }

    /// Store a disconnected socket's session for later recovery.
    fn persist_session(&self, session: PersistedSession) {
        let _ = session;
    }
}

impl<A: Adapter + ?Sized> Adapter for Arc<A> {
    fn add_all(&self, sid: &Sid, rooms: &[Room]) {
        (**self).add_all(sid, rooms)
    }

    fn del(&self, sid: &Sid, room: &Room) {
        (**self).del(sid, room)
    }

    fn del_all(&self, sid: &Sid) {
        (**self).del_all(sid)
    }

    fn broadcast(
        &self,
        header: PacketHeader,
        payload: Value,
        opts: &BroadcastOptions,
    ) -> Result<(), EmitError> {
        (**self).broadcast(header, payload, opts)
    }

    fn broadcast_with_ack(
        &self,
        header: PacketHeader,
        payload: Value,
        opts: &BroadcastOptions,
        ack_id: u64,
        timeout: Duration,
        ack: BroadcastAck,
    ) -> Result<(), EmitError> {
        (**self).broadcast_with_ack(header, payload, opts, ack_id, timeout, ack)
    }

    fn sockets(&self, opts: &BroadcastOptions) -> HashSet<Sid> {
        (**self).sockets(opts)
    }

    fn socket_rooms(&self, sid: &Sid) -> Option<HashSet<Room>> {
        (**self).socket_rooms(sid)
    }

    fn server_side_emit(&self, event: &str, args: Vec<Value>) {
        (**self).server_side_emit(event, args)
    }

    fn restore_session(&self, pid: &str, offset: &str) -> Option<PersistedSession> {
        (**self).restore_session(pid, offset)
    }

    fn persist_session(&self, session: PersistedSession) {
        (**self).persist_session(session)
    }
}

#[derive(Default)]
struct RoomIndex {
    rooms: HashMap<Room, HashSet<Sid>>,
    sids: HashMap<Sid, HashSet<Room>>,
}

impl RoomIndex {
    fn add(&mut self, sid: &Sid, room: &Room) {
        self.rooms
            .entry(room.clone())
            .or_default()
            .insert(sid.clone());
        self.sids
            .entry(sid.clone())
            .or_default()
            .insert(room.clone());
    }

    fn del(&mut self, sid: &Sid, room: &Room) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(sid);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
        if let Some(rooms) = self.sids.get_mut(sid) {
            rooms.remove(room);
            if rooms.is_empty() {
                self.sids.remove(sid);
            }
        }
    }

    fn del_all(&mut self, sid: &Sid) {
        let Some(rooms) = self.sids.remove(sid) else {
            return;
        };
        for room in rooms {
            if let Some(members) = self.rooms.get_mut(&room) {
                members.remove(sid);
                if members.is_empty() {
                    self.rooms.remove(&room);
                }
            }
        }
    }

    fn members(&self, room: &Room) -> HashSet<Sid> {
        self.rooms.get(room).cloned().unwrap_or_default()
    }
}

/// The default single-node adapter.
pub struct InMemoryAdapter {
    sockets: Arc<SocketStore>,
    index: Mutex<RoomIndex>,
    /// Local fan-out for `server_side_emit`, wired to the owning
    /// namespace's server-side handlers.
    local_fan: Arc<dyn Fn(&str, Vec<Value>) + Send + Sync>,
}

impl InMemoryAdapter {
    pub fn new(
        sockets: Arc<SocketStore>,
        local_fan: Arc<dyn Fn(&str, Vec<Value>) + Send + Sync>,
    ) -> Self {
        Self {
            sockets,
            index: Mutex::new(RoomIndex::default()),
            local_fan,
        }
    }

    /// The factory namespaces use unless configured otherwise.
    pub fn factory() -> Arc<AdapterFactory> {
        Arc::new(|sockets, local_fan| Arc::new(InMemoryAdapter::new(sockets, local_fan)))
    }

    fn select(&self, opts: &BroadcastOptions) -> HashSet<Sid> {
        let index = self.index.lock();
        let mut excluded: HashSet<Sid> = HashSet::new();
        for room in &opts.except {
            excluded.extend(index.members(room));
        }

        if opts.rooms.is_empty() {
            self.sockets
                .ids()
                .into_iter()
                .filter(|sid| !excluded.contains(sid))
                .collect()
        } else {
            let mut out = HashSet::new();
            for room in &opts.rooms {
                out.extend(index.members(room));
            }
            out.retain(|sid| !excluded.contains(sid));
            out
        }
    }
}

impl Adapter for InMemoryAdapter {
    fn add_all(&self, sid: &Sid, rooms: &[Room]) {
        let mut index = self.index.lock();
        for room in rooms {
            index.add(sid, room);
        }
    }

    fn del(&self, sid: &Sid, room: &Room) {
        self.index.lock().del(sid, room);
    }

    fn del_all(&self, sid: &Sid) {
        self.index.lock().del_all(sid);
    }

    fn broadcast(
        &self,
        header: PacketHeader,
        payload: Value,
        opts: &BroadcastOptions,
    ) -> Result<(), EmitError> {
        let targets = self.select(opts);
        let buffers = sio_parser::encode(header, Some(&payload))?;
        trace!(targets = targets.len(), "broadcasting");
        for sid in targets {
            if let Some(socket) = self.sockets.get(&sid) {
                socket.send_encoded(buffers.clone());
            }
        }
        Ok(())
    }

    fn broadcast_with_ack(
        &self,
        mut header: PacketHeader,
        payload: Value,
        opts: &BroadcastOptions,
        ack_id: u64,
        timeout: Duration,
        ack: BroadcastAck,
    ) -> Result<(), EmitError> {
        header.id = Some(ack_id);
        let targets: Vec<_> = self
            .select(opts)
            .into_iter()
            .filter_map(|sid| self.sockets.get(&sid))
            .collect();
        let buffers = sio_parser::encode(header, Some(&payload))?;

        let remaining = Arc::new(AtomicUsize::new(targets.len()));
        let timed_out = Arc::new(AtomicBool::new(false));

        for socket in &targets {
            let ack = Arc::clone(&ack);
            let remaining = Arc::clone(&remaining);
            let timed_out = Arc::clone(&timed_out);
            socket.acks().register(
                ack_id,
                timeout,
                Box::new(move |result| {
                    // Per-entry timeouts and disconnects only clean up; the
                    // single broadcast-level timer below reports the miss.
                    if let Ok(args) = result {
                        if !timed_out.load(Ordering::SeqCst) {
                            remaining.fetch_sub(1, Ordering::SeqCst);
                            ack(Ok(args));
                        }
                    }
                }),
            );
            socket.send_encoded(buffers.clone());
        }

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if remaining.load(Ordering::SeqCst) > 0 && !timed_out.swap(true, Ordering::SeqCst) {
                ack(Err(AckError::Timeout));
            }
        });
        Ok(())
    }

    fn sockets(&self, opts: &BroadcastOptions) -> HashSet<Sid> {
        self.select(opts)
    }

    fn socket_rooms(&self, sid: &Sid) -> Option<HashSet<Room>> {
        self.index.lock().sids.get(sid).cloned()
    }

    fn server_side_emit(&self, event: &str, args: Vec<Value>) {
        // Single node: nothing to forward, just fan out locally.
        (self.local_fan)(event, args);
    }
}
