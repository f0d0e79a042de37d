use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use sio_core::{EmitError, Room, Sid};
use sio_parser::{PacketHeader, PacketType, Value};

use crate::{Adapter, BroadcastAck, BroadcastOptions};

/// Everything needed to reconstitute a socket after a short disconnect.
#[derive(Debug, Clone)]
pub struct PersistedSession {
    pub sid: Sid,
    pub pid: String,
    pub rooms: Vec<Room>,
    /// Packets the socket missed while disconnected, replay order.
    pub missed: Vec<(PacketHeader, Value)>,
}

struct StoredSession {
    session: PersistedSession,
    expires: Instant,
}

struct StoredPacket {
    offset: String,
    header: PacketHeader,
    payload: Value,
    opts: BroadcastOptions,
    expires: Instant,
}

/// Adapter wrapper that makes broadcasts recoverable.
///
/// Every ack-less event broadcast gets a monotonically increasing string
/// offset appended as its final argument and is retained for
/// `max_disconnection_duration`. A client reconnecting with a known
/// `(session id, offset)` pair gets its socket back along with the packets
/// it missed.
pub struct SessionAwareAdapter<A> {
    inner: A,
    max_disconnection: Duration,
    offsets: AtomicU64,
    sessions: Mutex<HashMap<String, StoredSession>>,
    packets: Mutex<VecDeque<StoredPacket>>,
}

impl<A: Adapter> SessionAwareAdapter<A> {
    pub fn new(inner: A, max_disconnection: Duration) -> Self {
        Self {
            inner,
            max_disconnection,
            offsets: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
            packets: Mutex::new(VecDeque::new()),
        }
    }

    /// Zero-padded so lexicographic order matches allocation order.
    fn next_offset(&self) -> String {
        format!("{:016}", self.offsets.fetch_add(1, Ordering::Relaxed))
    }

    fn prune(&self) {
        let now = Instant::now();
        self.sessions.lock().retain(|_, s| s.expires > now);
        let mut packets = self.packets.lock();
        while packets.front().is_some_and(|p| p.expires <= now) {
            packets.pop_front();
        }
    }

    /// Would a socket subscribed to `rooms` have received this packet?
    fn includes(rooms: &[Room], opts: &BroadcastOptions) -> bool {
        let rooms: HashSet<&Room> = rooms.iter().collect();
        if opts.except.iter().any(|room| rooms.contains(room)) {
            return false;
        }
        opts.rooms.is_empty() || opts.rooms.iter().any(|room| rooms.contains(room))
    }
}

impl<A: Adapter> Adapter for SessionAwareAdapter<A> {
    fn add_all(&self, sid: &Sid, rooms: &[Room]) {
        self.inner.add_all(sid, rooms);
    }

    fn del(&self, sid: &Sid, room: &Room) {
        self.inner.del(sid, room);
    }

    fn del_all(&self, sid: &Sid) {
        self.inner.del_all(sid);
    }

    fn broadcast(
        &self,
        header: PacketHeader,
        payload: Value,
        opts: &BroadcastOptions,
    ) -> Result<(), EmitError> {
        // Only plain event broadcasts are recoverable; acks and connect
        // traffic are tied to a live socket.
        if header.packet_type != PacketType::Event || header.id.is_some() {
            return self.inner.broadcast(header, payload, opts);
        }

        let offset = self.next_offset();
        let payload = match payload {
            Value::Array(mut items) => {
                items.push(Value::String(offset.clone()));
                Value::Array(items)
            }
            other => other,
        };

        self.prune();
        self.packets.lock().push_back(StoredPacket {
            offset,
            header: header.clone(),
            payload: payload.clone(),
            opts: opts.clone(),
            expires: Instant::now() + self.max_disconnection,
        });

        self.inner.broadcast(header, payload, opts)
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
        self.inner
            .broadcast_with_ack(header, payload, opts, ack_id, timeout, ack)
    }

    fn sockets(&self, opts: &BroadcastOptions) -> HashSet<Sid> {
        self.inner.sockets(opts)
    }

    fn socket_rooms(&self, sid: &Sid) -> Option<HashSet<Room>> {
        self.inner.socket_rooms(sid)
    }

    fn server_side_emit(&self, event: &str, args: Vec<Value>) {
        self.inner.server_side_emit(event, args);
    }

    fn restore_session(&self, pid: &str, offset: &str) -> Option<PersistedSession> {
        self.prune();
        let mut session = self.sessions.lock().remove(pid)?.session;

        // The client's last seen offset has to still be in the buffer,
        // otherwise the gap is unknowable and recovery must fail.
        let packets = self.packets.lock();
        let position = packets.iter().position(|p| p.offset == offset)?;
        session.missed = packets
            .iter()
            .skip(position + 1)
            .filter(|p| Self::includes(&session.rooms, &p.opts))
            .map(|p| (p.header.clone(), p.payload.clone()))
            .collect();
        debug!(
            pid,
            missed = session.missed.len(),
            "restored session"
        );
        Some(session)
    }

    fn persist_session(&self, session: PersistedSession) {
        self.prune();
        self.sessions.lock().insert(
            session.pid.clone(),
            StoredSession {
                session,
                expires: Instant::now() + self.max_disconnection,
            },
        );
    }
}
