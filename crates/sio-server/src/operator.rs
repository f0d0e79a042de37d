use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use sio_core::{is_reserved_event, AckError, EmitError, Room, Sid};
use sio_parser::{IntoArgs, PacketHeader, PacketType, Value};

use crate::{Adapter, BroadcastOptions, Namespace, ServerSocket};

/// Fluent broadcast filter accumulator.
///
/// Every builder step copies the operator, so partially built operators can
/// be kept around and shared; a terminal action encodes at most one packet
/// and performs a single adapter call.
#[derive(Clone)]
pub struct BroadcastOperator {
    nsp: Weak<Namespace>,
    nsp_name: String,
    adapter: Arc<dyn Adapter>,
    opts: BroadcastOptions,
}

impl BroadcastOperator {
    pub(crate) fn new(nsp: &Arc<Namespace>) -> Self {
        Self::detached(
            &Arc::downgrade(nsp),
            nsp.name().to_owned(),
            nsp.adapter(),
        )
    }

    pub(crate) fn detached(
        nsp: &Weak<Namespace>,
        nsp_name: String,
        adapter: Arc<dyn Adapter>,
    ) -> Self {
        Self {
            nsp: Weak::clone(nsp),
            nsp_name,
            adapter,
            opts: BroadcastOptions::default(),
        }
    }

    /// Restrict the broadcast to members of the given rooms.
    pub fn to<I, R>(&self, rooms: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        let mut next = self.clone();
        next.opts.rooms.extend(rooms.into_iter().map(Into::into));
        next
    }

    /// Alias of [`to`](Self::to).
    pub fn in_<I, R>(&self, rooms: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        self.to(rooms)
    }

    /// Exclude members of the given rooms.
    pub fn except<I, R>(&self, rooms: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        let mut next = self.clone();
        next.opts.except.extend(rooms.into_iter().map(Into::into));
        next
    }

    /// Keep the broadcast on this node.
    pub fn local(&self) -> Self {
        let mut next = self.clone();
        next.opts.local = true;
        next
    }

    /// Advisory per-packet compression flag.
    pub fn compress(&self, compress: bool) -> Self {
        let mut next = self.clone();
        next.opts.compress = compress;
        next
    }

    pub fn options(&self) -> &BroadcastOptions {
        &self.opts
    }

    /// Emit one event to every matching socket.
    pub fn emit<A: IntoArgs>(&self, event: &str, args: A) -> Result<(), EmitError> {
        let (header, payload) = self.event_packet(event, args.into_args()?)?;
        self.adapter.broadcast(header, payload, &self.opts)
    }

    /// Emit and collect one acknowledgement per matching socket.
    ///
    /// `ack` runs once per responder; if any responder is still missing when
    /// `timeout` passes it runs one final time with [`AckError::Timeout`].
    pub fn emit_with_ack<A, F>(
        &self,
        event: &str,
        args: A,
        timeout: Duration,
        ack: F,
    ) -> Result<(), EmitError>
    where
        A: IntoArgs,
        F: Fn(Result<Vec<Value>, AckError>) + Send + Sync + 'static,
    {
        let nsp = self.nsp.upgrade().ok_or(EmitError::Closed)?;
        let (header, payload) = self.event_packet(event, args.into_args()?)?;
        let ack_id = nsp.next_ack_id();
        self.adapter
            .broadcast_with_ack(header, payload, &self.opts, ack_id, timeout, Arc::new(ack))
    }

    fn event_packet(
        &self,
        event: &str,
        args: Vec<Value>,
    ) -> Result<(PacketHeader, Value), EmitError> {
        if is_reserved_event(event) {
            return Err(EmitError::ReservedEvent(event.to_owned()));
        }
        let header = PacketHeader::new(PacketType::Event, self.nsp_name.clone());
        let mut payload = Vec::with_capacity(args.len() + 1);
        payload.push(Value::String(event.to_owned()));
        payload.extend(args);
        Ok((header, Value::Array(payload)))
    }

    /// Subscribe every matching socket to the given rooms.
    pub fn sockets_join<I, R>(&self, rooms: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        let rooms: Vec<Room> = rooms.into_iter().map(Into::into).collect();
        for sid in self.adapter.sockets(&self.opts) {
            self.adapter.add_all(&sid, &rooms);
        }
    }

    /// Unsubscribe every matching socket from the given rooms.
    pub fn sockets_leave<I, R>(&self, rooms: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        let rooms: Vec<Room> = rooms.into_iter().map(Into::into).collect();
        for sid in self.adapter.sockets(&self.opts) {
            for room in &rooms {
                self.adapter.del(&sid, room);
            }
        }
    }

    /// Disconnect every matching socket.
    pub fn disconnect_sockets(&self, close: bool) {
        for socket in self.fetch_sockets() {
            socket.disconnect(close);
        }
    }

    /// Matching sockets on this node.
    pub fn fetch_sockets(&self) -> Vec<Arc<ServerSocket>> {
        let Some(nsp) = self.nsp.upgrade() else {
            return Vec::new();
        };
        let store = nsp.sockets_store();
        self.adapter
            .sockets(&self.opts)
            .into_iter()
            .filter_map(|sid| store.get(&sid))
            .collect()
    }

    /// Matching socket ids.
    pub fn all_sockets(&self) -> HashSet<Sid> {
        self.adapter.sockets(&self.opts)
    }
}
