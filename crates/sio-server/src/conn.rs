use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use sio_core::{PacketQueue, SioError};
use sio_engine::{Callbacks, EngineConn, Packet, PacketType as EnginePacketType, Reason};
use sio_parser::{DecodedPacket, Decoder, PacketType, Value};

use crate::server::ServerShared;
use crate::ServerSocket;

/// One engine-layer connection on the server side.
///
/// Demultiplexes inbound packets to per-namespace sockets and serializes all
/// outbound writes through a single queue-draining writer task. The decoder
/// is stateful and not thread-safe, so every engine delivery goes through
/// its mutex.
pub(crate) struct ServerConn {
    conn_id: u64,
    shared: Arc<ServerShared>,
    engine: Arc<dyn EngineConn>,
    queue: Arc<PacketQueue>,
    decoder: Mutex<Decoder>,
    /// Weak index: the namespace owns the socket, we only route to it.
    sockets: Mutex<HashMap<String, Weak<ServerSocket>>>,
    closed: AtomicBool,
}

impl ServerConn {
    pub(crate) fn new(
        shared: Arc<ServerShared>,
        engine: Arc<dyn EngineConn>,
        conn_id: u64,
    ) -> (Arc<Self>, Callbacks) {
        let conn = Arc::new(Self {
            conn_id,
            decoder: Mutex::new(Decoder::new(shared.config.max_attachments)),
            shared,
            engine,
            queue: Arc::new(PacketQueue::new()),
            sockets: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        // Single writer per connection.
        let queue = Arc::clone(&conn.queue);
        let engine = Arc::clone(&conn.engine);
        tokio::spawn(async move {
            loop {
                let batch = queue.poll().await;
                if batch.is_empty() {
                    break;
                }
                engine.send(batch);
            }
        });

        // Grace timer: a connection that attaches no namespace in time is
        // not worth keeping.
        let grace = Arc::downgrade(&conn);
        let connect_timeout = conn.shared.config.connect_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(connect_timeout).await;
            if let Some(conn) = grace.upgrade() {
                if conn.sockets.lock().is_empty() {
                    debug!("no namespace attached within the connect timeout, closing");
                    conn.close();
                }
            }
        });

        let on_packet = {
            let conn = Arc::downgrade(&conn);
            move |packets: Vec<Packet>| {
                if let Some(conn) = conn.upgrade() {
                    conn.on_engine_packets(packets);
                }
            }
        };
        let on_error = {
            let conn = Arc::downgrade(&conn);
            move |err| {
                if let Some(conn) = conn.upgrade() {
                    conn.on_fatal(SioError::Engine(err));
                }
            }
        };
        let on_close = {
            let conn = Arc::downgrade(&conn);
            move |reason, _err| {
                if let Some(conn) = conn.upgrade() {
                    conn.on_engine_close(reason);
                }
            }
        };

        let callbacks = Callbacks::new(on_packet, on_error, on_close);
        (conn, callbacks)
    }

    fn on_engine_packets(self: &Arc<Self>, packets: Vec<Packet>) {
        for packet in packets {
            if packet.packet_type != EnginePacketType::Message {
                continue;
            }
            let decoded = {
                let mut decoder = self.decoder.lock();
                decoder.add(packet.data, packet.is_binary)
            };
            match decoded {
                Ok(Some(packet)) => self.on_packet(packet),
                Ok(None) => {}
                Err(err) => {
                    self.on_fatal(SioError::Protocol(err));
                    return;
                }
            }
        }
    }

    fn on_packet(self: &Arc<Self>, packet: DecodedPacket) {
        let nsp_name = packet.header.namespace.clone();
        let existing = self.sockets.lock().get(&nsp_name).and_then(Weak::upgrade);

        match (packet.header.packet_type, existing) {
            (PacketType::Connect, None) => self.handle_connect(packet),
            (PacketType::Connect, Some(_)) => {
                warn!(namespace = %nsp_name, "CONNECT for an already attached namespace, closing");
                self.close();
            }
            (PacketType::ConnectError, _) => {
                warn!(namespace = %nsp_name, "CONNECT_ERROR from a client, closing");
                self.close();
            }
            (_, Some(socket)) => {
                if let Err(err) = socket.on_packet(packet) {
                    self.on_fatal(err);
                }
            }
            (_, None) => {
                warn!(namespace = %nsp_name, "packet for a namespace that is not attached, closing");
                self.close();
            }
        }
    }

    fn handle_connect(self: &Arc<Self>, packet: DecodedPacket) {
        let nsp_name = packet.header.namespace.clone();
        let auth = packet
            .payload_json()
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let nsp = if self.shared.config.accept_any_namespace {
            Some(self.shared.get_or_create_namespace(&nsp_name))
        } else {
            self.shared.get_namespace(&nsp_name)
        };
        let Some(nsp) = nsp else {
            debug!(namespace = %nsp_name, "connect to unknown namespace rejected");
            self.send_connect_error(&nsp_name, "Invalid namespace");
            return;
        };

        match nsp.add(self, auth) {
            Ok(socket) => {
                self.sockets
                    .lock()
                    .insert(nsp_name, Arc::downgrade(&socket));
            }
            Err(rejection) => {
                debug!(namespace = %nsp_name, %rejection, "connect rejected");
                self.send_connect_error(&nsp_name, &rejection.to_string());
            }
        }
    }

    fn send_connect_error(&self, nsp_name: &str, message: &str) {
        let header = sio_parser::PacketHeader::new(PacketType::ConnectError, nsp_name);
        let payload = Value::from_json(serde_json::json!({ "message": message }));
        match sio_parser::encode(header, Some(&payload)) {
            Ok(buffers) => self.send_buffers(buffers),
            Err(err) => self.on_fatal(SioError::Encode(err)),
        }
    }

    /// Packetize wire buffers: the header buffer travels as a text MESSAGE,
    /// each attachment as a binary MESSAGE.
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

    /// A protocol or internal error this connection cannot recover from:
    /// tell every attached socket's error handlers, then drop the transport.
    fn on_fatal(&self, err: SioError) {
        warn!(%err, "fatal connection error");
        let sockets: Vec<Arc<ServerSocket>> = self
            .sockets
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        for socket in sockets {
            socket.notify_error(&err);
        }
        self.close();
    }

    fn on_engine_close(&self, reason: Reason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        trace!(%reason, "server connection closed");
        let sockets: Vec<Arc<ServerSocket>> = {
            let mut map = self.sockets.lock();
            map.drain().filter_map(|(_, weak)| weak.upgrade()).collect()
        };
        for socket in sockets {
            socket.on_close(reason);
        }
        self.decoder.lock().reset();
        self.queue.close();
        self.shared.remove_conn(self.conn_id);
    }

    pub(crate) fn close(&self) {
        self.engine.close();
        self.on_engine_close(Reason::ForcedServerClose);
    }

    /// Detach one namespace from this connection's routing table.
    pub(crate) fn detach(&self, nsp_name: &str) {
        self.sockets.lock().remove(nsp_name);
    }
}

impl std::fmt::Debug for ServerConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConn")
            .field("conn_id", &self.conn_id)
            .field("namespaces", &self.sockets.lock().len())
            .finish()
    }
}
