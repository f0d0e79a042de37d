mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::unbounded_channel;

use common::{pair, recv};
use sio::{ManagerConfig, Room, ServerConfig, Sid};

/// A failing middleware rejects the connect and leaves no room membership
/// behind, even if it joined rooms before erroring.
#[tokio::test]
async fn failing_middleware_leaves_no_rooms() {
    let (server, _hub, manager) = pair(ServerConfig::default(), ManagerConfig::default());

    let rejected_sid: Arc<Mutex<Option<Sid>>> = Arc::new(Mutex::new(None));
    let sid_slot = Arc::clone(&rejected_sid);
    let nsp = server.of("/");
    nsp.use_middleware(move |socket, _handshake| {
        socket.join(["room1"]);
        *sid_slot.lock() = Some(socket.id().clone());
        Err("not authorized".into())
    });

    let (error_tx, mut error_rx) = unbounded_channel();
    let socket = manager.socket("/");
    socket.on_connect_error(move |payload| {
        let _ = error_tx.send(payload.clone());
    });
    socket.connect();

    let payload = recv(&mut error_rx).await;
    assert_eq!(payload["message"], "not authorized");

    let sid = rejected_sid.lock().clone().expect("middleware saw the socket");
    assert_eq!(nsp.adapter().socket_rooms(&sid), None);
    assert!(nsp.sockets().is_empty());
}

/// Middlewares run in registration order and rooms joined by passing
/// middlewares materialize on connect.
#[tokio::test]
async fn middleware_order_and_room_staging() {
    let (server, _hub, manager) = pair(ServerConfig::default(), ManagerConfig::default());

    let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let nsp = server.of("/");
    for n in 0..3u32 {
        let order = Arc::clone(&order);
        nsp.use_middleware(move |socket, _handshake| {
            if n == 0 {
                socket.join(["early"]);
            }
            order.lock().push(n);
            Ok(())
        });
    }

    let (connected_tx, mut connected_rx) = unbounded_channel();
    nsp.on_connection(move |socket| {
        let _ = connected_tx.send(socket.id().clone());
    });

    let socket = manager.socket("/");
    socket.connect();
    let sid = recv(&mut connected_rx).await;

    assert_eq!(*order.lock(), vec![0, 1, 2]);
    let rooms = nsp
        .adapter()
        .socket_rooms(&sid)
        .expect("socket is registered with the adapter");
    assert!(rooms.contains(&Room::from("early")));
    // Every socket is subscribed to its own id.
    assert!(rooms.contains(&Room::from(&sid)));
}

/// The handshake carries the auth blob the client supplied.
#[tokio::test]
async fn handshake_exposes_auth() {
    let (server, _hub, manager) = pair(ServerConfig::default(), ManagerConfig::default());

    let (auth_tx, mut auth_rx) = unbounded_channel();
    server.of("/").use_middleware(move |_socket, handshake| {
        let _ = auth_tx.send(handshake.auth.clone());
        Ok(())
    });

    let socket = manager.socket("/");
    socket
        .set_auth(serde_json::json!({ "token": "sesame" }))
        .unwrap();
    socket.connect();

    let auth = recv(&mut auth_rx).await;
    assert_eq!(auth["token"], "sesame");
}

/// Non-object auth values are refused locally.
#[tokio::test]
async fn auth_must_be_an_object_or_null() {
    let (_server, _hub, manager) = pair(ServerConfig::default(), ManagerConfig::default());
    let socket = manager.socket("/");

    assert!(socket.set_auth("just a string").is_err());
    assert!(socket.set_auth(42u32).is_err());
    assert!(socket.set_auth(serde_json::Value::Null).is_ok());
    assert!(socket.set_auth(serde_json::json!({ "ok": true })).is_ok());
}
