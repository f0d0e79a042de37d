mod common;

use std::time::Duration;

use tokio::sync::mpsc::unbounded_channel;

use common::{expect_silence, fast_retry, pair, recv};
use sio::{ConnectionStateRecovery, ServerConfig, Sid};

fn recovery_config() -> ServerConfig {
    ServerConfig {
        connection_state_recovery: ConnectionStateRecovery {
            enabled: true,
            max_disconnection_duration: Duration::from_secs(60),
            use_middlewares: false,
        },
        ..ServerConfig::default()
    }
}

/// A short outage restores the same socket id, keeps its rooms, and
/// replays the broadcasts it missed, each exactly once.
#[tokio::test]
async fn session_is_recovered_after_a_short_outage() {
    let (server, hub, manager) = pair(recovery_config(), fast_retry(0));

    let (connect_tx, mut connect_rx) = unbounded_channel::<(Sid, bool)>();
    server.on_connection(move |socket| {
        socket.join(["news"]);
        let _ = connect_tx.send((socket.id().clone(), socket.recovered()));
    });

    let (event_tx, mut event_rx) = unbounded_channel();
    let socket = manager.socket("/");
    socket.on("msg", move |(text,): (String,), _ack| {
        let _ = event_tx.send(text);
    });
    socket.connect();

    let (first_sid, recovered) = recv(&mut connect_rx).await;
    assert!(!recovered);

    // One delivered broadcast teaches the client its offset.
    let nsp = server.of("/");
    nsp.emit("msg", ("one",)).unwrap();
    assert_eq!(recv(&mut event_rx).await, "one");

    hub.take_down();
    // Broadcast into the outage; the session-aware adapter retains it.
    nsp.emit("msg", ("two",)).unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    hub.bring_up();

    let (second_sid, recovered) = recv(&mut connect_rx).await;
    assert!(recovered, "socket should be restored, not fresh");
    assert_eq!(second_sid, first_sid);

    // The missed broadcast arrives exactly once.
    assert_eq!(recv(&mut event_rx).await, "two");
    expect_silence(&mut event_rx).await;

    // Rooms survived the outage.
    let rooms = nsp
        .adapter()
        .socket_rooms(&second_sid)
        .expect("restored socket is registered");
    assert!(rooms.contains(&"news".into()));
}

/// Without a valid session the reconnect falls back to a fresh socket.
#[tokio::test]
async fn recovery_needs_a_known_offset() {
    let (server, hub, manager) = pair(recovery_config(), fast_retry(0));

    let (connect_tx, mut connect_rx) = unbounded_channel::<(Sid, bool)>();
    server.on_connection(move |socket| {
        let _ = connect_tx.send((socket.id().clone(), socket.recovered()));
    });

    let socket = manager.socket("/");
    socket.connect();
    let (first_sid, _) = recv(&mut connect_rx).await;

    // No event was ever delivered, so the client holds no offset and the
    // server cannot compute the gap.
    hub.take_down();
    tokio::time::sleep(Duration::from_millis(120)).await;
    hub.bring_up();

    let (second_sid, recovered) = recv(&mut connect_rx).await;
    assert!(!recovered);
    assert_ne!(second_sid, first_sid);
}
