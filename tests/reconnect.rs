mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::unbounded_channel;

use common::{expect_silence, fast_retry, pair, recv};
use sio::ServerConfig;

/// Killing and restarting the transport: an emit issued from the reconnect
/// handler arrives exactly once.
#[tokio::test]
async fn reconnect_delivers_after_restart() {
    let (server, hub, manager) = pair(ServerConfig::default(), fast_retry(0));

    let (event_tx, mut event_rx) = unbounded_channel();
    server.on_connection(move |socket| {
        let event_tx = event_tx.clone();
        socket.on("ev", move |(msg,): (String,), _ack| {
            let _ = event_tx.send(msg);
        });
    });

    let (connected_tx, mut connected_rx) = unbounded_channel();
    let socket = manager.socket("/");
    socket.on_connect(move || {
        let _ = connected_tx.send(());
    });

    let emit_socket = Arc::clone(&socket);
    manager.on_reconnect(move |_attempt| {
        emit_socket.emit("ev", ("payload",)).unwrap();
    });

    socket.connect();
    recv(&mut connected_rx).await;

    hub.take_down();
    tokio::time::sleep(Duration::from_millis(120)).await;
    hub.bring_up();

    assert_eq!(recv(&mut event_rx).await, "payload");
    recv(&mut connected_rx).await;
    expect_silence(&mut event_rx).await;
}

/// With a bounded attempt budget and the server unreachable, exactly that
/// many attempts fire, then one failure, then nothing.
#[tokio::test]
async fn reconnect_attempts_are_bounded() {
    let (_server, hub, manager) = pair(ServerConfig::default(), fast_retry(2));
    hub.take_down();

    let attempts = Arc::new(AtomicU32::new(0));
    let attempt_counter = Arc::clone(&attempts);
    manager.on_reconnect_attempt(move |_n| {
        attempt_counter.fetch_add(1, Ordering::SeqCst);
    });

    let (failed_tx, mut failed_rx) = unbounded_channel();
    manager.on_reconnect_failed(move || {
        let _ = failed_tx.send(());
    });

    manager.open();

    recv(&mut failed_rx).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    // No stragglers after the failure.
    expect_silence(&mut failed_rx).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

/// After an explicit close no reconnect attempt ever fires.
#[tokio::test]
async fn close_suppresses_reconnection() {
    let (server, hub, manager) = pair(ServerConfig::default(), fast_retry(0));

    let (connected_tx, mut connected_rx) = unbounded_channel();
    server.on_connection(move |_socket| {
        let _ = connected_tx.send(());
    });

    let (attempt_tx, mut attempt_rx) = unbounded_channel();
    manager.on_reconnect_attempt(move |_n| {
        let _ = attempt_tx.send(());
    });

    let socket = manager.socket("/");
    socket.connect();
    recv(&mut connected_rx).await;

    manager.close().await;
    hub.take_down();
    hub.bring_up();

    expect_silence(&mut attempt_rx).await;
}

/// The attempt counter climbs monotonically between opens and resets on a
/// successful open.
#[tokio::test]
async fn attempt_counter_resets_on_success() {
    let (server, hub, manager) = pair(ServerConfig::default(), fast_retry(0));

    let (connected_tx, mut connected_rx) = unbounded_channel();
    server.on_connection(move |_socket| {
        let _ = connected_tx.send(());
    });

    let attempts_seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&attempts_seen);
    manager.on_reconnect_attempt(move |n| {
        sink.lock().push(n);
    });

    let (reconnected_tx, mut reconnected_rx) = unbounded_channel();
    manager.on_reconnect(move |attempt| {
        let _ = reconnected_tx.send(attempt);
    });

    let socket = manager.socket("/");
    socket.connect();
    recv(&mut connected_rx).await;

    // Take the hub down long enough for a few failed attempts.
    hub.take_down();
    tokio::time::sleep(Duration::from_millis(260)).await;
    hub.bring_up();

    let attempt = recv(&mut reconnected_rx).await;
    assert!(attempt >= 1);
    {
        let seen = attempts_seen.lock();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "monotonic: {seen:?}");
    }

    // Counter reset: a second outage starts over at attempt 1.
    hub.take_down();
    tokio::time::sleep(Duration::from_millis(80)).await;
    hub.bring_up();
    let attempt = recv(&mut reconnected_rx).await;
    assert!(attempt <= 2, "restarted counter, got attempt {attempt}");
}
