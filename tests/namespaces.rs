mod common;

use tokio::sync::mpsc::unbounded_channel;

use common::{expect_silence, pair, recv};
use sio::{ManagerConfig, ServerConfig};

/// Traffic on one namespace is invisible to the others, and each namespace
/// fires exactly one connect per socket.
#[tokio::test]
async fn namespaces_are_isolated() {
    let (server, _hub, manager) = pair(ServerConfig::default(), ManagerConfig::default());

    let (chat_connect_tx, mut chat_connect_rx) = unbounded_channel();
    let (chat_event_tx, mut chat_event_rx) = unbounded_channel();
    server.of("/chat").on_connection(move |socket| {
        let _ = chat_connect_tx.send(());
        let chat_event_tx = chat_event_tx.clone();
        socket.on("ev", move |(msg,): (String,), _ack| {
            let _ = chat_event_tx.send(msg);
        });
    });

    let (news_connect_tx, mut news_connect_rx) = unbounded_channel();
    let (news_event_tx, mut news_event_rx) = unbounded_channel();
    server.of("/news").on_connection(move |socket| {
        let _ = news_connect_tx.send(());
        let news_event_tx = news_event_tx.clone();
        socket.on("ev", move |(msg,): (String,), _ack| {
            let _ = news_event_tx.send(msg);
        });
    });

    let chat = manager.socket("/chat");
    let news = manager.socket("/news");
    chat.connect();
    news.connect();

    recv(&mut chat_connect_rx).await;
    recv(&mut news_connect_rx).await;

    chat.emit("ev", ("chat only",)).unwrap();
    assert_eq!(recv(&mut chat_event_rx).await, "chat only");
    expect_silence(&mut news_event_rx).await;

    // Exactly one connect each.
    expect_silence(&mut chat_connect_rx).await;
    expect_silence(&mut news_connect_rx).await;
}

/// `""` and `"/"` name the same namespace on both sides.
#[tokio::test]
async fn empty_and_root_namespace_are_equivalent() {
    let (server, _hub, manager) = pair(ServerConfig::default(), ManagerConfig::default());

    let (connect_tx, mut connect_rx) = unbounded_channel();
    server.of("").on_connection(move |_socket| {
        let _ = connect_tx.send(());
    });

    let socket = manager.socket("");
    assert_eq!(socket.namespace(), "/");
    socket.connect();
    recv(&mut connect_rx).await;
}

/// Unknown namespaces are rejected unless the server accepts any.
#[tokio::test]
async fn unknown_namespace_is_rejected() {
    let (_server, _hub, manager) = pair(ServerConfig::default(), ManagerConfig::default());

    let (error_tx, mut error_rx) = unbounded_channel();
    let socket = manager.socket("/nope");
    socket.on_connect_error(move |payload| {
        let _ = error_tx.send(payload.clone());
    });
    socket.connect();

    let payload = recv(&mut error_rx).await;
    assert_eq!(payload["message"], "Invalid namespace");
    assert!(!socket.connected());
}

/// With `accept_any_namespace` the namespace springs into existence.
#[tokio::test]
async fn accept_any_namespace_creates_on_demand() {
    let server_config = ServerConfig {
        accept_any_namespace: true,
        ..ServerConfig::default()
    };
    let (server, _hub, manager) = pair(server_config, ManagerConfig::default());

    let (any_tx, mut any_rx) = unbounded_channel();
    server.on_any_connection(move |namespace, _socket| {
        let _ = any_tx.send(namespace.to_owned());
    });

    let socket = manager.socket("/made-up");
    socket.connect();
    assert_eq!(recv(&mut any_rx).await, "/made-up");
}

/// A second socket on another namespace connects over the same transport.
#[tokio::test]
async fn second_namespace_attaches_after_the_first() {
    let (server, _hub, manager) = pair(
        ServerConfig {
            accept_any_namespace: true,
            ..ServerConfig::default()
        },
        ManagerConfig::default(),
    );

    let (connect_tx, mut connect_rx) = unbounded_channel();
    server.on_any_connection(move |namespace, _socket| {
        let _ = connect_tx.send(namespace.to_owned());
    });

    let root = manager.socket("/");
    root.connect();
    assert_eq!(recv(&mut connect_rx).await, "/");
    assert_eq!(server.connection_count(), 1);

    let extra = manager.socket("/extra");
    extra.connect();
    assert_eq!(recv(&mut connect_rx).await, "/extra");
    // Still one physical connection.
    assert_eq!(server.connection_count(), 1);
}
