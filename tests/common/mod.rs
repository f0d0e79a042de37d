#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sio::engine::mem::MemHub;
use sio::{Manager, ManagerConfig, Server, ServerConfig};

/// A server and a client manager wired through an in-memory engine hub.
pub fn pair(
    server_config: ServerConfig,
    manager_config: ManagerConfig,
) -> (Server, Arc<MemHub>, Manager) {
    let hub = MemHub::new();
    let server = Server::new(server_config);
    let acceptor = server.clone();
    hub.set_acceptor(move |conn| acceptor.accept(conn));
    let manager = Manager::new("mem://test", hub.dialer(), manager_config);
    (server, hub, manager)
}

/// Deterministic, quick reconnection settings for transport-failure tests.
pub fn fast_retry(attempts: u32) -> ManagerConfig {
    ManagerConfig {
        reconnection_attempts: attempts,
        reconnection_delay: Duration::from_millis(50),
        reconnection_delay_max: Duration::from_millis(100),
        randomization_factor: 0.0,
        ..ManagerConfig::default()
    }
}

/// Receive with a test-sized timeout.
pub async fn recv<T>(rx: &mut tokio::sync::mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("channel closed")
}

/// Assert that nothing arrives for a little while.
pub async fn expect_silence<T: std::fmt::Debug>(rx: &mut tokio::sync::mpsc::UnboundedReceiver<T>) {
    if let Ok(Some(value)) =
        tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
    {
        panic!("expected silence, got {value:?}");
    }
}
