use std::time::Duration;

/// Server-wide configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Accept CONNECT packets for namespaces that were never declared,
    /// creating them on the fly.
    pub accept_any_namespace: bool,

    /// Grace period for a fresh connection to attach at least one
    /// namespace before it is dropped.
    pub connect_timeout: Duration,

    /// Maximum binary attachments accepted per packet. Zero means no limit.
    pub max_attachments: usize,

    pub connection_state_recovery: ConnectionStateRecovery,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            accept_any_namespace: false,
            connect_timeout: Duration::from_secs(45),
            max_attachments: 0,
            connection_state_recovery: ConnectionStateRecovery::default(),
        }
    }
}

/// Connection state recovery settings.
///
/// When enabled, a socket that loses its transport keeps its id, rooms and
/// missed packets around for `max_disconnection_duration`, and a client
/// reconnecting with a valid session id is restored instead of starting
/// over.
#[derive(Debug, Clone)]
pub struct ConnectionStateRecovery {
    pub enabled: bool,
    pub max_disconnection_duration: Duration,
    /// Run the middleware chain even for recovered sockets.
    pub use_middlewares: bool,
}

impl Default for ConnectionStateRecovery {
    fn default() -> Self {
        Self {
            enabled: false,
            max_disconnection_duration: Duration::from_secs(120),
            use_middlewares: false,
        }
    }
}
