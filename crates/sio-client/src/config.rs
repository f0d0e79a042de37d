use std::time::Duration;

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Disallow reconnections entirely.
    pub no_reconnection: bool,

    /// Reconnection attempts before giving up. Zero means unlimited.
    pub reconnection_attempts: u32,

    /// Base delay between reconnection attempts.
    pub reconnection_delay: Duration,

    /// Ceiling for the backoff delay.
    pub reconnection_delay_max: Duration,

    /// Jitter factor applied to each delay, clamped to `[0, 1]`.
    pub randomization_factor: f64,

    /// Maximum binary attachments accepted per packet. Zero means no limit.
    pub max_attachments: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            no_reconnection: false,
            reconnection_attempts: 0,
            reconnection_delay: Duration::from_secs(1),
            reconnection_delay_max: Duration::from_secs(5),
            randomization_factor: 0.5,
            max_attachments: 0,
        }
    }
}
