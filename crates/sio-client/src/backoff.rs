use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter for the reconnect controller.
///
/// The delay for attempt `n` is `min(cap, base · 2^n)`, then jittered by
/// `± factor · U(0,1)` of itself and clamped back under the cap. The
/// attempt counter advances with every [`next_delay`](Backoff::next_delay)
/// and resets on a successful open.
pub struct Backoff {
    base: Duration,
    cap: Duration,
    factor: f64,
    attempts: AtomicU32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, factor: f64) -> Self {
        Self {
            base,
            cap,
            factor: factor.clamp(0.0, 1.0),
            attempts: AtomicU32::new(0),
        }
    }

    /// Attempts made since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    /// Advance the attempt counter and produce the next sleep duration.
    pub fn next_delay(&self) -> Duration {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let cap_ms = self.cap.as_millis() as f64;
        // 2^attempt saturates quickly; cap before jitter to stay finite.
        let exp = 2f64.powi(attempt.min(63) as i32);
        let mut delay_ms = (self.base.as_millis() as f64 * exp).min(cap_ms);

        if self.factor > 0.0 {
            let mut rng = rand::thread_rng();
            let deviation = delay_ms * self.factor * rng.gen::<f64>();
            delay_ms = if rng.gen::<bool>() {
                delay_ms + deviation
            } else {
                delay_ms - deviation
            };
        }

        Duration::from_millis(delay_ms.clamp(0.0, cap_ms) as u64)
    }
}
