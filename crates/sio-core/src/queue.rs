use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use sio_engine::Packet;

/// Outbound engine-packet queue: many producers, one consumer.
///
/// Each connection funnels every outgoing frame through one of these so a
/// single writer task performs all transport writes in order. `poll` blocks
/// until packets are available and drains them all at once;
/// `wait_for_drain` lets teardown paths give in-flight packets a chance to
/// leave before the transport is closed.
pub struct PacketQueue {
    packets: Mutex<Vec<Packet>>,
    closed: AtomicBool,
    added: Notify,
    drained: Notify,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self {
            packets: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            added: Notify::new(),
            drained: Notify::new(),
        }
    }

    /// Append packets for the writer. No-op once the queue is closed.
    pub fn add(&self, packets: Vec<Packet>) {
        if packets.is_empty() || self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.packets.lock().extend(packets);
        self.added.notify_one();
    }

    /// Wait until packets are queued, then take all of them.
    ///
    /// Returns an empty batch only after [`close`](Self::close), which is the
    /// writer task's signal to exit.
    pub async fn poll(&self) -> Vec<Packet> {
        loop {
            let notified = self.added.notified();
            {
                let mut packets = self.packets.lock();
                if !packets.is_empty() {
                    let out = std::mem::take(&mut *packets);
                    drop(packets);
                    self.drained.notify_waiters();
                    return out;
                }
            }
            if self.closed.load(Ordering::SeqCst) {
                return Vec::new();
            }
            notified.await;
        }
    }

    /// Take whatever is queued right now without waiting.
    pub fn try_drain(&self) -> Vec<Packet> {
        let out = std::mem::take(&mut *self.packets.lock());
        if !out.is_empty() {
            self.drained.notify_waiters();
        }
        out
    }

    /// Block until the queue is empty or the deadline passes. Returns
    /// whether the queue actually drained.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.drained.notified();
            if self.packets.lock().is_empty() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.packets.lock().is_empty();
            }
        }
    }

    /// Discard everything buffered and wake any drain waiter.
    pub fn reset(&self) {
        self.packets.lock().clear();
        self.drained.notify_waiters();
        self.added.notify_waiters();
    }

    /// Reset and additionally release the consumer: the next `poll` returns
    /// an empty batch.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.reset();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.packets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.lock().is_empty()
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;

    fn msg(text: &'static str) -> Packet {
        Packet::message(Bytes::from_static(text.as_bytes()))
    }

    #[tokio::test]
    async fn add_then_poll_drains_everything() {
        let queue = PacketQueue::new();
        queue.add(vec![msg("a")]);
        queue.add(vec![msg("b"), msg("c")]);

        let batch = queue.poll().await;
        assert_eq!(batch.len(), 3);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn try_drain_never_blocks() {
        let queue = PacketQueue::new();
        assert!(queue.try_drain().is_empty());

        queue.add(vec![msg("a"), msg("b")]);
        assert_eq!(queue.try_drain().len(), 2);
        assert!(queue.try_drain().is_empty());
    }

    #[tokio::test]
    async fn poll_waits_for_producers() {
        let queue = Arc::new(PacketQueue::new());
        let producer = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.add(vec![msg("late")]);
        });

        let batch = queue.poll().await;
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn wait_for_drain_observes_consumer() {
        let queue = Arc::new(PacketQueue::new());
        queue.add(vec![msg("x")]);

        let consumer = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = consumer.poll().await;
        });

        assert!(queue.wait_for_drain(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn wait_for_drain_times_out() {
        let queue = PacketQueue::new();
        queue.add(vec![msg("stuck")]);
        assert!(!queue.wait_for_drain(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn reset_discards_and_wakes_waiters() {
        let queue = Arc::new(PacketQueue::new());
        queue.add(vec![msg("a"), msg("b")]);

        let resetter = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            resetter.reset();
        });

        assert!(queue.wait_for_drain(Duration::from_secs(1)).await);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn close_releases_the_consumer() {
        let queue = Arc::new(PacketQueue::new());
        let closer = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            closer.close();
        });

        let batch = queue.poll().await;
        assert!(batch.is_empty());
        assert!(queue.is_closed());

        // Adds after close are dropped.
        queue.add(vec![msg("late")]);
        assert!(queue.is_empty());
    }
}
