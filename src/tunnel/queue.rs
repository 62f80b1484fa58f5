//! Bounded FIFO of byte units
//!
//! Each element is one unit produced by a single write. Waiting is left to the
//! caller: the queue only exposes non-blocking push/pop plus the two `Notify`
//! signals that producers and consumers park on.

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

/// Bounded queue of units
pub(crate) struct UnitQueue {
    units: Mutex<VecDeque<Bytes>>,
    capacity: usize,
    /// Signalled after a push
    pub(crate) readable: Notify,
    /// Signalled after a pop
    pub(crate) writable: Notify,
}

impl UnitQueue {
    /// Create an empty queue holding at most `capacity` units (minimum 1)
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            units: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Bytes>> {
        // A poisoned lock still guards a valid deque.
        self.units.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a unit if there is room
    pub(crate) fn try_push(&self, unit: &Bytes) -> bool {
        {
            let mut units = self.lock();
            if units.len() >= self.capacity {
                return false;
            }
            units.push_back(unit.clone());
        }
        self.readable.notify_waiters();
        true
    }

    /// Remove the oldest unit
    pub(crate) fn try_pop(&self) -> Option<Bytes> {
        let unit = self.lock().pop_front()?;
        self.writable.notify_waiters();
        Some(unit)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wake every parked producer and consumer
    pub(crate) fn wake_all(&self) {
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_fifo() {
        let queue = UnitQueue::new(4);
        assert!(queue.try_push(&Bytes::from_static(b"one")));
        assert!(queue.try_push(&Bytes::from_static(b"two")));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.try_pop().unwrap(), Bytes::from_static(b"one"));
        assert_eq!(queue.try_pop().unwrap(), Bytes::from_static(b"two"));
        assert!(queue.try_pop().is_none());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_queue_capacity() {
        let queue = UnitQueue::new(1);
        assert!(queue.try_push(&Bytes::from_static(&[1])));
        assert!(!queue.try_push(&Bytes::from_static(&[2])));

        queue.try_pop();
        assert!(queue.try_push(&Bytes::from_static(&[3])));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let queue = UnitQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.try_push(&Bytes::new()));
    }

    #[tokio::test]
    async fn test_push_wakes_enabled_waiter() {
        let queue = std::sync::Arc::new(UnitQueue::new(2));

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                loop {
                    let notified = queue.readable.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    if let Some(unit) = queue.try_pop() {
                        return unit;
                    }
                    notified.await;
                }
            })
        };

        tokio::task::yield_now().await;
        queue.try_push(&Bytes::from_static(b"wake"));
        assert_eq!(waiter.await.unwrap(), Bytes::from_static(b"wake"));
    }
}
