// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Bounded, count-based, drop-oldest queue used as the per-session
//! outbound buffer between the multicast receive tasks (§4.D) and the
//! protocol adapters that drain sessions toward their clients (§4.H).
//!
//! A slow or stalled client must not hold up the receiver, and a session
//! must not grow without bound while waiting for a client to catch up
//! (I5). When the queue is full, the oldest entry is evicted to make
//! room for the new one rather than rejecting the new entry outright,
//! since dropping old audio/spectrum data is preferable to dropping
//! live data.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

pub struct BoundedDropOldest<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
}

impl<T> BoundedDropOldest<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be nonzero");
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }

    /// Pushes an item, evicting the oldest entry first if the queue is
    /// already at capacity. Returns the evicted item, if any.
    pub fn push(&self, item: T) -> Option<T> {
        let evicted = {
            let mut guard = self.inner.lock().expect("queue mutex poisoned");
            let evicted = if guard.len() >= self.capacity {
                guard.pop_front()
            } else {
                None
            };
            guard.push_back(item);
            evicted
        };
        self.notify.notify_one();
        evicted
    }

    /// Pops the oldest item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().expect("queue mutex poisoned").pop_front()
    }

    /// Pops the oldest item, waiting for one to become available if the
    /// queue is currently empty.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn push_within_capacity_evicts_nothing() {
        let q = BoundedDropOldest::new(3);
        assert_eq!(q.push(1), None);
        assert_eq!(q.push(2), None);
        assert_eq!(q.push(3), None);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn push_past_capacity_evicts_oldest() {
        let q = BoundedDropOldest::new(2);
        assert_eq!(q.push(1), None);
        assert_eq!(q.push(2), None);
        assert_eq!(q.push(3), Some(1));
        assert_eq!(q.len(), 2);
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), Some(3));
    }

    #[test]
    fn try_pop_on_empty_queue_returns_none() {
        let q: BoundedDropOldest<u32> = BoundedDropOldest::new(4);
        assert_eq!(q.try_pop(), None);
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let q = Arc::new(BoundedDropOldest::new(4));
        let q2 = q.clone();

        let popper = tokio::spawn(async move { q2.pop().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        q.push(42);

        let item = tokio::time::timeout(Duration::from_secs(1), popper)
            .await
            .expect("pop task timed out")
            .expect("pop task panicked");
        assert_eq!(item, 42);
    }
}
