/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Unbounded MPMC queue with an activity signal
//!
//! Used for the pool's ingress queue and every endpoint's send queue.

use crossbeam_queue::SegQueue;
use std::fmt;
use tokio::sync::Notify;

pub struct SignalQueue<T> {
    items: SegQueue<T>,
    signal: Notify,
}

impl<T> SignalQueue<T> {
    pub fn new() -> Self {
        Self {
            items: SegQueue::new(),
            signal: Notify::new(),
        }
    }

    /// Append an item and wake one waiter
    ///
    /// If nobody is waiting the wakeup is stored, so a consumer that checks
    /// the signal later still sees it.
    pub fn append(&self, item: T) {
        self.items.push(item);
        self.signal.notify_one();
    }

    /// Pop the oldest item
    pub fn next(&self) -> Option<T> {
        self.items.pop()
    }

    /// Wait until items may be available
    pub async fn signal(&self) {
        self.signal.notified().await;
    }

    /// Pop every queued item, handing each to `f`
    pub fn drain(&self, mut f: impl FnMut(T)) -> usize {
        let mut count = 0;
        while let Some(item) = self.items.pop() {
            f(item);
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for SignalQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SignalQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalQueue")
            .field("len", &self.items.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn fifo_order() {
        let queue = SignalQueue::new();
        queue.append(1);
        queue.append(2);
        queue.append(3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.next(), Some(1));
        assert_eq!(queue.next(), Some(2));
        assert_eq!(queue.next(), Some(3));
        assert!(queue.next().is_none());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn signal_stored_before_wait() {
        let queue = SignalQueue::new();
        queue.append("x");
        timeout(Duration::from_millis(100), queue.signal())
            .await
            .expect("stored wakeup must be observed");
    }

    #[tokio::test]
    async fn waiter_wakes_on_append() {
        let queue = Arc::new(SignalQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.signal().await;
                queue.next()
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.append(42u32);
        assert_eq!(waiter.await.unwrap(), Some(42));
    }

    #[test]
    fn drain_visits_everything() {
        let queue = SignalQueue::new();
        for i in 0..10 {
            queue.append(i);
        }
        let mut seen = Vec::new();
        assert_eq!(queue.drain(|i| seen.push(i)), 10);
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }
}
