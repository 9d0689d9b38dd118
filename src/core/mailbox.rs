//! Single-slot, latest-wins handoff between tasks
//!
//! The producer never blocks: posting overwrites any value the consumer
//! has not taken yet. The consumer waits until a value is present.

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    closed: bool,
}

/// Single-element mailbox
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Mutex<Slot<T>>,
    notify: Notify,
}

impl<T> Mailbox<T> {
    /// Create an empty mailbox
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: None,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Store `value`, replacing any unconsumed one.
    /// Returns `false` if the mailbox was closed.
    pub fn post(&self, value: T) -> bool {
        {
            let mut slot = self.slot.lock();
            if slot.closed {
                return false;
            }
            slot.value = Some(value);
        }
        self.notify.notify_one();
        true
    }

    /// Take the pending value without waiting
    pub fn try_take(&self) -> Option<T> {
        self.slot.lock().value.take()
    }

    /// Wait for a value.
    ///
    /// A value posted before closing is still delivered; after that `None`
    /// is returned.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut slot = self.slot.lock();
                if let Some(value) = slot.value.take() {
                    return Some(value);
                }
                if slot.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the mailbox and wake the consumer
    pub fn close(&self) {
        self.slot.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Whether the mailbox has been closed
    pub fn is_closed(&self) -> bool {
        self.slot.lock().closed
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_latest_wins() {
        let mailbox = Mailbox::new();
        assert!(mailbox.post(1));
        assert!(mailbox.post(2));
        assert_eq!(mailbox.try_take(), Some(2));
        assert_eq!(mailbox.try_take(), None);
    }

    #[tokio::test]
    async fn test_recv_waits_for_post() {
        let mailbox = Arc::new(Mailbox::new());
        let consumer = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move { mailbox.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        mailbox.post("fix");
        assert_eq!(consumer.await.unwrap(), Some("fix"));
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let mailbox = Mailbox::new();
        mailbox.post(7);
        mailbox.close();
        assert!(!mailbox.post(8));
        assert!(mailbox.is_closed());
        assert_eq!(mailbox.recv().await, Some(7));
        assert_eq!(mailbox.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_wakes_waiter() {
        let mailbox: Arc<Mailbox<u32>> = Arc::new(Mailbox::new());
        let consumer = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move { mailbox.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        mailbox.close();
        let result = tokio::time::timeout(Duration::from_secs(1), consumer).await;
        assert_eq!(result.unwrap().unwrap(), None);
    }
}
