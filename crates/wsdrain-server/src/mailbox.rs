//! Bounded outbound queue with a terminal closed state.
//!
//! The sender half lives behind a mutex so that "closed" is checked and set
//! under the same lock: once closed, every later push fails fast with
//! [`EnqueueError::Closed`] and the channel is never closed twice.

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Why a payload was not accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    /// Mailbox at capacity; it has now been closed.
    #[error("mailbox full")]
    Full,
    /// Consumer is gone; the mailbox has now been closed.
    #[error("mailbox consumer disconnected")]
    Disconnected,
    /// Mailbox was already closed.
    #[error("mailbox closed")]
    Closed,
}

impl EnqueueError {
    /// Whether this push is the one that closed the mailbox.
    pub fn closed_mailbox(&self) -> bool {
        matches!(self, Self::Full | Self::Disconnected)
    }
}

/// Producer side of a session's outbound queue.
pub struct Mailbox {
    tx: Mutex<Option<mpsc::Sender<String>>>,
    capacity: usize,
}

impl Mailbox {
    /// Create a mailbox and the receiver its consumer drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx: Mutex::new(Some(tx)),
                capacity,
            },
            rx,
        )
    }

    /// Non-blocking push. A full or orphaned queue is closed on the spot.
    pub fn try_push(&self, payload: String) -> Result<(), EnqueueError> {
        let mut guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(EnqueueError::Closed);
        };
        match tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                *guard = None;
                Err(EnqueueError::Full)
            }
            Err(TrySendError::Closed(_)) => {
                *guard = None;
                Err(EnqueueError::Disconnected)
            }
        }
    }

    /// Close the mailbox. Returns `true` only for the call that closed it.
    ///
    /// Payloads already queued stay readable; the consumer sees the end of
    /// the queue once they are drained.
    pub fn close(&self) -> bool {
        self.tx.lock().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_receive_in_order() {
        let (mailbox, mut rx) = Mailbox::new(8);
        for i in 0..5 {
            mailbox.try_push(format!("msg_{i}")).unwrap();
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap(), format!("msg_{i}"));
        }
    }

    #[test]
    fn full_closes_the_mailbox() {
        let (mailbox, _rx) = Mailbox::new(2);
        mailbox.try_push("a".into()).unwrap();
        mailbox.try_push("b".into()).unwrap();
        assert_eq!(mailbox.try_push("c".into()), Err(EnqueueError::Full));
        assert!(mailbox.is_closed());
        assert_eq!(mailbox.try_push("d".into()), Err(EnqueueError::Closed));
    }

    #[test]
    fn dropped_consumer_reports_disconnected_once() {
        let (mailbox, rx) = Mailbox::new(2);
        drop(rx);
        assert_eq!(mailbox.try_push("a".into()), Err(EnqueueError::Disconnected));
        assert_eq!(mailbox.try_push("b".into()), Err(EnqueueError::Closed));
    }

    #[test]
    fn close_is_idempotent() {
        let (mailbox, _rx) = Mailbox::new(2);
        assert!(mailbox.close());
        assert!(!mailbox.close());
        assert!(!mailbox.close());
        assert!(mailbox.is_closed());
    }

    #[tokio::test]
    async fn queued_payloads_survive_close() {
        let (mailbox, mut rx) = Mailbox::new(4);
        mailbox.try_push("one".into()).unwrap();
        mailbox.try_push("two".into()).unwrap();
        assert!(mailbox.close());
        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn closed_mailbox_classification() {
        assert!(EnqueueError::Full.closed_mailbox());
        assert!(EnqueueError::Disconnected.closed_mailbox());
        assert!(!EnqueueError::Closed.closed_mailbox());
    }

    #[test]
    fn capacity_is_fixed_at_creation() {
        let (mailbox, _rx) = Mailbox::new(4);
        assert_eq!(mailbox.capacity(), 4);
        let _ = mailbox.close();
        assert_eq!(mailbox.capacity(), 4);
    }
}
