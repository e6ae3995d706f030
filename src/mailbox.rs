//! Bounded producer/consumer mailbox
//!
//! The mailbox is the single shared structure between producer module
//! threads and the reconciliation consumer. Producers enqueue [`Envelope`]s;
//! one consumer drains them in strict global FIFO order (application order
//! equals send order across all producers, not per subtree).
//!
//! # Backpressure
//!
//! `send` never drops an envelope. When the queue sits at capacity the
//! sending thread retries with a short sleep until space opens up, so a
//! fast producer is throttled by a slow consumer instead of flooding it.
//! This is intentional backpressure, not an error condition.
//!
//! The consumer side is non-blocking: `try_receive` returns `None` on an
//! empty queue and the consumer loop is expected to back off briefly rather
//! than busy-spin.

use crate::snapshot::{Quality, SnapshotTree};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::time::Duration;

/// Default mailbox capacity
pub const DEFAULT_CAPACITY: usize = 50;

/// Default sleep between retries while the mailbox is full
pub const DEFAULT_SEND_RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// How an envelope should be applied to the merged tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Add if the subtree is unregistered, otherwise update
    Auto,
    /// Register the subtree (if needed) and create every snapshot node
    Add,
    /// Value-only fast path, never structural
    UpdateValues,
    /// Diff the snapshot against the current subtree state
    Update,
    /// Remove the whole subtree and unregister it
    Delete,
    /// Remove the whole subtree, then add the snapshot from scratch
    Replace,
}

/// Unit transported by the mailbox: one snapshot plus routing metadata
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Root set of snapshot nodes for one subtree
    pub entities: SnapshotTree,
    /// Stable identifier of the owning producer's subtree
    pub space_name: String,
    /// Snapshot-level quality, overridable per node
    pub quality: Quality,
    /// Snapshot-level timestamp, overridable per node
    pub timestamp: DateTime<Utc>,
    /// How the engine should apply this envelope
    pub action: ActionKind,
}

impl Envelope {
    /// Create an envelope with an explicit action kind
    pub fn new(
        entities: SnapshotTree,
        space_name: impl Into<String>,
        quality: Quality,
        action: ActionKind,
    ) -> Self {
        Self {
            entities,
            space_name: space_name.into(),
            quality,
            timestamp: Utc::now(),
            action,
        }
    }

    /// Create an [`ActionKind::Auto`] envelope, the kind modules emit each cycle
    pub fn auto(entities: SnapshotTree, space_name: impl Into<String>) -> Self {
        Self::new(entities, space_name, Quality::Good, ActionKind::Auto)
    }
}

/// Bounded FIFO mailbox connecting producer threads to the consumer
///
/// Cloning yields another handle onto the same queue; producers each hold a
/// clone, the consumer holds one more.
#[derive(Debug, Clone)]
pub struct Mailbox {
    tx: Sender<Envelope>,
    rx: Receiver<Envelope>,
    capacity: usize,
    retry_backoff: Duration,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Mailbox {
    /// Create a mailbox with the given capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            retry_backoff: DEFAULT_SEND_RETRY_BACKOFF,
        }
    }

    /// Override the sleep used between full-queue retries
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Configured capacity of the mailbox
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current queue depth
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True if no envelope is waiting
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// True if at least one envelope is waiting
    pub fn is_filled(&self) -> bool {
        !self.is_empty()
    }

    /// Append an envelope, retrying while the queue is at capacity
    ///
    /// Blocks the calling producer thread (sleeping between attempts) until
    /// the envelope is accepted. Only fails if every consumer handle has
    /// been dropped, which means the server is gone.
    pub fn send(&self, envelope: Envelope) -> crate::error::Result<()> {
        let mut pending = envelope;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(back)) => {
                    pending = back;
                    std::thread::sleep(self.retry_backoff);
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(crate::error::BridgeError::Mailbox(
                        "mailbox receiver disconnected".to_string(),
                    ));
                }
            }
        }
    }

    /// Remove and return the oldest envelope, or `None` when empty
    pub fn try_receive(&self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn envelope(space: &str) -> Envelope {
        Envelope::auto(SnapshotTree::new(), space)
    }

    #[test]
    fn test_fifo_order_across_producers() {
        let mailbox = Mailbox::new(DEFAULT_CAPACITY);

        mailbox.send(envelope("a")).unwrap();
        mailbox.send(envelope("b")).unwrap();
        mailbox.send(envelope("a")).unwrap();
        mailbox.send(envelope("c")).unwrap();

        let order: Vec<String> = std::iter::from_fn(|| mailbox.try_receive())
            .map(|e| e.space_name)
            .collect();
        assert_eq!(order, vec!["a", "b", "a", "c"]);
    }

    #[test]
    fn test_empty_receive_returns_none() {
        let mailbox = Mailbox::new(4);
        assert!(mailbox.try_receive().is_none());
        assert!(mailbox.is_empty());
        assert!(!mailbox.is_filled());
    }

    #[test]
    fn test_send_blocks_at_capacity_until_receive() {
        let mailbox = Mailbox::new(2).with_retry_backoff(Duration::from_millis(5));

        mailbox.send(envelope("fill1")).unwrap();
        mailbox.send(envelope("fill2")).unwrap();
        assert_eq!(mailbox.len(), 2);

        let delivered = Arc::new(AtomicBool::new(false));
        let producer = {
            let mailbox = mailbox.clone();
            let delivered = delivered.clone();
            thread::spawn(move || {
                mailbox.send(envelope("overflow")).unwrap();
                delivered.store(true, Ordering::SeqCst);
            })
        };

        // The capacity+1-th send must not complete while the queue is full
        thread::sleep(Duration::from_millis(50));
        assert!(!delivered.load(Ordering::SeqCst));

        // Draining one slot unblocks the producer
        assert_eq!(mailbox.try_receive().unwrap().space_name, "fill1");
        producer.join().unwrap();
        assert!(delivered.load(Ordering::SeqCst));

        let rest: Vec<String> = std::iter::from_fn(|| mailbox.try_receive())
            .map(|e| e.space_name)
            .collect();
        assert_eq!(rest, vec!["fill2", "overflow"]);
    }

    #[test]
    fn test_interleaved_producers_keep_global_order() {
        // Two producers alternating on one thread: delivery must match the
        // exact send order, not any per-producer grouping.
        let mailbox = Mailbox::new(16);
        let sequence = ["p1", "p2", "p2", "p1", "p2", "p1"];
        for space in sequence {
            mailbox.send(envelope(space)).unwrap();
        }
        let received: Vec<String> = std::iter::from_fn(|| mailbox.try_receive())
            .map(|e| e.space_name)
            .collect();
        assert_eq!(received, sequence);
    }
}
