//! Mailbox consumer loop
//!
//! A single consumer thread drains the mailbox and feeds the
//! reconciliation engine, preserving the global FIFO order envelopes were
//! sent in. Per-envelope failures are logged and the loop moves on; only
//! clearing the running flag (or a poisoned engine lock) ends it.

use crate::engine::reconciler::ReconciliationEngine;
use crate::mailbox::Mailbox;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Drains the mailbox into the reconciliation engine
pub struct EngineConsumer {
    engine: Arc<Mutex<ReconciliationEngine>>,
    mailbox: Mailbox,
    running: Arc<AtomicBool>,
    backoff: Duration,
}

impl EngineConsumer {
    /// Create a consumer over a shared engine and mailbox
    pub fn new(
        engine: Arc<Mutex<ReconciliationEngine>>,
        mailbox: Mailbox,
        running: Arc<AtomicBool>,
        backoff: Duration,
    ) -> Self {
        Self {
            engine,
            mailbox,
            running,
            backoff,
        }
    }

    /// Run until the shared running flag clears
    ///
    /// The engine lock is held per envelope, never across the idle sleep,
    /// so control-plane calls interleave between applications.
    pub fn run(self) {
        tracing::debug!("Consumer loop started");
        while self.running.load(Ordering::SeqCst) {
            match self.mailbox.try_receive() {
                Some(envelope) => {
                    let space = envelope.space_name.clone();
                    let Ok(mut engine) = self.engine.lock() else {
                        tracing::error!("Engine lock poisoned, consumer stopping");
                        break;
                    };
                    if let Err(e) = engine.apply(envelope) {
                        tracing::warn!(space, "Envelope rejected: {}", e);
                    }
                }
                None => std::thread::sleep(self.backoff),
            }
        }
        tracing::debug!("Consumer loop stopped");
    }
}
