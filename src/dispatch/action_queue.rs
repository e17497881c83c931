//! FIFO of deferred work, filled by producers and drained once per tick.
//!
//! DESIGN
//! ======
//! Network code runs on runtime tasks; scene state belongs to the Dispatcher.
//! Producers never touch the scene directly. They enqueue an [`Action`] and
//! the Dispatcher runs it on its next tick, so no two actions ever run
//! concurrently and each runs exactly once.
//!
//! The queue is split like a channel. [`ActionQueue`] is the cloneable
//! producer side. [`ActionDrain`] is the single consumer: it is not `Clone`
//! and drains through `&mut self`, so only one thread can run actions.
//!
//! TRADE-OFFS
//! ==========
//! A drain swaps the whole pending deque out under the lock and runs it after
//! releasing the lock. Producers are never blocked behind a running action,
//! and anything enqueued mid-drain waits for the next tick, which keeps a
//! tick's work bounded.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error};

/// A zero-argument unit of deferred work. Keep it quick: anything expensive
/// should be computed by the producer before enqueueing.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

type Pending = Arc<Mutex<VecDeque<Action>>>;

/// Create a queue, returning its producer and its sole consumer.
#[must_use]
pub fn action_queue() -> (ActionQueue, ActionDrain) {
    let pending: Pending = Arc::default();
    (ActionQueue { pending: Arc::clone(&pending) }, ActionDrain { pending })
}

// =============================================================================
// PRODUCER
// =============================================================================

/// Producer handle. Clone it into every task that needs to schedule work.
#[derive(Clone)]
pub struct ActionQueue {
    pending: Pending,
}

impl ActionQueue {
    /// Append an action to the tail of the queue.
    pub fn enqueue<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Box::new(action));
    }

    /// Append an already boxed action. `None` is ignored.
    pub fn enqueue_boxed(&self, action: Option<Action>) {
        if let Some(action) = action {
            self.push(action);
        }
    }

    fn push(&self, action: Action) {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).push_back(action);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        pending_len(&self.pending)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// CONSUMER
// =============================================================================

/// Outcome of one [`ActionDrain::drain_and_run`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Actions that ran to completion.
    pub executed: usize,
    /// Actions that panicked. Each was logged and skipped.
    pub failed: usize,
}

impl DrainStats {
    #[must_use]
    pub fn total(self) -> usize {
        self.executed + self.failed
    }
}

/// The single consumer side of the queue, owned by the Dispatcher.
pub struct ActionDrain {
    pending: Pending,
}

impl ActionDrain {
    /// Run every action queued at the time of the call, oldest first, on the
    /// calling thread.
    ///
    /// A panicking action is caught and logged; the remaining actions still
    /// run.
    pub fn drain_and_run(&mut self) -> DrainStats {
        let batch = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        let mut stats = DrainStats::default();

        for action in batch {
            match catch_unwind(AssertUnwindSafe(action)) {
                Ok(()) => stats.executed += 1,
                Err(panic) => {
                    stats.failed += 1;
                    error!(reason = panic_message(panic.as_ref()), "scheduled action panicked");
                }
            }
        }

        if stats.total() > 0 {
            debug!(executed = stats.executed, failed = stats.failed, "drained action queue");
        }
        stats
    }

    /// A producer handle feeding this drain.
    #[must_use]
    pub fn queue(&self) -> ActionQueue {
        ActionQueue { pending: Arc::clone(&self.pending) }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        pending_len(&self.pending)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn pending_len(pending: &Pending) -> usize {
    pending.lock().unwrap_or_else(PoisonError::into_inner).len()
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
#[path = "action_queue_test.rs"]
mod tests;
