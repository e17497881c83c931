//! Registry of callbacks that receive decoded inbound payloads.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::error;

use crate::dispatch::panic_message;

/// Callback invoked with every inbound payload, on the receive loop task.
///
/// Listeners run inline with frame decoding, so they must return quickly.
/// Anything that touches scene state belongs on the action queue instead.
pub type Listener = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Handle returned by [`Connection::on_receive`](super::Connection::on_receive).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub(crate) struct Listeners {
    inner: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<(ListenerId, Listener)>,
}

impl Listeners {
    pub(crate) fn add(&self, listener: Listener) -> ListenerId {
        self.add_with(|_| listener)
    }

    /// Register a listener built from its own id, for listeners that need to
    /// unregister themselves.
    pub(crate) fn add_with<F>(&self, build: F) -> ListenerId
    where
        F: FnOnce(ListenerId) -> Listener,
    {
        let mut registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = ListenerId(registry.next_id);
        registry.next_id += 1;
        registry.entries.push((id, build(id)));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = registry.entries.len();
        registry.entries.retain(|(entry, _)| *entry != id);
        registry.entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).entries.len()
    }

    /// Invoke every listener in registration order.
    ///
    /// The list is cloned out first so a listener may register or remove
    /// listeners without deadlocking; such changes apply from the next frame.
    pub(crate) fn broadcast(&self, payload: &[u8]) {
        let snapshot: Vec<(ListenerId, Listener)> = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone();

        for (id, listener) in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(payload))) {
                error!(listener = ?id, reason = panic_message(panic.as_ref()), "receive listener panicked");
            }
        }
    }
}
