//! Dispatcher wiring between the connection and the scene.
//!
//! DESIGN
//! ======
//! - The receive loop calls [`snapshot_listener`] with each payload. Parsing
//!   happens right there, off the Dispatcher's thread, and only the cheap
//!   "apply this snapshot" step is enqueued.
//! - [`Viewer::tick`] is the Dispatcher's per-frame call: drain the queue,
//!   which applies pending snapshots to the scene in arrival order.
//!
//! The scene sits behind a mutex only so the enqueued actions can reach it.
//! Every lock is taken on the Dispatcher's thread, so it is never contended.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::dispatch::{ActionDrain, ActionQueue, DrainStats, action_queue};
use crate::net::{Connection, ListenerId};
use crate::scene::Scene;
use crate::snapshot::SimState;

/// Listener that parses snapshots and schedules them onto `queue`.
///
/// Payloads that are not snapshots are logged and dropped.
pub fn snapshot_listener(
    queue: ActionQueue,
    scene: Arc<Mutex<Scene>>,
) -> impl Fn(&[u8]) + Send + Sync + 'static {
    move |payload: &[u8]| match SimState::from_payload(payload) {
        Ok(state) => {
            let scene = Arc::clone(&scene);
            queue.enqueue(move || {
                let delta = lock_scene(&scene).apply(&state);
                debug!(
                    spawned = delta.spawned,
                    moved = delta.moved,
                    removed = delta.removed,
                    "applied snapshot"
                );
            });
        }
        Err(e) => warn!(error = %e, bytes = payload.len(), "ignoring undecodable payload"),
    }
}

/// The Dispatcher: owns the drain side of the action queue and the scene.
pub struct Viewer {
    drain: ActionDrain,
    scene: Arc<Mutex<Scene>>,
    listener: ListenerId,
}

impl Viewer {
    /// Create a viewer and register its snapshot listener on `connection`.
    #[must_use]
    pub fn attach(connection: &Connection) -> Self {
        let (queue, drain) = action_queue();
        let scene = Arc::new(Mutex::new(Scene::new()));
        let listener = connection.on_receive(snapshot_listener(queue, Arc::clone(&scene)));
        Self { drain, scene, listener }
    }

    /// Run everything scheduled since the last tick.
    pub fn tick(&mut self) -> DrainStats {
        self.drain.drain_and_run()
    }

    /// Producer handle for scheduling other work onto the Dispatcher.
    #[must_use]
    pub fn queue(&self) -> ActionQueue {
        self.drain.queue()
    }

    /// Borrow the scene.
    #[must_use]
    pub fn scene(&self) -> MutexGuard<'_, Scene> {
        lock_scene(&self.scene)
    }

    /// Stop feeding this viewer from `connection`.
    pub fn detach(self, connection: &Connection) -> bool {
        connection.remove_listener(self.listener)
    }
}

fn lock_scene(scene: &Mutex<Scene>) -> MutexGuard<'_, Scene> {
    scene.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "viewer_test.rs"]
mod tests;
