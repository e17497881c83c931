//! Headless scene: the agents currently on screen, keyed by id.
//!
//! The scene belongs to the Dispatcher and is only mutated from actions it
//! drains. Movement toward a new position is the renderer's business; the
//! scene just records where each agent was and where it is headed.

use std::collections::BTreeMap;

use tracing::info;

use crate::snapshot::SimState;

/// One agent as the viewer knows it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentView {
    pub id: i64,
    pub kind: String,
    /// Latest position reported by the server.
    pub position: [i32; 2],
    /// Position before the latest update, for interpolating toward `position`.
    pub previous: [i32; 2],
}

/// What a single [`Scene::apply`] changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SceneDelta {
    pub spawned: usize,
    pub moved: usize,
    pub removed: usize,
}

/// Agents known to the viewer plus the grid size of the latest snapshot.
#[derive(Debug, Default)]
pub struct Scene {
    dims: Option<[u32; 2]>,
    agents: BTreeMap<i64, AgentView>,
    snapshots: u64,
}

impl Scene {
    /// An empty scene, uninitialized until the first snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once the first snapshot has been applied.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.dims.is_some()
    }

    #[must_use]
    pub fn dims(&self) -> Option<[u32; 2]> {
        self.dims
    }

    /// Snapshots applied so far.
    #[must_use]
    pub fn snapshots(&self) -> u64 {
        self.snapshots
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: i64) -> Option<&AgentView> {
        self.agents.get(&id)
    }

    /// Agents in id order.
    pub fn agents(&self) -> impl Iterator<Item = &AgentView> {
        self.agents.values()
    }

    /// Fold a snapshot into the scene.
    ///
    /// Unknown ids spawn at their reported position, known ids get a new
    /// target, and ids listed in `deleted` are dropped. An agent that is both
    /// reported and deleted in the same snapshot ends up removed.
    pub fn apply(&mut self, state: &SimState) -> SceneDelta {
        if self.dims.is_none() {
            info!(width = state.width(), height = state.height(), "scene initialized");
        }
        self.dims = Some(state.dims);
        self.snapshots += 1;

        let mut delta = SceneDelta::default();
        for agent in &state.agents {
            if let Some(view) = self.agents.get_mut(&agent.id) {
                if view.position != agent.pos {
                    delta.moved += 1;
                }
                view.previous = view.position;
                view.position = agent.pos;
                view.kind.clone_from(&agent.kind);
            } else {
                self.agents.insert(
                    agent.id,
                    AgentView {
                        id: agent.id,
                        kind: agent.kind.clone(),
                        position: agent.pos,
                        previous: agent.pos,
                    },
                );
                delta.spawned += 1;
            }
        }

        for id in &state.deleted {
            if self.agents.remove(id).is_some() {
                delta.removed += 1;
            }
        }

        delta
    }
}

#[cfg(test)]
#[path = "scene_test.rs"]
mod tests;
