//! Simulation state snapshots as sent by the server.
//!
//! Each inbound frame carries one JSON snapshot:
//!
//! ```json
//! {"dims": [20, 20], "grid": [[0.0, 1.0], ...],
//!  "agents": [{"id": 3, "pos": [4, 7], "type": "car"}],
//!  "deleted": [1, 2]}
//! ```
//!
//! `grid`, `agents` and `deleted` may be absent; servers that do not track
//! removals never send `deleted`.

use serde::{Deserialize, Serialize};

/// Error returned when a payload is not a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The payload is not valid UTF-8 JSON of the expected shape.
    #[error("invalid snapshot payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// One agent's state in a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentData {
    pub id: i64,
    /// Grid cell as `[x, y]`.
    pub pos: [i32; 2],
    /// Agent kind, e.g. `"car"` or `"pedestrian"`.
    #[serde(rename = "type")]
    pub kind: String,
}

/// Whole simulation state for one step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimState {
    /// Grid width and height.
    pub dims: [u32; 2],
    /// Per-cell values. Auxiliary; the viewer does not interpret them.
    #[serde(default)]
    pub grid: Vec<Vec<f32>>,
    #[serde(default)]
    pub agents: Vec<AgentData>,
    /// Ids removed since the previous snapshot.
    #[serde(default)]
    pub deleted: Vec<i64>,
}

impl SimState {
    /// Parse a snapshot from a frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Json`] for malformed or non-UTF-8 payloads
    /// and for payloads missing `dims`.
    pub fn from_payload(payload: &[u8]) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_slice(payload)?)
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.dims[0]
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.dims[1]
    }
}

#[cfg(test)]
#[path = "snapshot_test.rs"]
mod tests;
