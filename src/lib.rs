//! Headless viewer client for the traffic simulation server.
//!
//! ARCHITECTURE
//! ============
//! ```text
//! socket --frames--> receive loop --payload--> listeners
//!                                                 |
//!                                      parse snapshot, enqueue
//!                                                 v
//! Dispatcher tick --drain_and_run--> action queue --> scene
//! ```
//!
//! The network side runs on tokio tasks. The scene is only touched by
//! actions drained on the Dispatcher's own cadence, so nothing that mutates
//! it ever runs concurrently with the update loop.

pub mod config;
pub mod dispatch;
pub mod net;
pub mod scene;
pub mod snapshot;
pub mod viewer;
