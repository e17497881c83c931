//! Hand-off from network tasks to the Dispatcher's own thread.

mod action_queue;

pub use action_queue::{Action, ActionDrain, ActionQueue, DrainStats, action_queue};
pub(crate) use action_queue::panic_message;
