//! Connection to the simulation server.
//!
//! DESIGN
//! ======
//! A [`Connection`] owns one TCP stream. The write half stays with the
//! connection behind an async mutex so `send` callers never interleave
//! frames; the read half moves into the receive loop task, which decodes
//! frames and hands each payload to the registered listeners.
//!
//! Connection state is published on a `watch` channel. Both the caller side
//! (`connect`, `send`, `disconnect`) and the receive loop transition it, so
//! every transition goes through `send_if_modified` with an explicit guard on
//! the current state.

mod command;
mod connection;
mod listeners;
mod receive;

pub use command::Command;
pub use connection::{
    Connection, ConnectionConfig, ConnectionError, ConnectionState, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_MAX_FRAME_LEN, OutboundFraming,
};
pub use listeners::{Listener, ListenerId};

// =============================================================================
// TEST HELPERS
// =============================================================================
