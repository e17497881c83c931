//! Receive loop: decode frames off the read half and broadcast them.
//!
//! The loop runs as its own tokio task for as long as the connection reports
//! `Connected`. It never retries: a closed or failing socket ends the loop
//! and the connection falls back to `Disconnected`, so a dead link is never
//! masked. Reconnecting is the caller's call.

use std::sync::Arc;

use frames::FrameError;
use tokio::net::tcp::OwnedReadHalf;
use tracing::{debug, error, info, warn};

use super::connection::{ConnectionState, Shared};

/// Drive the read half until the peer closes, the transport fails, or the
/// connection stops being `Connected` on this loop's socket generation.
///
/// Returns the read half only when `disconnect` stopped the loop, so the
/// socket can be shut down in both directions.
pub(crate) async fn run(
    mut reader: OwnedReadHalf,
    shared: Arc<Shared>,
    generation: u64,
) -> Option<OwnedReadHalf> {
    let mut state = shared.state.subscribe();
    let max_len = shared.config.max_frame_len;
    let mut delivered: u64 = 0;

    loop {
        let current = *state.borrow_and_update();
        if !shared.is_current(generation) {
            debug!(frames = delivered, generation, "socket replaced; receive loop stopping");
            return None;
        }
        if current != ConnectionState::Connected {
            debug!(frames = delivered, state = %current, "receive loop stopping");
            return (current == ConnectionState::Closing).then_some(reader);
        }

        // A pending read must not hold up `disconnect`, so race it against
        // state changes. Dropping a half-read frame here is fine: the link is
        // going away.
        let frame = tokio::select! {
            frame = frames::read_frame(&mut reader, max_len) => frame,
            _ = state.changed() => continue,
        };

        match frame {
            Ok(payload) => {
                delivered += 1;
                debug!(bytes = payload.len(), "frame received");
                shared.listeners.broadcast(&payload);
            }
            Err(err) => {
                log_termination(&err, delivered);
                shared.close_after_read_failure(generation).await;
                return None;
            }
        }
    }
}

fn log_termination(err: &FrameError, delivered: u64) {
    match err {
        FrameError::PeerClosed => info!(frames = delivered, "connection closed by server"),
        FrameError::ShortRead { expected, received } => {
            warn!(expected, received, "connection closed mid-frame");
        }
        FrameError::LengthLimit { len, max } => {
            error!(len, max, "inbound frame exceeds size limit; closing connection");
        }
        FrameError::TooLarge(_) | FrameError::Io(_) => {
            error!(error = %err, "error receiving from server");
        }
    }
}

#[cfg(test)]
#[path = "receive_test.rs"]
mod tests;
