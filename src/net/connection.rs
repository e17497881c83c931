//! TCP connection lifecycle: connect, send, disconnect.
//!
//! LIFECYCLE
//! =========
//! `Disconnected --connect(ok)--> Connected --disconnect()|error--> Disconnected`
//!
//! A failed connect goes `Connecting -> Disconnected`. Nothing reconnects on
//! its own; after a drop the caller decides whether to call `connect` again.
//!
//! A `Connection` is an explicitly owned handle. Clones share the same
//! socket, state and listeners, so it can be handed to whichever component
//! needs to send.

use std::fmt;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use frames::FrameError;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::command::Command;
use super::listeners::{Listener, ListenerId, Listeners};
use super::receive;

/// Connect attempts give up after this long unless configured otherwise.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest inbound payload accepted by default (64 MiB).
pub const DEFAULT_MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

// =============================================================================
// STATE
// =============================================================================

/// Where the connection is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// `disconnect` is tearing the socket down.
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        })
    }
}

// =============================================================================
// CONFIG
// =============================================================================

/// How outbound messages are put on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutboundFraming {
    /// `[u32-BE length][payload]`, same as inbound.
    #[default]
    LengthPrefixed,
    /// Payload bytes only. Older simulation servers read commands with a
    /// single unframed `recv`.
    Raw,
}

/// Tuning knobs for a [`Connection`].
#[derive(Clone, Copy, Debug)]
pub struct ConnectionConfig {
    /// Upper bound on resolving and connecting.
    pub connect_timeout: Duration,
    /// Inbound frames announcing more bytes than this end the connection.
    /// `None` accepts anything the 32-bit prefix can express.
    pub max_frame_len: Option<u32>,
    pub outbound: OutboundFraming,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_len: Some(DEFAULT_MAX_FRAME_LEN),
            outbound: OutboundFraming::LengthPrefixed,
        }
    }
}

// =============================================================================
// ERROR TYPE
// =============================================================================

/// Error returned by [`Connection`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Address resolution or the TCP connect failed or timed out.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// `connect` was called while a connection is already in progress or up.
    #[error("connection already {0}")]
    AlreadyActive(ConnectionState),
    /// `send` was called without an active connection. The message was dropped.
    #[error("not connected to the simulation server")]
    NotConnected,
    /// The outbound payload could not be framed.
    #[error("cannot frame outbound message: {0}")]
    Frame(FrameError),
    /// The socket failed during a write. The connection is now disconnected.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

// =============================================================================
// CONNECTION
// =============================================================================

/// Handle to the single TCP link with the simulation server.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

/// State shared between connection handles and the receive loop task.
pub(crate) struct Shared {
    pub(crate) config: ConnectionConfig,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) listeners: Listeners,
    /// Bumped for every established socket, under the `writer` lock. A
    /// receive loop only acts while its generation is current.
    pub(crate) generation: AtomicU64,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    reader_task: Mutex<Option<JoinHandle<Option<OwnedReadHalf>>>>,
    peer: Mutex<Option<SocketAddr>>,
}

impl Shared {
    /// Move `Connected` to `Disconnected`. Leaves any other state alone, so a
    /// concurrent `disconnect` keeps ownership of the teardown.
    pub(crate) fn mark_disconnected(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Called by the receive loop after a read failure ends the link. Does
    /// nothing if a newer socket has replaced the loop's own.
    pub(crate) async fn close_after_read_failure(&self, generation: u64) {
        let mut writer = self.writer.lock().await;
        if !self.is_current(generation) {
            debug!(generation, "stale receive loop ended");
            return;
        }
        // Dropping the write half together with the loop's read half closes
        // the socket.
        writer.take();
        if self.mark_disconnected() {
            info!("connection to simulation server lost");
        }
    }
}

/// Resets `Connecting` to `Disconnected` unless the attempt completed, so a
/// failed, timed out or dropped `connect` leaves the handle reusable.
struct ConnectAttempt<'a> {
    shared: &'a Shared,
    established: bool,
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if self.established {
            return;
        }
        let reset = self.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        if reset {
            debug!("connect attempt ended without a connection");
        }
    }
}

impl Connection {
    /// Create a disconnected handle. Nothing touches the network until
    /// [`Connection::connect`].
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: watch::Sender::new(ConnectionState::Disconnected),
                listeners: Listeners::default(),
                generation: AtomicU64::new(0),
                writer: tokio::sync::Mutex::new(None),
                reader_task: Mutex::new(None),
                peer: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Observe state transitions, e.g. to notice a dropped link.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Remote address of the current or most recent connection.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.shared.peer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a callback for every inbound payload.
    ///
    /// Listeners run on the receive loop task, in registration order, once
    /// per frame. A panicking listener is logged and skipped.
    pub fn on_receive<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.shared.listeners.add(Arc::new(listener))
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    /// Receive inbound payloads through a channel instead of a callback.
    ///
    /// Payloads keep wire order. Once the receiver is dropped the forwarding
    /// listener unregisters itself on the next frame.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::downgrade(&self.shared);
        self.shared.listeners.add_with(|id| {
            let forward: Listener = Arc::new(move |payload: &[u8]| {
                if tx.send(payload.to_vec()).is_err() {
                    debug!(listener = ?id, "subscriber gone; removing its listener");
                    if let Some(shared) = shared.upgrade() {
                        shared.listeners.remove(id);
                    }
                }
            });
            forward
        });
        rx
    }

    /// Connect to `host:port` and start the receive loop.
    ///
    /// Resolution and the TCP handshake run on the runtime, bounded by
    /// [`ConnectionConfig::connect_timeout`].
    ///
    /// # Errors
    ///
    /// [`ConnectionError::AlreadyActive`] unless the connection is currently
    /// disconnected, [`ConnectionError::ConnectionFailed`] if the server
    /// cannot be reached. On failure the state is left `Disconnected`, and so
    /// it is when the returned future is dropped before completing.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), ConnectionError> {
        let mut current = ConnectionState::Disconnected;
        let claimed = self.shared.state.send_if_modified(|state| {
            current = *state;
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            warn!(state = %current, "connect rejected; connection already active");
            return Err(ConnectionError::AlreadyActive(current));
        }
        let mut attempt = ConnectAttempt { shared: &self.shared, established: false };

        info!(%host, port, "connecting to simulation server");
        let timeout = self.shared.config.connect_timeout;
        let stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(self.fail_connect(e.to_string())),
            Err(_) => {
                return Err(self.fail_connect(format!("timed out after {}ms", timeout.as_millis())));
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "could not disable Nagle's algorithm");
        }
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();

        // Last await. Once the writer lock is held the attempt runs to
        // completion; dropped before this point, it has touched no slot.
        let mut writer_slot = self.shared.writer.lock().await;
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *writer_slot = Some(writer);
        *self.shared.peer.lock().unwrap_or_else(PoisonError::into_inner) = peer;

        // Hold the task slot while flipping to Connected so a racing
        // `disconnect` always finds the loop handle.
        {
            let mut task = self.shared.reader_task.lock().unwrap_or_else(PoisonError::into_inner);
            self.shared.state.send_replace(ConnectionState::Connected);
            attempt.established = true;
            *task = Some(tokio::spawn(receive::run(reader, Arc::clone(&self.shared), generation)));
        }
        drop(writer_slot);

        match peer {
            Some(addr) => info!(%addr, "connected to simulation server"),
            None => info!("connected to simulation server"),
        }
        Ok(())
    }

    fn fail_connect(&self, reason: String) -> ConnectionError {
        warn!(%reason, "connection to simulation server failed");
        ConnectionError::ConnectionFailed(reason)
    }

    /// Write one message to the server.
    ///
    /// The write completes on the calling task; partial writes are retried
    /// until the whole frame is out. Without an active connection the message
    /// is logged and dropped, never queued.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotConnected`] when not connected,
    /// [`ConnectionError::Frame`] for payloads over `u32::MAX` bytes, and
    /// [`ConnectionError::Transport`] if the socket fails, in which case the
    /// connection is marked disconnected.
    pub async fn send(&self, payload: &[u8]) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            warn!(bytes = payload.len(), "not connected; dropping outbound message");
            return Err(ConnectionError::NotConnected);
        }

        let mut guard = self.shared.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            warn!(bytes = payload.len(), "not connected; dropping outbound message");
            return Err(ConnectionError::NotConnected);
        };

        let written = match self.shared.config.outbound {
            OutboundFraming::LengthPrefixed => frames::write_frame(writer, payload).await,
            OutboundFraming::Raw => write_raw(writer, payload).await.map_err(FrameError::from),
        };

        match written {
            Ok(()) => {
                debug!(bytes = payload.len(), "sent message");
                Ok(())
            }
            Err(FrameError::Io(e)) => {
                error!(error = %e, "write failed; dropping connection");
                guard.take();
                drop(guard);
                self.shared.mark_disconnected();
                Err(ConnectionError::Transport(e))
            }
            Err(e) => Err(ConnectionError::Frame(e)),
        }
    }

    /// Send a UTF-8 text message.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub async fn send_text(&self, text: &str) -> Result<(), ConnectionError> {
        self.send(text.as_bytes()).await
    }

    /// Send a control command.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub async fn send_command(&self, command: Command) -> Result<(), ConnectionError> {
        debug!(%command, "sending command");
        self.send_text(command.as_str()).await
    }

    /// Close the connection. Calling it again, or before connecting, does
    /// nothing.
    ///
    /// Stops the receive loop, shuts down both directions of the socket and
    /// leaves the state `Disconnected`. A frame already being delivered when
    /// this is called may still reach listeners.
    pub async fn disconnect(&self) {
        let closing = self.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Closing;
                true
            } else {
                false
            }
        });
        if !closing {
            debug!(state = %self.state(), "disconnect ignored; not connected");
            return;
        }

        let writer = self.shared.writer.lock().await.take();
        let task = self.shared.reader_task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let reader = match task {
            Some(handle) => match handle.await {
                Ok(reader) => reader,
                Err(e) => {
                    warn!(error = %e, "receive loop ended abnormally");
                    None
                }
            },
            None => None,
        };

        match (reader, writer) {
            (Some(reader), Some(writer)) => shutdown_both(reader, writer),
            (None, Some(mut writer)) => {
                if let Err(e) = writer.shutdown().await {
                    debug!(error = %e, "socket shutdown failed");
                }
            }
            _ => {}
        }

        self.shared.state.send_replace(ConnectionState::Disconnected);
        info!("disconnected from simulation server");
    }
}

async fn write_raw(writer: &mut OwnedWriteHalf, payload: &[u8]) -> std::io::Result<()> {
    writer.write_all(payload).await?;
    writer.flush().await
}

fn shutdown_both(reader: OwnedReadHalf, writer: OwnedWriteHalf) {
    let stream = match reader.reunite(writer) {
        Ok(stream) => stream,
        Err(e) => {
            debug!(error = %e, "socket halves do not match; dropping them");
            return;
        }
    };
    match stream.into_std() {
        Ok(stream) => {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!(error = %e, "socket shutdown failed");
            }
        }
        Err(e) => debug!(error = %e, "could not detach socket for shutdown"),
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
