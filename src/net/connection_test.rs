use super::*;

use tokio::io::AsyncReadExt;
use tokio::time::timeout;

use crate::net::test_helpers::{WAIT, connected_pair, listener, recv_payload, wait_for_state};

#[tokio::test]
async fn new_connection_starts_disconnected() {
    let conn = Connection::new(ConnectionConfig::default());
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(!conn.is_connected());
    assert!(conn.peer_addr().is_none());
}

#[tokio::test]
async fn connect_transitions_to_connected() {
    let (conn, _rx, _server) = connected_pair(ConnectionConfig::default()).await;
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert!(conn.peer_addr().is_some());
}

#[tokio::test]
async fn hello_then_close_delivers_payload_and_disconnects() {
    let (listener, port) = listener().await;
    let conn = Connection::new(ConnectionConfig::default());
    let mut rx = conn.subscribe();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        socket
            .write_all(&[0x00, 0x00, 0x00, 0x05, 0x68, 0x65, 0x6C, 0x6C, 0x6F])
            .await
            .expect("write hello");
    });

    conn.connect("127.0.0.1", port).await.expect("connect");
    let payload = recv_payload(&mut rx).await;
    assert_eq!(String::from_utf8(payload).expect("utf-8"), "hello");

    server.await.expect("server task");
    wait_for_state(&conn, ConnectionState::Disconnected).await;
}

#[tokio::test]
async fn connect_to_closed_port_fails_and_stays_disconnected() {
    let (listener, port) = listener().await;
    drop(listener);

    let conn = Connection::new(ConnectionConfig::default());
    let err = conn.connect("127.0.0.1", port).await.expect_err("nothing is listening");

    assert!(matches!(err, ConnectionError::ConnectionFailed(_)));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn connect_is_bounded_by_timeout() {
    let config = ConnectionConfig { connect_timeout: Duration::from_millis(50), ..ConnectionConfig::default() };
    let conn = Connection::new(config);

    // Non-routable address: either times out or is refused by the network
    // stack, both of which must surface as a failed connect.
    let result = timeout(WAIT, conn.connect("10.255.255.1", 9)).await.expect("connect must not hang");

    assert!(matches!(result, Err(ConnectionError::ConnectionFailed(_))));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn dropped_connect_future_leaves_handle_reusable() {
    let (listener, port) = listener().await;
    let conn = Connection::new(ConnectionConfig::default());

    // With the writer slot held, connect stalls after the TCP handshake.
    let held = conn.shared.writer.lock().await;
    let abandoned = timeout(Duration::from_millis(50), conn.connect("127.0.0.1", port)).await;
    assert!(abandoned.is_err(), "connect should still be pending");
    drop(held);

    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(conn.peer_addr().is_none());
    let (stale, _) = listener.accept().await.expect("accept abandoned socket");
    drop(stale);

    let (connected, accepted) = tokio::join!(conn.connect("127.0.0.1", port), listener.accept());
    connected.expect("connect after a dropped attempt");
    let (mut server, _) = accepted.expect("accept");

    conn.send_text("retry").await.expect("send");
    let frame = timeout(WAIT, frames::read_frame(&mut server, None)).await.expect("timely").expect("frame");
    assert_eq!(frame, b"retry");

    conn.disconnect().await;
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn second_connect_while_connected_is_rejected() {
    let (conn, _rx, _server) = connected_pair(ConnectionConfig::default()).await;

    let err = conn.connect("127.0.0.1", 1).await.expect_err("already connected");
    assert!(matches!(err, ConnectionError::AlreadyActive(ConnectionState::Connected)));
    assert_eq!(conn.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn send_writes_length_prefixed_frame() {
    let (conn, _rx, mut server) = connected_pair(ConnectionConfig::default()).await;

    conn.send_command(Command::Start).await.expect("send start");
    conn.send_text("step").await.expect("send step");

    let first = timeout(WAIT, frames::read_frame(&mut server, None)).await.expect("timely").expect("frame");
    let second = timeout(WAIT, frames::read_frame(&mut server, None)).await.expect("timely").expect("frame");
    assert_eq!(first, b"start");
    assert_eq!(second, b"step");
}

#[tokio::test]
async fn send_empty_payload_writes_zero_header() {
    let (conn, _rx, mut server) = connected_pair(ConnectionConfig::default()).await;

    conn.send(b"").await.expect("send empty");

    let mut header = [0xAA; 4];
    timeout(WAIT, server.read_exact(&mut header)).await.expect("timely").expect("read header");
    assert_eq!(header, [0, 0, 0, 0]);
}

#[tokio::test]
async fn raw_outbound_writes_bare_payload() {
    let config = ConnectionConfig { outbound: OutboundFraming::Raw, ..ConnectionConfig::default() };
    let (conn, _rx, mut server) = connected_pair(config).await;

    conn.send_command(Command::Step).await.expect("send step");

    let mut buf = [0u8; 4];
    timeout(WAIT, server.read_exact(&mut buf)).await.expect("timely").expect("read");
    assert_eq!(&buf, b"step");
}

#[tokio::test]
async fn send_while_disconnected_is_dropped() {
    let conn = Connection::new(ConnectionConfig::default());
    let err = conn.send_command(Command::Start).await.expect_err("no connection");
    assert!(matches!(err, ConnectionError::NotConnected));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn write_failure_drops_connection_and_stops_receive_loop() {
    let (conn, _rx, _server) = connected_pair(ConnectionConfig::default()).await;

    // Writes after our own write shutdown fail with a broken pipe.
    conn.shared
        .writer
        .lock()
        .await
        .as_mut()
        .expect("writer present while connected")
        .shutdown()
        .await
        .expect("shutdown write half");

    let err = conn.send_text("step").await.expect_err("write must fail");
    assert!(matches!(err, ConnectionError::Transport(_)));
    wait_for_state(&conn, ConnectionState::Disconnected).await;
    assert!(conn.shared.writer.lock().await.is_none());

    let handle = conn
        .shared
        .reader_task
        .lock()
        .expect("task slot")
        .take()
        .expect("receive loop handle");
    let reader = timeout(WAIT, handle).await.expect("loop exits").expect("loop task");
    assert!(reader.is_none());

    assert!(matches!(conn.send_text("step").await, Err(ConnectionError::NotConnected)));
}

#[tokio::test]
async fn stale_receive_loop_leaves_newer_socket_alone() {
    let (conn, _rx, mut server) = connected_pair(ConnectionConfig::default()).await;
    let current = conn.shared.generation.load(Ordering::Acquire);

    conn.shared.close_after_read_failure(current - 1).await;

    assert_eq!(conn.state(), ConnectionState::Connected);
    conn.send_text("still here").await.expect("send on current socket");
    let frame = timeout(WAIT, frames::read_frame(&mut server, None)).await.expect("timely").expect("frame");
    assert_eq!(frame, b"still here");
}

#[tokio::test]
async fn disconnect_closes_socket_and_is_idempotent() {
    let (conn, _rx, mut server) = connected_pair(ConnectionConfig::default()).await;

    conn.disconnect().await;
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    conn.disconnect().await;
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    let end = timeout(WAIT, frames::read_frame(&mut server, None)).await.expect("timely");
    assert!(matches!(end, Err(FrameError::PeerClosed | FrameError::Io(_))));
}

#[tokio::test]
async fn disconnect_before_connect_is_a_no_op() {
    let conn = Connection::new(ConnectionConfig::default());
    conn.disconnect().await;
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn send_after_disconnect_is_not_connected() {
    let (conn, _rx, _server) = connected_pair(ConnectionConfig::default()).await;
    conn.disconnect().await;

    let err = conn.send_text("step").await.expect_err("disconnected");
    assert!(matches!(err, ConnectionError::NotConnected));
}

#[tokio::test]
async fn reconnect_after_disconnect_uses_a_fresh_socket() {
    let (listener, port) = listener().await;
    let conn = Connection::new(ConnectionConfig::default());

    let (connected, first) = tokio::join!(conn.connect("127.0.0.1", port), listener.accept());
    connected.expect("first connect");
    drop(first.expect("first accept"));
    conn.disconnect().await;

    let (connected, second) = tokio::join!(conn.connect("127.0.0.1", port), listener.accept());
    connected.expect("second connect");
    let (mut server, _) = second.expect("second accept");

    conn.send_text("again").await.expect("send on new socket");
    let frame = timeout(WAIT, frames::read_frame(&mut server, None)).await.expect("timely").expect("frame");
    assert_eq!(frame, b"again");
}

#[tokio::test]
async fn cloned_handles_share_one_connection() {
    let (conn, _rx, mut server) = connected_pair(ConnectionConfig::default()).await;
    let other = conn.clone();

    other.send_text("from clone").await.expect("send");
    let frame = timeout(WAIT, frames::read_frame(&mut server, None)).await.expect("timely").expect("frame");
    assert_eq!(frame, b"from clone");

    other.disconnect().await;
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn watch_state_reports_connect_and_drop() {
    let (listener, port) = listener().await;
    let conn = Connection::new(ConnectionConfig::default());
    let mut state = conn.watch_state();
    assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);

    let (connected, accepted) = tokio::join!(conn.connect("127.0.0.1", port), listener.accept());
    connected.expect("connect");
    assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);

    drop(accepted.expect("accept"));
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Disconnected))
        .await
        .expect("drop noticed")
        .expect("state channel open");
}

#[test]
fn state_display_is_lowercase() {
    assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    assert_eq!(ConnectionState::Closing.to_string(), "closing");
    assert_eq!(
        ConnectionError::AlreadyActive(ConnectionState::Connected).to_string(),
        "connection already connected"
    );
}
