//! Loopback integration tests for the TCP transport.
//!
//! These tests run the `TransportManager` against real sockets on
//! 127.0.0.1: a client-mode transport delivering to a local listener, and
//! a server-mode transport fanning frames out to several connected peers.
//! They verify the externally observable contract — connectivity events,
//! on-the-wire bytes, best-effort outcomes — not internal state.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use presence_bridge::domain::config::TcpMode;
use presence_bridge::infrastructure::transport::{
    TransportConfig, TransportEvent, TransportManager,
};
use presence_core::protocol::frame;

const DEADLINE: Duration = Duration::from_secs(5);

fn client_config(port: u16) -> TransportConfig {
    TransportConfig {
        mode: TcpMode::Client,
        host: "127.0.0.1".to_string(),
        port,
    }
}

fn server_config(port: u16) -> TransportConfig {
    TransportConfig {
        mode: TcpMode::Server,
        host: "0.0.0.0".to_string(),
        port,
    }
}

/// Receives events until the predicate matches or the deadline passes.
async fn wait_for_event<F>(rx: &mut mpsc::Receiver<TransportEvent>, mut predicate: F)
where
    F: FnMut(&TransportEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + DEADLINE;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("deadline passed while waiting for transport event");
        let event = timeout(remaining, rx.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("event channel closed");
        if predicate(&event) {
            return;
        }
    }
}

/// Grabs a port the OS considers free right now.
async fn free_port() -> u16 {
    let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    probe.local_addr().unwrap().port()
}

async fn connect_with_retry(port: u16) -> TcpStream {
    let deadline = tokio::time::Instant::now() + DEADLINE;
    loop {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(stream) => return stream,
            Err(_) if tokio::time::Instant::now() < deadline => {
                sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("could not connect to transport server: {e}"),
        }
    }
}

// ── Client mode ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_client_connects_reports_status_and_delivers_bytes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (mgr, mut rx) = TransportManager::new(client_config(port));
    mgr.start().await;

    let (mut device_side, _) = timeout(DEADLINE, listener.accept())
        .await
        .expect("accept deadline")
        .expect("accept");

    wait_for_event(&mut rx, |e| {
        matches!(e, TransportEvent::Status { connected: true })
    })
    .await;
    assert!(mgr.is_connected());

    let sent = frame::encode(2, true);
    let outcome = mgr.send_frame(sent).await;
    assert!(outcome.success);
    assert!(outcome.best_effort, "client delivery is accepted-for-send only");
    assert_eq!(outcome.bytes_sent, 8);

    let mut received = [0u8; 8];
    timeout(DEADLINE, device_side.read_exact(&mut received))
        .await
        .expect("read deadline")
        .expect("read");
    assert_eq!(received, sent);

    mgr.stop().await;
    wait_for_event(&mut rx, |e| {
        matches!(e, TransportEvent::Status { connected: false })
    })
    .await;
    assert!(!mgr.is_connected());
}

#[tokio::test]
async fn test_client_notices_peer_close_and_reports_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (mgr, mut rx) = TransportManager::new(client_config(port));
    mgr.start().await;

    let (device_side, _) = timeout(DEADLINE, listener.accept())
        .await
        .expect("accept deadline")
        .expect("accept");
    wait_for_event(&mut rx, |e| {
        matches!(e, TransportEvent::Status { connected: true })
    })
    .await;

    // Device hangs up; the read-drain loop must notice and flip status.
    drop(device_side);
    wait_for_event(&mut rx, |e| {
        matches!(e, TransportEvent::Status { connected: false })
    })
    .await;

    // A send in the disconnected window fails immediately.
    let outcome = mgr.send_frame(frame::encode(1, false)).await;
    assert!(!outcome.success);

    mgr.stop().await;
}

#[tokio::test]
async fn test_client_connect_failure_emits_error_and_reconfig_recovers() {
    // Nothing listens on the probe port: the first attempt fails.
    let dead_port = free_port().await;
    let (mgr, mut rx) = TransportManager::new(client_config(dead_port));
    mgr.start().await;

    wait_for_event(&mut rx, |e| matches!(e, TransportEvent::Error { .. })).await;
    assert!(!mgr.is_connected());

    // Reconfiguration tears down the backoff loop and starts fresh.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live_port = listener.local_addr().unwrap().port();
    mgr.update_config(client_config(live_port)).await;

    let _accepted = timeout(DEADLINE, listener.accept())
        .await
        .expect("accept deadline")
        .expect("accept");
    wait_for_event(&mut rx, |e| {
        matches!(e, TransportEvent::Status { connected: true })
    })
    .await;

    mgr.stop().await;
}

// ── Server mode ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_server_fans_out_to_every_connected_peer() {
    let port = free_port().await;
    let (mgr, mut rx) = TransportManager::new(server_config(port));
    mgr.start().await;

    let mut peer_a = connect_with_retry(port).await;
    let mut peer_b = connect_with_retry(port).await;

    wait_for_event(&mut rx, |e| {
        matches!(e, TransportEvent::Status { connected: true })
    })
    .await;
    let deadline = tokio::time::Instant::now() + DEADLINE;
    while mgr.peer_count().await < 2 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "both peers must register"
        );
        sleep(Duration::from_millis(10)).await;
    }

    let sent = frame::encode(3, false);
    let outcome = mgr.send_frame(sent).await;
    assert!(outcome.success);
    assert_eq!(outcome.bytes_sent, 16, "8 bytes × 2 peers");

    for peer in [&mut peer_a, &mut peer_b] {
        let mut received = [0u8; 8];
        timeout(DEADLINE, peer.read_exact(&mut received))
            .await
            .expect("read deadline")
            .expect("read");
        assert_eq!(received, sent);
    }

    // One peer leaves; the remaining one still receives frames.
    drop(peer_a);
    let deadline = tokio::time::Instant::now() + DEADLINE;
    while mgr.peer_count().await > 1 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "departed peer must be pruned"
        );
        sleep(Duration::from_millis(10)).await;
    }
    assert!(mgr.is_connected(), "one peer is still connected");

    let sent = frame::encode(4, true);
    let outcome = mgr.send_frame(sent).await;
    assert!(outcome.success);
    assert_eq!(outcome.bytes_sent, 8);

    let mut received = [0u8; 8];
    timeout(DEADLINE, peer_b.read_exact(&mut received))
        .await
        .expect("read deadline")
        .expect("read");
    assert_eq!(received, sent);

    mgr.stop().await;
    wait_for_event(&mut rx, |e| {
        matches!(e, TransportEvent::Status { connected: false })
    })
    .await;
}

#[tokio::test]
async fn test_server_reports_disconnected_when_last_peer_leaves() {
    let port = free_port().await;
    let (mgr, mut rx) = TransportManager::new(server_config(port));
    mgr.start().await;

    let peer = connect_with_retry(port).await;
    wait_for_event(&mut rx, |e| {
        matches!(e, TransportEvent::Status { connected: true })
    })
    .await;

    drop(peer);
    wait_for_event(&mut rx, |e| {
        matches!(e, TransportEvent::Status { connected: false })
    })
    .await;

    let outcome = mgr.send_frame(frame::encode(1, true)).await;
    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("not connected"));

    mgr.stop().await;
}

// ── Mode switching ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_switching_client_to_server_tears_down_and_serves() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let device_port = listener.local_addr().unwrap().port();

    let (mgr, mut rx) = TransportManager::new(client_config(device_port));
    mgr.start().await;
    let _device_side = timeout(DEADLINE, listener.accept())
        .await
        .expect("accept deadline")
        .expect("accept");
    wait_for_event(&mut rx, |e| {
        matches!(e, TransportEvent::Status { connected: true })
    })
    .await;

    // Flip to server mode on a fresh port.
    let serve_port = free_port().await;
    mgr.update_config(server_config(serve_port)).await;
    wait_for_event(&mut rx, |e| {
        matches!(e, TransportEvent::Status { connected: false })
    })
    .await;

    let _peer = connect_with_retry(serve_port).await;
    wait_for_event(&mut rx, |e| {
        matches!(e, TransportEvent::Status { connected: true })
    })
    .await;
    assert_eq!(mgr.peer_count().await, 1);

    mgr.stop().await;
}
