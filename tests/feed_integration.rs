//! Live Feed Integration Tests
//!
//! Runs a real WebSocket server in-process and drives the sensor link and
//! the full monitor loop against it: ordered snapshot delivery, malformed
//! frame handling, session drops with the fixed reconnect delay, and
//! operator mute round-trips through the monitor handle.

use futures::SinkExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use firewatch::audio::NullBackend;
use firewatch::config::{MonitorConfig, SourceConfig};
use firewatch::link::{LinkEvent, SensorLink};
use firewatch::monitor::{MonitorLoop, MonitorState};
use firewatch::types::{ConnectionState, SensorSnapshot, ZoneId, ZoneReading, ZoneStatus};

// ============================================================================
// Helpers
// ============================================================================

/// Serialize a snapshot where each listed zone is safe or in danger.
fn snapshot_json(entries: &[(ZoneId, bool)]) -> String {
    let floors: BTreeMap<ZoneId, ZoneReading> = entries
        .iter()
        .map(|(id, danger)| {
            (
                *id,
                ZoneReading {
                    status: if *danger {
                        ZoneStatus::Danger
                    } else {
                        ZoneStatus::Safe
                    },
                    temperature: if *danger { 58.0 } else { 24.0 },
                    gas: if *danger { 450.0 } else { 180.0 },
                    threshold: 300.0,
                },
            )
        })
        .collect();
    let danger_floors = entries
        .iter()
        .filter(|(_, danger)| *danger)
        .map(|(id, _)| *id)
        .collect();
    serde_json::to_string(&SensorSnapshot {
        floors,
        danger_floors,
    })
    .expect("snapshot should serialize")
}

/// Bind a feed listener on an ephemeral port.
async fn bind_feed() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener should have an address");
    (listener, format!("ws://{addr}/ws/sensors"))
}

/// Source config with a short reconnect delay to keep tests fast.
fn source_config(url: &str) -> SourceConfig {
    SourceConfig {
        url: url.to_string(),
        connect_timeout_secs: 5,
        reconnect_delay_ms: 200,
    }
}

fn expect_snapshot(event: LinkEvent) -> SensorSnapshot {
    match event {
        LinkEvent::Snapshot(snapshot) => snapshot,
        other => panic!("expected a snapshot event, got {other:?}"),
    }
}

/// Poll the monitor's watch channel until `predicate` holds.
async fn wait_for_state<F>(rx: &mut watch::Receiver<MonitorState>, mut predicate: F) -> MonitorState
where
    F: FnMut(&MonitorState) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            {
                let state = rx.borrow_and_update().clone();
                if predicate(&state) {
                    return state;
                }
            }
            rx.changed()
                .await
                .expect("monitor loop ended while waiting for state");
        }
    })
    .await
    .expect("state condition not reached in time")
}

// ============================================================================
// Sensor Link
// ============================================================================

#[tokio::test]
async fn test_snapshots_arrive_in_order_and_malformed_frames_are_skipped() {
    let (listener, url) = bind_feed().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept should succeed");
        let mut ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake should succeed");
        ws.send(Message::Text(snapshot_json(&[(1, false), (2, true)])))
            .await
            .expect("first snapshot should send");
        ws.send(Message::Text("{this is not a snapshot".to_string()))
            .await
            .expect("malformed frame should send");
        ws.send(Message::Text(snapshot_json(&[(1, true), (2, true)])))
            .await
            .expect("second snapshot should send");
        // Hold the session open until the client has drained everything.
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let mut link = SensorLink::new(&source_config(&url));
    assert_eq!(
        link.next_event().await,
        LinkEvent::State(ConnectionState::Connecting)
    );
    assert_eq!(
        link.next_event().await,
        LinkEvent::State(ConnectionState::Connected)
    );

    let first = expect_snapshot(link.next_event().await);
    assert_eq!(first.danger_floors, vec![2]);
    assert_eq!(first.floors.len(), 2);

    // The malformed frame is discarded without an event or a reconnect:
    // the very next event is the following snapshot on the same session.
    let second = expect_snapshot(link.next_event().await);
    assert_eq!(second.danger_floors, vec![1, 2]);

    let stats = link.stats();
    assert_eq!(stats.snapshots_received, 2);
    assert_eq!(stats.parse_failures, 1);
    assert_eq!(stats.connect_attempts, 1);
    assert_eq!(stats.sessions_completed, 0);

    link.close().await;
    server.await.expect("server task should finish");
}

#[tokio::test]
async fn test_session_drop_reconnects_after_fixed_delay() {
    let (listener, url) = bind_feed().await;

    let server = tokio::spawn(async move {
        // First session: one snapshot, then a server-side close.
        let (stream, _) = listener.accept().await.expect("first accept should succeed");
        let mut ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("first handshake should succeed");
        ws.send(Message::Text(snapshot_json(&[(1, false)])))
            .await
            .expect("snapshot should send");
        ws.close(None).await.expect("close should send");
        drop(ws);

        // Second session: the reconnected client gets fresh data.
        let (stream, _) = listener.accept().await.expect("second accept should succeed");
        let mut ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("second handshake should succeed");
        ws.send(Message::Text(snapshot_json(&[(1, true)])))
            .await
            .expect("snapshot should send");
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let mut link = SensorLink::new(&source_config(&url)); // 200ms reconnect
    assert_eq!(
        link.next_event().await,
        LinkEvent::State(ConnectionState::Connecting)
    );
    assert_eq!(
        link.next_event().await,
        LinkEvent::State(ConnectionState::Connected)
    );
    let first = expect_snapshot(link.next_event().await);
    assert!(first.danger_floors.is_empty());

    // Server closed: the link reports the drop, waits out the fixed
    // delay, and dials again.
    assert_eq!(
        link.next_event().await,
        LinkEvent::State(ConnectionState::Disconnected)
    );
    let dropped_at = std::time::Instant::now();
    assert_eq!(
        link.next_event().await,
        LinkEvent::State(ConnectionState::Connecting)
    );
    let waited = dropped_at.elapsed();
    assert!(
        waited >= Duration::from_millis(180),
        "reconnected before the fixed delay elapsed: {waited:?}"
    );
    assert!(waited < Duration::from_secs(2), "reconnect delay far too long: {waited:?}");

    assert_eq!(
        link.next_event().await,
        LinkEvent::State(ConnectionState::Connected)
    );
    let second = expect_snapshot(link.next_event().await);
    assert_eq!(second.danger_floors, vec![1]);

    let stats = link.stats();
    assert_eq!(stats.sessions_completed, 1);
    assert_eq!(stats.connect_attempts, 2);
    assert_eq!(stats.snapshots_received, 2);

    link.close().await;
    server.await.expect("server task should finish");
}

// ============================================================================
// Monitor Loop
// ============================================================================

#[tokio::test]
async fn test_monitor_loop_tracks_feed_and_operator_mute() {
    let (listener, url) = bind_feed().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept should succeed");
        let mut ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake should succeed");
        ws.send(Message::Text(snapshot_json(&[(1, false), (2, false)])))
            .await
            .expect("calm snapshot should send");
        ws.send(Message::Text(snapshot_json(&[(1, false), (2, true)])))
            .await
            .expect("danger snapshot should send");
        // Keep the session alive while the client reacts.
        tokio::time::sleep(Duration::from_millis(1500)).await;
    });

    let mut cfg = MonitorConfig::default();
    cfg.source = source_config(&url);
    let cancel = CancellationToken::new();
    let (monitor, handle) = MonitorLoop::new(&cfg, Arc::new(NullBackend), cancel.clone());
    let mut rx = handle.subscribe();
    let loop_task = tokio::spawn(monitor.run());

    // The danger snapshot becomes observable state: connected, zone 2
    // in danger, alert active and not muted.
    let state = wait_for_state(&mut rx, |s| s.alert.active).await;
    assert_eq!(state.connection, ConnectionState::Connected);
    assert!(state.danger.contains(2));
    assert_eq!(state.zones.len(), 2);
    assert!(!state.alert.muted);
    assert!(state.last_snapshot_at.is_some());

    // Operator mutes, then unmutes; the danger stays active throughout.
    handle.mute().await;
    let state = wait_for_state(&mut rx, |s| s.alert.muted).await;
    assert!(state.alert.active);

    handle.unmute().await;
    let state = wait_for_state(&mut rx, |s| !s.alert.muted).await;
    assert!(state.alert.active);

    cancel.cancel();
    let stats = tokio::time::timeout(Duration::from_secs(2), loop_task)
        .await
        .expect("monitor should stop promptly on cancel")
        .expect("monitor task should not panic");

    assert!(stats.snapshots_applied >= 2);
    assert_eq!(stats.danger_changes, 1, "only the calm->danger transition changes membership");
    assert_eq!(stats.intents_handled, 2);

    server.await.expect("server task should finish");
}

#[tokio::test]
async fn test_monitor_keeps_state_across_feed_loss() {
    let (listener, url) = bind_feed().await;

    let server = tokio::spawn(async move {
        // One session with danger, then the server goes away entirely.
        let (stream, _) = listener.accept().await.expect("accept should succeed");
        let mut ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake should succeed");
        ws.send(Message::Text(snapshot_json(&[(2, true)])))
            .await
            .expect("snapshot should send");
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(ws);
        drop(listener);
    });

    let mut cfg = MonitorConfig::default();
    cfg.source = source_config(&url);
    let cancel = CancellationToken::new();
    let (monitor, handle) = MonitorLoop::new(&cfg, Arc::new(NullBackend), cancel.clone());
    let mut rx = handle.subscribe();
    let loop_task = tokio::spawn(monitor.run());

    let state = wait_for_state(&mut rx, |s| s.alert.active).await;
    assert!(state.danger.contains(2));

    // Feed dies. The alarm state must survive the disconnect: the last
    // known danger stays, only the connection state changes.
    let state = wait_for_state(&mut rx, |s| s.connection == ConnectionState::Disconnected).await;
    assert!(state.alert.active, "feed loss must not clear the alarm");
    assert!(state.danger.contains(2), "last known danger set is retained");

    cancel.cancel();
    let stats = tokio::time::timeout(Duration::from_secs(2), loop_task)
        .await
        .expect("monitor should stop promptly on cancel")
        .expect("monitor task should not panic");
    assert!(stats.link.sessions_completed >= 1);

    server.await.expect("server task should finish");
}
