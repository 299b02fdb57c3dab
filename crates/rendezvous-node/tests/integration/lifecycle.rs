//! Session lifecycle: handshake meta-frames, keepalive, cleanup.

use std::time::Duration;

use crate::harness::{event, wait_for_count, TestClient, Wire};
use rendezvous_node::peer_pool::{PeerPool, PoolConfig};
use rendezvous_protocol::{EventType, Frame, PROTOCOL_VERSION};

fn pool() -> PeerPool {
    PeerPool::new(PoolConfig::new("/callapp"))
}

#[tokio::test]
async fn test_version_and_heartbeat_are_answered() {
    let pool = pool();
    let mut a = TestClient::connect(&pool, "a").await;

    a.send_raw(&[201, 1]);
    assert_eq!(a.expect_frame().await, Frame::Version(PROTOCOL_VERSION));

    a.send_raw(&[202]);
    assert_eq!(a.expect_frame().await, Frame::Heartbeat);
}

#[tokio::test]
async fn test_invalid_frames_are_ignored() {
    let pool = pool();
    let mut a = TestClient::connect(&pool, "a").await;

    a.send_raw(&[]);
    a.send_raw(&[2, 1, 0, 0, 200, 0, 0, 0, 1]);
    a.send_raw(&[6, 7, 0, 0]);
    a.send_raw(&[77, 0, 0, 0]);
    a.send_raw(&[230]);
    a.expect_silence().await;

    // Session still works afterwards.
    a.send_raw(&[202]);
    assert_eq!(a.expect_frame().await, Frame::Heartbeat);
    assert_eq!(pool.count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_probes_while_acknowledged() {
    let pool = pool();
    let mut a = TestClient::connect_with_keepalive(&pool, "a", Duration::from_secs(1)).await;

    for _ in 0..3 {
        assert_eq!(a.next_wire().await, Some(Wire::Probe));
        a.ack_probe();
    }
    assert_eq!(pool.count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_timeout_tears_session_down() {
    let pool = pool();
    let mut a = TestClient::connect_with_keepalive(&pool, "a", Duration::from_secs(1)).await;
    let mut b = TestClient::connect(&pool, "b").await;

    a.start_server("room");
    a.expect_event().await;
    b.connect_to("room", 2);
    b.expect_event().await;
    assert_eq!(a.expect_event().await, event(EventType::NewConnection, 16384));

    // First probe goes out and is never answered.
    assert_eq!(a.next_wire().await, Some(Wire::Probe));
    assert_eq!(a.next_wire().await, Some(Wire::Close));

    assert_eq!(b.expect_event().await, event(EventType::Disconnected, 2));
    wait_for_count(&pool, 1).await;
    a.join().await;
}

#[tokio::test]
async fn test_closed_client_is_cleaned_up() {
    let pool = pool();
    let a = TestClient::connect(&pool, "a").await;
    let _b = TestClient::connect(&pool, "b").await;
    assert_eq!(pool.count().await, 2);

    a.close();
    a.join().await;
    assert_eq!(pool.count().await, 1);
}

#[tokio::test]
async fn test_close_after_disconnect_notifies_once() {
    let pool = pool();
    let mut a = TestClient::connect(&pool, "a").await;
    let mut b = TestClient::connect(&pool, "b").await;

    a.start_server("room");
    a.expect_event().await;
    b.connect_to("room", 4);
    a.expect_event().await;
    b.expect_event().await;

    // Close arrives twice; the second is a no-op.
    a.close();
    a.close();
    a.expect_close().await;
    assert_eq!(b.expect_event().await, event(EventType::Disconnected, 4));
    b.expect_silence().await;
    a.join().await;
    assert_eq!(pool.count().await, 1);
}

#[tokio::test]
async fn test_shutdown_closes_linked_sessions() {
    let pool = pool();
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let mut a = TestClient::connect_with_shutdown(&pool, "a", shutdown_tx.subscribe()).await;
    let mut b = TestClient::connect_with_shutdown(&pool, "b", shutdown_tx.subscribe()).await;

    a.start_server("room");
    a.expect_event().await;
    b.connect_to("room", 4);
    assert_eq!(a.expect_event().await.event_type, EventType::NewConnection);
    assert_eq!(b.expect_event().await.event_type, EventType::NewConnection);

    shutdown_tx.send(()).unwrap();
    a.expect_close().await;
    b.expect_close().await;
    wait_for_count(&pool, 0).await;
    assert!(pool.is_address_available(&"room".into()).await);
    a.join().await;
    b.join().await;
}
