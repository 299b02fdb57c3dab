//! Two-party relay through a non-sharing pool.

use crate::harness::{event, text_event, TestClient};
use rendezvous_node::peer_pool::{PeerPool, PoolConfig};
use rendezvous_protocol::{ConnectionId, EventType, NetworkEvent, Utf16String};

fn call_pool() -> PeerPool {
    PeerPool::new(PoolConfig::new("/callapp"))
}

#[tokio::test]
async fn test_connect_exchange_disconnect() {
    let pool = call_pool();
    let mut a = TestClient::connect(&pool, "a").await;
    let mut b = TestClient::connect(&pool, "b").await;

    a.start_server("room1");
    assert_eq!(
        a.expect_event().await,
        text_event(EventType::ServerInitialized, -1, "room1")
    );

    b.connect_to("room1", 5);
    assert_eq!(a.expect_event().await, event(EventType::NewConnection, 16384));
    assert_eq!(b.expect_event().await, event(EventType::NewConnection, 5));

    b.send_message(5, &[1, 2, 3], true);
    assert_eq!(
        a.expect_event().await,
        NetworkEvent::new(
            EventType::ReliableMessageReceived,
            ConnectionId(16384),
            vec![1u8, 2, 3].into()
        )
    );

    a.send_message(16384, b"hi", false);
    assert_eq!(
        b.expect_event().await,
        NetworkEvent::new(
            EventType::UnreliableMessageReceived,
            ConnectionId(5),
            b"hi".to_vec().into()
        )
    );

    b.disconnect(5);
    assert_eq!(b.expect_event().await, event(EventType::Disconnected, 5));
    assert_eq!(a.expect_event().await, event(EventType::Disconnected, 16384));

    // Link is gone; further data on it is dropped.
    b.send_message(5, &[9], true);
    a.expect_silence().await;
    b.expect_silence().await;
}

#[tokio::test]
async fn test_text_payload_forwarded_as_text() {
    let pool = call_pool();
    let mut a = TestClient::connect(&pool, "a").await;
    let mut b = TestClient::connect(&pool, "b").await;
    a.start_server("room");
    a.expect_event().await;
    b.connect_to("room", 1);
    a.expect_event().await;
    b.expect_event().await;

    let units = vec![0x0068, 0xD800, 0x0069];
    b.send_event(NetworkEvent::new(
        EventType::ReliableMessageReceived,
        ConnectionId(1),
        Utf16String::from_units(units.clone()).into(),
    ));
    let got = a.expect_event().await;
    assert_eq!(got.connection_id, ConnectionId(16384));
    assert_eq!(got.text().map(|t| t.units().to_vec()), Some(units));
}

#[tokio::test]
async fn test_connect_to_unknown_address_fails() {
    let pool = call_pool();
    let mut b = TestClient::connect(&pool, "b").await;
    b.connect_to("nobody", 7);
    assert_eq!(b.expect_event().await, event(EventType::ConnectionFailed, 7));
}

#[tokio::test]
async fn test_address_is_exclusive() {
    let pool = call_pool();
    let mut a = TestClient::connect(&pool, "a").await;
    let mut b = TestClient::connect(&pool, "b").await;

    a.start_server("room");
    a.expect_event().await;
    b.start_server("room");
    assert_eq!(
        b.expect_event().await,
        text_event(EventType::ServerInitFailed, -1, "room")
    );
}

#[tokio::test]
async fn test_stop_server_keeps_existing_links() {
    let pool = call_pool();
    let mut a = TestClient::connect(&pool, "a").await;
    let mut b = TestClient::connect(&pool, "b").await;
    let mut c = TestClient::connect(&pool, "c").await;

    a.start_server("room");
    a.expect_event().await;
    b.connect_to("room", 1);
    a.expect_event().await;
    b.expect_event().await;

    a.stop_server();
    assert_eq!(a.expect_event().await, event(EventType::ServerClosed, -1));

    c.connect_to("room", 1);
    assert_eq!(c.expect_event().await, event(EventType::ConnectionFailed, 1));

    b.send_message(1, b"still here", true);
    assert_eq!(a.expect_event().await.connection_id, ConnectionId(16384));
}

#[tokio::test]
async fn test_close_disconnects_peer_and_releases_address() {
    let pool = call_pool();
    let mut a = TestClient::connect(&pool, "a").await;
    let mut b = TestClient::connect(&pool, "b").await;
    let mut c = TestClient::connect(&pool, "c").await;

    a.start_server("room");
    a.expect_event().await;
    b.connect_to("room", 5);
    a.expect_event().await;
    b.expect_event().await;

    a.close();
    a.expect_close().await;
    assert_eq!(b.expect_event().await, event(EventType::Disconnected, 5));
    a.join().await;
    assert_eq!(pool.count().await, 2);
    assert!(pool.is_address_available(&"room".into()).await);

    c.start_server("room");
    assert_eq!(
        c.expect_event().await,
        text_event(EventType::ServerInitialized, -1, "room")
    );
}

#[tokio::test]
async fn test_each_incoming_link_gets_a_fresh_id() {
    let pool = call_pool();
    let mut a = TestClient::connect(&pool, "a").await;
    let mut b = TestClient::connect(&pool, "b").await;
    let mut c = TestClient::connect(&pool, "c").await;

    a.start_server("room");
    a.expect_event().await;

    b.connect_to("room", 1);
    assert_eq!(a.expect_event().await, event(EventType::NewConnection, 16384));
    b.expect_event().await;

    c.connect_to("room", 1);
    assert_eq!(a.expect_event().await, event(EventType::NewConnection, 16385));
    c.expect_event().await;

    // Reusing a live id on the caller is refused.
    b.connect_to("room", 1);
    assert_eq!(b.expect_event().await, event(EventType::ConnectionFailed, 1));
    a.expect_silence().await;
}
