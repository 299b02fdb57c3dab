//! Address sharing: everyone registered at an address is linked to everyone else.

use crate::harness::{event, text_event, TestClient};
use rendezvous_node::peer_pool::{PeerPool, PoolConfig};
use rendezvous_protocol::{ConnectionId, EventType};

fn conference_pool() -> PeerPool {
    PeerPool::new(PoolConfig::new("/conferenceapp").with_address_sharing(true))
}

#[tokio::test]
async fn test_three_way_room() {
    let pool = conference_pool();
    let mut a = TestClient::connect(&pool, "a").await;
    let mut b = TestClient::connect(&pool, "b").await;
    let mut c = TestClient::connect(&pool, "c").await;
    let joined = text_event(EventType::ServerInitialized, -1, "room");

    a.start_server("room");
    assert_eq!(a.expect_event().await, joined);

    b.start_server("room");
    assert_eq!(b.expect_event().await, joined);
    assert_eq!(a.expect_event().await, event(EventType::NewConnection, 16384));
    assert_eq!(b.expect_event().await, event(EventType::NewConnection, 16384));

    c.start_server("room");
    assert_eq!(c.expect_event().await, joined);
    assert_eq!(a.expect_event().await, event(EventType::NewConnection, 16385));
    assert_eq!(b.expect_event().await, event(EventType::NewConnection, 16385));
    assert_eq!(c.expect_event().await, event(EventType::NewConnection, 16384));
    assert_eq!(c.expect_event().await, event(EventType::NewConnection, 16385));

    // c -> a arrives on a's link to c.
    c.send_message(16384, b"hello a", true);
    let got = a.expect_event().await;
    assert_eq!(got.connection_id, ConnectionId(16385));
    assert_eq!(got.data.as_bytes().map(|b| b.to_vec()), Some(b"hello a".to_vec()));

    // b leaves: a and c each lose their link to b.
    b.close();
    b.expect_close().await;
    assert_eq!(a.expect_event().await, event(EventType::Disconnected, 16384));
    assert_eq!(c.expect_event().await, event(EventType::Disconnected, 16385));
    assert_eq!(pool.count().await, 2);
}

#[tokio::test]
async fn test_connect_to_shared_address_with_many_registrants_fails() {
    let pool = conference_pool();
    let mut a = TestClient::connect(&pool, "a").await;
    let mut b = TestClient::connect(&pool, "b").await;
    let mut d = TestClient::connect(&pool, "d").await;

    a.start_server("room");
    a.expect_event().await;
    b.start_server("room");
    b.expect_event().await;
    b.expect_event().await;
    a.expect_event().await;

    d.connect_to("room", 3);
    assert_eq!(d.expect_event().await, event(EventType::ConnectionFailed, 3));
}

#[tokio::test]
async fn test_last_registrant_leaving_frees_address() {
    let pool = conference_pool();
    let mut a = TestClient::connect(&pool, "a").await;
    let mut b = TestClient::connect(&pool, "b").await;

    a.start_server("room");
    a.expect_event().await;
    a.close();
    a.expect_close().await;
    a.join().await;

    // A fresh registrant has nobody to join.
    b.start_server("room");
    assert_eq!(
        b.expect_event().await,
        text_event(EventType::ServerInitialized, -1, "room")
    );
    b.expect_silence().await;
}
