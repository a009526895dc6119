use std::sync::Arc;
use std::time::Duration;

use gossamer_network::{BusAdapter, MemoryTransport, Transport};
use gossamer_peer::*;
use gossamer_protocol::{decode_frame, Address, WireFormat};

#[tokio::test]
async fn test_teardown_silences_peer() {
    let hub: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let mut peer = Peer::builder(Address::new("mem://a"), hub.clone())
        .config(PeerConfig {
            broadcast_delay_secs: 0.01,
            ..Default::default()
        })
        .build()
        .unwrap();

    let listener = BusAdapter::new(Address::new("mem://listener"), hub, WireFormat::Envelope, 1024);
    listener.connect(peer.address()).await.unwrap();
    let mut inbound = listener.take_inbound().await.unwrap();

    peer.setup().await.unwrap();
    assert_eq!(peer.status(), PeerStatus::Running);

    let frame = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decode_frame(&frame).unwrap().tag, "GROUP");

    peer.teardown().await.unwrap();
    assert_eq!(peer.status(), PeerStatus::Stopped);

    tokio::time::sleep(Duration::from_millis(50)).await;
    while inbound.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(inbound.try_recv().is_err(), "stopped peer kept publishing");
}

#[tokio::test]
async fn test_teardown_without_setup() {
    let hub: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let mut peer = Peer::builder(Address::new("mem://a"), hub).build().unwrap();
    peer.teardown().await.unwrap();
    assert_eq!(peer.status(), PeerStatus::Stopped);
    assert!(peer.setup().await.is_err());
}

#[tokio::test]
async fn test_invalid_config_rejected_at_build() {
    let hub: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let result = Peer::builder(Address::new("mem://a"), hub)
        .config(PeerConfig {
            window_capacity: 0,
            ..Default::default()
        })
        .build();
    assert!(matches!(result, Err(PeerError::Config(_))));
}

#[tokio::test]
async fn test_garbage_frames_do_not_stop_peer() {
    let hub: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let mut a = Peer::builder(Address::new("mem://a"), hub.clone())
        .config(PeerConfig {
            broadcast_delay_secs: 0.01,
            ..Default::default()
        })
        .build()
        .unwrap();
    let noisy = BusAdapter::new(Address::new("mem://noisy"), hub, WireFormat::Envelope, 16);
    noisy.bind().await.unwrap();
    a.join(noisy.address()).await.unwrap();
    a.setup().await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    noisy.publish("not a frame").await.unwrap();
    noisy.publish("{\"version\":1,\"tag\":\"GROUP\",\"payload\":7}").await.unwrap();
    noisy
        .publish("GROUP=['mem://late']")
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if a.group().await.contains(&Address::new("mem://late")) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(a.group().await.contains(&Address::new("mem://late")));
    assert_eq!(a.report().await.status, PeerStatus::Running);
    a.teardown().await.unwrap();
}
