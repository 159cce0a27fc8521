//! End-to-end negotiation scenarios: a real Controller and one or more real
//! Peer engines, each on an ephemeral localhost UDP port, wired together only
//! through the wire protocol (§8 "Concrete scenarios").

use std::sync::Arc;
use std::time::Duration;

use proto_controller::ControllerEngine;
use proto_peer::PeerEngine;
use proto_shared::config::{ControllerOptions, PeerOptions, TransportOptions};
use proto_shared::event::{ControllerEvent, NegotiationState, PeerConnectionState, PeerEvent};
use proto_shared::logging::NullSink;

async fn bind_controller(peer_timeout_secs: f64) -> (Arc<ControllerEngine>, std::net::SocketAddr) {
    // Bind an ephemeral socket first just to learn a free local port, then
    // hand that exact address to the controller's own transport.
    let probe = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let controller = ControllerEngine::new(
        Arc::new(NullSink),
        TransportOptions {
            local: addr,
            remote: None,
            send_queue_capacity: 16,
        },
        ControllerOptions { peer_timeout_secs },
    );
    controller.start().await.unwrap();
    (controller, addr)
}

async fn spawn_peer(peer_id: u16, controller_addr: std::net::SocketAddr) -> Arc<PeerEngine> {
    let peer = PeerEngine::new(
        Arc::new(NullSink),
        TransportOptions {
            local: "127.0.0.1:0".parse().unwrap(),
            remote: Some(controller_addr),
            send_queue_capacity: 16,
        },
        PeerOptions {
            peer_id,
            // Disable the automatic timer; these tests drive negotiation manually.
            disconnected_interval_secs: 0.0,
            connected_interval_secs: 0.0,
            auto_negotiate: false,
        },
    );
    peer.start().await.unwrap();
    peer
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn negotiation_happy_path() {
    let (controller, controller_addr) = bind_controller(180.0).await;
    let mut controller_events = controller.subscribe();

    let peer = spawn_peer(0x1234, controller_addr).await;
    let mut peer_events = peer.subscribe();

    peer.send_negotiation().await;

    let controller_event = tokio::time::timeout(Duration::from_secs(2), controller_events.recv())
        .await
        .unwrap()
        .unwrap();
    match controller_event {
        ControllerEvent::PeerStateChanged {
            state,
            peer_id,
            session_id,
            ..
        } => {
            assert_eq!(state, PeerConnectionState::Connected);
            assert_eq!(peer_id, 0x1234);
            assert_eq!(session_id, 1);
        }
        other => panic!("unexpected controller event: {other:?}"),
    }

    let peer_event = tokio::time::timeout(Duration::from_secs(2), peer_events.recv())
        .await
        .unwrap()
        .unwrap();
    match peer_event {
        PeerEvent::NegotiationStateChanged {
            state,
            peer_id,
            session_id,
            ..
        } => {
            assert_eq!(state, NegotiationState::Connected);
            assert_eq!(peer_id, 0x1234);
            assert_eq!(session_id, 1);
        }
        other => panic!("unexpected peer event: {other:?}"),
    }

    assert!(peer.is_connected().await);
    assert_eq!(peer.session_id().await, 1);

    peer.stop().await;
    controller.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unique_session_ids_across_distinct_peers() {
    let (controller, controller_addr) = bind_controller(180.0).await;

    let peer_a = spawn_peer(0x0001, controller_addr).await;
    peer_a.send_negotiation().await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(peer_a.session_id().await, 1);
    peer_a.stop().await;

    let peer_b = spawn_peer(0x0002, controller_addr).await;
    peer_b.send_negotiation().await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(peer_b.session_id().await, 2);
    peer_b.stop().await;

    assert_eq!(controller.peer_count().await, 2);
    controller.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_reused_across_reconnect() {
    let (controller, controller_addr) = bind_controller(180.0).await;

    let peer = spawn_peer(0x1234, controller_addr).await;
    peer.send_negotiation().await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    let first_session = peer.session_id().await;
    assert_eq!(first_session, 1);

    // Re-negotiate (simulating a reconnect) before eviction.
    peer.send_negotiation().await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(peer.session_id().await, first_session);

    peer.stop().await;
    controller.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sample_up_is_auto_stamped_with_session_and_peer_id() {
    let (controller, controller_addr) = bind_controller(180.0).await;
    let mut controller_events = controller.subscribe();

    let peer = spawn_peer(0xABCD, controller_addr).await;
    peer.send_negotiation().await;

    // Drain the PeerStateChanged(Connected) event before sending the sample.
    let _ = tokio::time::timeout(Duration::from_secs(2), controller_events.recv())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(peer.is_connected().await);

    use proto_shared::wire::{CommandType, SampleUpMessage};
    let sent = peer
        .send_sample_up(
            SampleUpMessage {
                session_id: 0,
                peer_id: 0,
                command: CommandType::Update,
                signed_value: 7,
                sequence: 1,
                value: 3.5,
            },
            None,
        )
        .await;
    assert!(sent);

    let event = tokio::time::timeout(Duration::from_secs(2), controller_events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        ControllerEvent::SampleUpReceived { message, .. } => {
            assert_eq!(message.session_id, 1);
            assert_eq!(message.peer_id, 0xABCD);
            assert_eq!(message.signed_value, 7);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    peer.stop().await;
    controller.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn eviction_fires_disconnected_exactly_once() {
    let probe = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let controller = ControllerEngine::with_sweep_period(
        Arc::new(NullSink),
        TransportOptions {
            local: addr,
            remote: None,
            send_queue_capacity: 16,
        },
        ControllerOptions {
            peer_timeout_secs: 0.1,
        },
        Duration::from_millis(50),
    );
    controller.start().await.unwrap();
    let mut controller_events = controller.subscribe();

    let peer = spawn_peer(0x4242, addr).await;
    peer.send_negotiation().await;

    let connected = tokio::time::timeout(Duration::from_secs(2), controller_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        connected,
        ControllerEvent::PeerStateChanged {
            state: PeerConnectionState::Connected,
            ..
        }
    ));

    // No further negotiations: the peer ages past the 100ms timeout and the
    // 50ms sweeper should evict it exactly once.
    let disconnected = tokio::time::timeout(Duration::from_secs(2), controller_events.recv())
        .await
        .unwrap()
        .unwrap();
    match disconnected {
        ControllerEvent::PeerStateChanged {
            state,
            peer_id,
            session_id,
            ..
        } => {
            assert_eq!(state, PeerConnectionState::Disconnected);
            assert_eq!(peer_id, 0x4242);
            assert_eq!(session_id, 1);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(controller.session_for_peer(0x4242).await, None);

    // The sweeper must not re-emit a second Disconnected for the same peer.
    let second = tokio::time::timeout(Duration::from_millis(200), controller_events.recv()).await;
    assert!(second.is_err(), "sweeper evicted the same peer twice");

    peer.stop().await;
    controller.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sweeper_never_evicts_a_fresh_record() {
    let (controller, controller_addr) = bind_controller(10.0).await;
    let mut controller_events = controller.subscribe();

    let peer = spawn_peer(0x9999, controller_addr).await;
    peer.send_negotiation().await;
    let _ = tokio::time::timeout(Duration::from_secs(2), controller_events.recv())
        .await
        .unwrap();

    // Record is well within the 10s timeout; no eviction should follow.
    let stray = tokio::time::timeout(Duration::from_millis(300), controller_events.recv()).await;
    assert!(stray.is_err());
    assert_eq!(controller.session_for_peer(0x9999).await, Some(1));

    peer.stop().await;
    controller.stop().await;
}
