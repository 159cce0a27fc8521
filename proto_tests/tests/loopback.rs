//! Raw transport-level loopback tests and the Peer's miss-counter/timeout
//! path (§4.5, §8 boundary behaviors), independent of the Controller engine.

use std::sync::Arc;
use std::time::Duration;

use proto_peer::PeerEngine;
use proto_shared::config::{PeerOptions, TransportOptions};
use proto_shared::event::{NegotiationState, PeerEvent};
use proto_shared::logging::NullSink;
use proto_shared::wire::{self, Message, Negotiation};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn initial_state_has_no_session_when_auto_negotiate_disabled() {
    let peer = PeerEngine::new(
        Arc::new(NullSink),
        TransportOptions {
            local: "127.0.0.1:0".parse().unwrap(),
            remote: Some("127.0.0.1:1".parse().unwrap()),
            send_queue_capacity: 16,
        },
        PeerOptions {
            peer_id: 0x1234,
            disconnected_interval_secs: 0.0,
            connected_interval_secs: 0.0,
            auto_negotiate: false,
        },
    );
    peer.start().await.unwrap();

    assert_eq!(peer.peer_id(), 0x1234);
    assert_eq!(peer.session_id().await, 0);
    assert!(!peer.is_connected().await);

    peer.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn three_missed_ticks_disconnect_a_connected_peer() {
    // A loopback "controller" that accepts the socket without ever replying.
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let silent_addr = silent.local_addr().unwrap();

    let peer = PeerEngine::new(
        Arc::new(NullSink),
        TransportOptions {
            local: "127.0.0.1:0".parse().unwrap(),
            remote: Some(silent_addr),
            send_queue_capacity: 16,
        },
        PeerOptions {
            peer_id: 0x0042,
            disconnected_interval_secs: 0.0,
            connected_interval_secs: 0.0,
            auto_negotiate: false,
        },
    );
    peer.start().await.unwrap();
    let mut events = peer.subscribe();

    // Drive the peer into Connected "by hand": the spec's state machine only
    // transitions on a real NegotiationResponse, so synthesize one straight
    // at the peer's bound socket.
    let mut buf = [0u8; 64];
    peer.send_negotiation().await;
    let (n, from) = silent.recv_from(&mut buf).await.unwrap();
    assert!(n > 0);

    let response = wire::encode_message(&Message::NegotiationResponse(Negotiation {
        session_id: 7,
        peer_id: 0x0042,
    }))
    .unwrap();
    silent.send_to(&response, from).await.unwrap();

    let connected = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        connected,
        PeerEvent::NegotiationStateChanged {
            state: NegotiationState::Connected,
            session_id: 7,
            ..
        }
    ));
    assert!(peer.is_connected().await);

    // Three manual ticks with no further response: Timeout, Timeout, then
    // Disconnected on the third miss (§4.5 miss-counter rule).
    peer.send_negotiation().await;
    let tick1 = events.recv().await.unwrap();
    assert!(matches!(
        tick1,
        PeerEvent::NegotiationStateChanged {
            state: NegotiationState::Timeout,
            miss_count: Some(1),
            ..
        }
    ));

    peer.send_negotiation().await;
    let tick2 = events.recv().await.unwrap();
    assert!(matches!(
        tick2,
        PeerEvent::NegotiationStateChanged {
            state: NegotiationState::Timeout,
            miss_count: Some(2),
            ..
        }
    ));

    peer.send_negotiation().await;
    let tick3 = events.recv().await.unwrap();
    assert!(matches!(
        tick3,
        PeerEvent::NegotiationStateChanged {
            state: NegotiationState::Disconnected,
            session_id: 7,
            ..
        }
    ));
    assert!(!peer.is_connected().await);
    assert_eq!(peer.session_id().await, 0);

    peer.stop().await;
}

#[tokio::test]
async fn restart_after_stop_yields_initial_state() {
    let options = TransportOptions {
        local: "127.0.0.1:0".parse().unwrap(),
        remote: Some("127.0.0.1:1".parse().unwrap()),
        send_queue_capacity: 16,
    };
    let peer = PeerEngine::new(
        Arc::new(NullSink),
        options,
        PeerOptions {
            peer_id: 9,
            disconnected_interval_secs: 0.0,
            connected_interval_secs: 0.0,
            auto_negotiate: false,
        },
    );
    peer.start().await.unwrap();
    assert!(peer.stop().await);

    // A fresh start after stop must succeed and keep the pre-negotiation
    // state (§8 property 5).
    peer.start().await.unwrap();
    assert_eq!(peer.session_id().await, 0);
    assert!(!peer.is_connected().await);
    assert!(peer.stop().await);
    assert!(!peer.stop().await);
}
