//! Event/observer plumbing.
//!
//! The teacher's `EventBus` is a polled any-map of queues owned by a single
//! thread. Our engines run their state machines on spawned tasks and need to
//! push events out to live subscribers, so this is a thin generic wrapper
//! over `tokio::sync::broadcast` instead: multiple subscribers, no draining
//! required, and a lagging subscriber only misses events rather than blocking
//! the engine that emits them.

use std::net::SocketAddr;

use tokio::sync::broadcast;

use crate::wire::{SampleDownMessage, SampleUpMessage};

/// Default channel capacity for [`EventBus::new_default`].
pub const DEFAULT_CAPACITY: usize = 128;

/// A typed, multi-subscriber event channel.
pub struct EventBus<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn new_default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Registers a new subscriber; it only observes events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Emits an event to all current subscribers. A channel with no
    /// subscribers silently drops the event, same as nobody being subscribed
    /// to a callback.
    pub fn emit(&self, event: T) {
        let _ = self.tx.send(event);
    }
}

/// Peer-side liveness state as observed by a subscriber (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Connected,
    Timeout,
    Disconnected,
}

/// Events raised by [`crate::peer`]... consumed via [`EventBus::subscribe`].
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    NegotiationStateChanged {
        state: NegotiationState,
        peer_id: u16,
        session_id: u16,
        miss_count: Option<u8>,
    },
    SampleDownReceived(SampleDownMessage),
}

/// Controller-side connection state as observed by a subscriber (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    Connected,
    Disconnected,
}

/// Events raised by the Controller engine, consumed via [`EventBus::subscribe`].
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    PeerStateChanged {
        state: PeerConnectionState,
        peer_id: u16,
        session_id: u16,
        remote_endpoint: SocketAddr,
    },
    SampleUpReceived {
        message: SampleUpMessage,
        remote_endpoint: SocketAddr,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus: EventBus<PeerEvent> = EventBus::new_default();
        let mut rx = bus.subscribe();
        bus.emit(PeerEvent::NegotiationStateChanged {
            state: NegotiationState::Connected,
            peer_id: 1,
            session_id: 1,
            miss_count: None,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            PeerEvent::NegotiationStateChanged {
                state: NegotiationState::Connected,
                peer_id: 1,
                session_id: 1,
                miss_count: None,
            }
        );
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus: EventBus<ControllerEvent> = EventBus::new_default();
        bus.emit(ControllerEvent::SampleUpReceived {
            message: SampleUpMessage {
                session_id: 1,
                peer_id: 1,
                command: crate::wire::CommandType::None,
                signed_value: 0,
                sequence: 0,
                value: 0.0,
            },
            remote_endpoint: "127.0.0.1:9000".parse().unwrap(),
        });
    }
}
