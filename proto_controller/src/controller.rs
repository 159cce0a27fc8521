//! Controller-side peer registry and negotiation responder (§4.6).
//!
//! Grounded on the teacher's `GameServer`: an owned `HashMap<ClientId, _>`, a
//! periodic tick loop, and a dedicated background task per concern. The
//! registry here is two maps (`sessionId -> PeerRecord`, `peerId ->
//! sessionId`) behind one mutex rather than a concurrent map, per
//! `DESIGN.md`'s Open Question resolution: a single critical section makes
//! the allocate-then-insert sequence trivially atomic without pulling in
//! `dashmap`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use proto_shared::config::{ControllerOptions, TransportOptions, SWEEP_PERIOD_SECS};
use proto_shared::event::{ControllerEvent, EventBus, PeerConnectionState};
use proto_shared::logging::{LogLevel, LogSink};
use proto_shared::transport::{Transport, TransportError};
use proto_shared::wire::{self, Message, Negotiation, SampleDownMessage};

/// Controller-owned record of a negotiated peer (§3).
#[derive(Debug, Clone)]
struct PeerRecord {
    peer_id: u16,
    remote_endpoint: SocketAddr,
    last_negotiation: Instant,
}

#[derive(Default)]
struct Registry {
    by_session: HashMap<u16, PeerRecord>,
    by_peer: HashMap<u16, u16>,
    next_session_id: u16,
}

impl Registry {
    fn new() -> Self {
        Self {
            next_session_id: 1,
            ..Default::default()
        }
    }

    /// Monotonic counter modulo 2^16, skipping 0 (§3).
    fn allocate_session_id(&mut self) -> u16 {
        let id = self.next_session_id;
        self.next_session_id = self.next_session_id.wrapping_add(1);
        if self.next_session_id == 0 {
            self.next_session_id = 1;
        }
        id
    }
}

struct RunningTasks {
    cancel_tx: watch::Sender<bool>,
    dispatch_task: JoinHandle<()>,
    sweeper_task: JoinHandle<()>,
}

/// Server-side engine: allocates session ids, answers negotiations, and
/// evicts stale peers.
pub struct ControllerEngine {
    transport: Arc<Transport>,
    transport_options: TransportOptions,
    sink: Arc<dyn LogSink>,
    events: EventBus<ControllerEvent>,
    registry: Mutex<Registry>,
    peer_timeout: Duration,
    sweep_period: Duration,
    running: Mutex<Option<RunningTasks>>,
}

impl ControllerEngine {
    pub fn new(
        sink: Arc<dyn LogSink>,
        transport_options: TransportOptions,
        options: ControllerOptions,
    ) -> Arc<Self> {
        Self::with_sweep_period(
            sink,
            transport_options,
            options,
            Duration::from_secs_f64(SWEEP_PERIOD_SECS),
        )
    }

    /// Same as [`Self::new`] but with an overridable sweep period. The wire
    /// spec fixes the sweep period at 30s (§6) and is not meant to be
    /// end-user tunable; this constructor exists so eviction (§8 scenario 7)
    /// can be exercised in tests without waiting out a real 30s period.
    pub fn with_sweep_period(
        sink: Arc<dyn LogSink>,
        transport_options: TransportOptions,
        options: ControllerOptions,
        sweep_period: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport: Arc::new(Transport::new(sink.clone())),
            transport_options,
            sink,
            events: EventBus::new_default(),
            registry: Mutex::new(Registry::new()),
            peer_timeout: Duration::from_secs_f64(options.peer_timeout_secs.max(0.0)),
            sweep_period,
            running: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Number of peers currently tracked (test/observability helper).
    pub async fn peer_count(&self) -> usize {
        self.registry.lock().await.by_session.len()
    }

    /// The session id assigned to `peer_id`, if it has an active record.
    pub async fn session_for_peer(&self, peer_id: u16) -> Option<u16> {
        self.registry.lock().await.by_peer.get(&peer_id).copied()
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), TransportError> {
        let mut inbound_rx = self.transport.start(self.transport_options.clone()).await?;
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let dispatch_engine = self.clone();
        let mut dispatch_cancel = cancel_rx.clone();
        let dispatch_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = dispatch_cancel.changed() => {
                        if changed.is_err() || *dispatch_cancel.borrow() {
                            break;
                        }
                    }
                    datagram = inbound_rx.recv() => {
                        match datagram {
                            None => break,
                            Some((bytes, from)) => dispatch_engine.on_datagram(&bytes, from).await,
                        }
                    }
                }
            }
        });

        let sweeper_engine = self.clone();
        let mut sweeper_cancel = cancel_rx.clone();
        let sweep_period = self.sweep_period;
        let sweeper_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = sweeper_cancel.changed() => {
                        if changed.is_err() || *sweeper_cancel.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(sweep_period) => {
                        sweeper_engine.sweep().await;
                    }
                }
            }
        });

        *self.running.lock().await = Some(RunningTasks {
            cancel_tx,
            dispatch_task,
            sweeper_task,
        });
        Ok(())
    }

    pub async fn stop(&self) -> bool {
        let running = self.running.lock().await.take();
        match running {
            None => false,
            Some(running) => {
                let _ = running.cancel_tx.send(true);
                let _ = running.dispatch_task.await;
                let _ = running.sweeper_task.await;
                self.transport.stop().await;
                true
            }
        }
    }

    /// Looks up `msg.session_id` in the registry; sends to that peer's last
    /// known endpoint if found, otherwise falls back to the transport's
    /// default remote endpoint (§4.6).
    pub async fn send_sample_down(&self, msg: SampleDownMessage) -> bool {
        let dest = {
            let registry = self.registry.lock().await;
            registry
                .by_session
                .get(&msg.session_id)
                .map(|r| r.remote_endpoint)
        };
        self.transport.send(&Message::SampleDown(msg), dest).await
    }

    async fn on_negotiation_request(&self, request: Negotiation, from: SocketAddr) {
        let (session_id, connected_event) = {
            let mut registry = self.registry.lock().await;
            if let Some(&session_id) = registry.by_peer.get(&request.peer_id) {
                if let Some(record) = registry.by_session.get_mut(&session_id) {
                    record.last_negotiation = Instant::now();
                    record.remote_endpoint = from;
                }
                (session_id, None)
            } else {
                let session_id = registry.allocate_session_id();
                registry.by_peer.insert(request.peer_id, session_id);
                registry.by_session.insert(
                    session_id,
                    PeerRecord {
                        peer_id: request.peer_id,
                        remote_endpoint: from,
                        last_negotiation: Instant::now(),
                    },
                );
                (session_id, Some(ControllerEvent::PeerStateChanged {
                    state: PeerConnectionState::Connected,
                    peer_id: request.peer_id,
                    session_id,
                    remote_endpoint: from,
                }))
            }
        };

        if let Some(event) = connected_event {
            self.events.emit(event);
        }

        let response = Negotiation {
            session_id,
            peer_id: request.peer_id,
        };
        self.transport
            .send(&Message::NegotiationResponse(response), Some(from))
            .await;
    }

    async fn sweep(&self) {
        let now = Instant::now();
        let evicted: Vec<(u16, u16, SocketAddr)> = {
            let mut registry = self.registry.lock().await;
            let stale: Vec<u16> = registry
                .by_session
                .iter()
                .filter(|(_, record)| now.duration_since(record.last_negotiation) > self.peer_timeout)
                .map(|(&session_id, _)| session_id)
                .collect();
            stale
                .into_iter()
                .filter_map(|session_id| {
                    let record = registry.by_session.remove(&session_id)?;
                    registry.by_peer.remove(&record.peer_id);
                    Some((record.peer_id, session_id, record.remote_endpoint))
                })
                .collect()
        };
        for (peer_id, session_id, remote_endpoint) in evicted {
            self.events.emit(ControllerEvent::PeerStateChanged {
                state: PeerConnectionState::Disconnected,
                peer_id,
                session_id,
                remote_endpoint,
            });
        }
    }

    async fn on_datagram(&self, bytes: &[u8], from: SocketAddr) {
        match wire::decode_message(bytes) {
            Ok(Message::NegotiationRequest(request)) => {
                self.on_negotiation_request(request, from).await;
            }
            Ok(Message::SampleUp(message)) => {
                self.events.emit(ControllerEvent::SampleUpReceived {
                    message,
                    remote_endpoint: from,
                });
            }
            Ok(other) => {
                self.sink.log(
                    LogLevel::Debug,
                    &format!("controller dropped unexpected message kind: {other:?}"),
                );
            }
            Err(e) => {
                self.sink.log(
                    LogLevel::Debug,
                    &format!("controller dropped malformed datagram from {from}: {e}"),
                );
            }
        }
    }
}
