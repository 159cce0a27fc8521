//! Peer-side negotiation state machine (§4.5).
//!
//! Grounded on the teacher's `GameClient`: a long-lived handle that owns a
//! connection, exposes `tick`-style async methods, and is driven both by a
//! background loop and by direct caller calls. Unlike `GameClient`, the
//! negotiation state here is touched concurrently by the timer task and the
//! datagram-dispatch task, so it lives behind a single `tokio::sync::Mutex`
//! (§5, "Shared-resource policy") instead of `&mut self`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use proto_shared::config::{PeerOptions, TransportOptions};
use proto_shared::event::{EventBus, NegotiationState, PeerEvent};
use proto_shared::logging::{LogLevel, LogSink};
use proto_shared::transport::{Transport, TransportError};
use proto_shared::wire::{self, Message, Negotiation, SampleUpMessage};

/// Negotiation state guarded by [`PeerEngine::state`]. `session_id == 0` is
/// `Disconnected`; anything else is `Connected`.
struct PeerState {
    session_id: u16,
    miss_count: u8,
    waiting_for_response: bool,
}

struct RunningTasks {
    cancel_tx: watch::Sender<bool>,
    dispatch_task: JoinHandle<()>,
    timer_task: JoinHandle<()>,
}

/// Client-side engine: negotiates a session, tracks liveness, and carries
/// SampleUp/SampleDown traffic once connected.
pub struct PeerEngine {
    peer_id: u16,
    auto_negotiate: bool,
    disconnected_interval: Duration,
    connected_interval: Duration,
    transport: Arc<Transport>,
    transport_options: TransportOptions,
    sink: Arc<dyn LogSink>,
    events: EventBus<PeerEvent>,
    state: Mutex<PeerState>,
    interval_tx: watch::Sender<Duration>,
    running: Mutex<Option<RunningTasks>>,
}

impl PeerEngine {
    pub fn new(
        sink: Arc<dyn LogSink>,
        transport_options: TransportOptions,
        options: PeerOptions,
    ) -> Arc<Self> {
        let disconnected_interval = Duration::from_secs_f64(options.disconnected_interval_secs.max(0.0));
        let connected_interval = Duration::from_secs_f64(options.connected_interval_secs.max(0.0));
        let (interval_tx, _) = watch::channel(disconnected_interval);
        Arc::new(Self {
            peer_id: options.peer_id,
            auto_negotiate: options.auto_negotiate,
            disconnected_interval,
            connected_interval,
            transport: Arc::new(Transport::new(sink.clone())),
            transport_options,
            sink,
            events: EventBus::new_default(),
            state: Mutex::new(PeerState {
                session_id: 0,
                miss_count: 0,
                waiting_for_response: false,
            }),
            interval_tx,
            running: Mutex::new(None),
        })
    }

    pub fn peer_id(&self) -> u16 {
        self.peer_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    pub async fn session_id(&self) -> u16 {
        self.state.lock().await.session_id
    }

    pub async fn is_connected(&self) -> bool {
        self.session_id().await != 0
    }

    /// Binds the transport, spawns the dispatch and timer loops, and (unless
    /// `auto_negotiate` is false) sends the initial NegotiationRequest.
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
                            Some((bytes, _from)) => dispatch_engine.on_datagram(&bytes).await,
                        }
                    }
                }
            }
        });

        let timer_engine = self.clone();
        let timer_cancel = cancel_rx.clone();
        let interval_rx = self.interval_tx.subscribe();
        let timer_task = tokio::spawn(timer_loop(timer_engine, interval_rx, timer_cancel));

        *self.running.lock().await = Some(RunningTasks {
            cancel_tx,
            dispatch_task,
            timer_task,
        });

        if self.auto_negotiate {
            self.send_initial_negotiation().await;
        }
        Ok(())
    }

    /// Cancels the timer and dispatch loops and stops the transport. Returns
    /// `false` if the engine was not running.
    pub async fn stop(&self) -> bool {
        let running = self.running.lock().await.take();
        match running {
            None => false,
            Some(running) => {
                let _ = running.cancel_tx.send(true);
                let _ = running.dispatch_task.await;
                let _ = running.timer_task.await;
                self.transport.stop().await;
                // A fresh `start` after `stop` must yield the initial,
                // pre-negotiation state (§8 property 5).
                {
                    let mut state = self.state.lock().await;
                    state.session_id = 0;
                    state.miss_count = 0;
                    state.waiting_for_response = false;
                }
                let _ = self.interval_tx.send(self.disconnected_interval);
                true
            }
        }
    }

    /// Manual negotiation trigger; observably identical to a timer tick (§4.5).
    pub async fn send_negotiation(&self) {
        self.on_timer_tick().await;
    }

    /// Stamps `msg`'s `session_id`/`peer_id` from current engine state and
    /// enqueues it. This is the only place those fields are populated (§4.5).
    pub async fn send_sample_up(
        &self,
        mut msg: SampleUpMessage,
        destination_override: Option<std::net::SocketAddr>,
    ) -> bool {
        msg.session_id = self.session_id().await;
        msg.peer_id = self.peer_id;
        self.transport
            .send(&Message::SampleUp(msg), destination_override)
            .await
    }

    async fn send_initial_negotiation(&self) {
        let req = {
            let mut state = self.state.lock().await;
            state.waiting_for_response = true;
            Negotiation {
                session_id: state.session_id,
                peer_id: self.peer_id,
            }
        };
        self.transport
            .send(&Message::NegotiationRequest(req), None)
            .await;
    }

    /// Shared body of a timer tick and a manual `send_negotiation` call (§4.5).
    async fn on_timer_tick(&self) {
        let mut pending_event = None;
        let mut rearm = None;
        let req;
        {
            let mut state = self.state.lock().await;
            if state.waiting_for_response && state.session_id != 0 {
                state.miss_count += 1;
                if state.miss_count >= 3 {
                    let prior_session = state.session_id;
                    pending_event = Some(PeerEvent::NegotiationStateChanged {
                        state: NegotiationState::Disconnected,
                        peer_id: self.peer_id,
                        session_id: prior_session,
                        miss_count: None,
                    });
                    state.session_id = 0;
                    state.miss_count = 0;
                    rearm = Some(self.disconnected_interval);
                } else {
                    pending_event = Some(PeerEvent::NegotiationStateChanged {
                        state: NegotiationState::Timeout,
                        peer_id: self.peer_id,
                        session_id: state.session_id,
                        miss_count: Some(state.miss_count),
                    });
                }
            }
            state.waiting_for_response = true;
            req = Negotiation {
                session_id: state.session_id,
                peer_id: self.peer_id,
            };
        }

        if let Some(interval) = rearm {
            let _ = self.interval_tx.send(interval);
        }
        if let Some(event) = pending_event {
            self.events.emit(event);
        }
        self.transport
            .send(&Message::NegotiationRequest(req), None)
            .await;
    }

    async fn on_negotiation_response(&self, response: Negotiation) {
        if response.peer_id != self.peer_id {
            return;
        }
        let became_connected = {
            let mut state = self.state.lock().await;
            let was_disconnected = state.session_id == 0;
            state.session_id = response.session_id;
            state.miss_count = 0;
            state.waiting_for_response = false;
            was_disconnected && response.session_id != 0
        };
        let _ = self.interval_tx.send(self.connected_interval);
        if became_connected {
            self.events.emit(PeerEvent::NegotiationStateChanged {
                state: NegotiationState::Connected,
                peer_id: self.peer_id,
                session_id: response.session_id,
                miss_count: None,
            });
        }
    }

    async fn on_datagram(&self, bytes: &[u8]) {
        match wire::decode_message(bytes) {
            Ok(Message::NegotiationResponse(response)) => {
                self.on_negotiation_response(response).await;
            }
            Ok(Message::SampleDown(message)) => {
                self.events.emit(PeerEvent::SampleDownReceived(message));
            }
            Ok(other) => {
                self.sink.log(
                    LogLevel::Debug,
                    &format!("peer dropped unexpected message kind: {other:?}"),
                );
            }
            Err(e) => {
                self.sink
                    .log(LogLevel::Debug, &format!("peer dropped malformed datagram: {e}"));
            }
        }
    }
}

/// Cooperative, cancellable replacement for an OS periodic timer (§9): sleeps
/// on the current interval, restarting its sleep whenever `interval_rx`
/// changes (e.g. a Connected/Disconnected transition swaps the period).
async fn timer_loop(
    engine: Arc<PeerEngine>,
    mut interval_rx: watch::Receiver<Duration>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    loop {
        let interval = *interval_rx.borrow();
        let sleep = async {
            if interval.is_zero() {
                std::future::pending::<()>().await;
            } else {
                tokio::time::sleep(interval).await;
            }
        };
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }
            changed = interval_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                // Interval reconfigured; restart the loop with the new value.
            }
            _ = sleep => {
                engine.on_timer_tick().await;
            }
        }
    }
}
