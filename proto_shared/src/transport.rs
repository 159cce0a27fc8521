//! Transport core: binds a single UDP socket and runs two independently
//! scheduled loops (receive, send) around a bounded outbound queue.
//!
//! Grounded on the teacher's `UnreliableConn` (UDP bind/send/recv) generalized
//! to a single bidirectional socket plus the bounded MPSC backpressure queue
//! the spec requires. The Peer/Controller engines never touch the socket
//! directly: they call [`Transport::send`] and drain the receiver returned by
//! [`Transport::start`].

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::TransportOptions;
use crate::logging::{LogLevel, LogSink};
use crate::wire::{self, Message};

/// Lifecycle faults for [`Transport::start`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport already started")]
    AlreadyStarted,
    #[error("failed to bind UDP socket: {0}")]
    BindFailed(#[source] std::io::Error),
}

/// One datagram plus wherever it came from.
pub type InboundDatagram = (Vec<u8>, SocketAddr);

/// A queued outbound datagram. `destination = None` means "use the default
/// remote endpoint recorded at start".
struct OutboundPacket {
    bytes: Vec<u8>,
    destination: Option<SocketAddr>,
}

struct Running {
    socket: Arc<UdpSocket>,
    default_remote: Option<SocketAddr>,
    outbound_tx: mpsc::Sender<OutboundPacket>,
    cancel_tx: watch::Sender<bool>,
    recv_task: JoinHandle<()>,
    send_task: JoinHandle<()>,
}

/// Owns the socket and outbound queue; see module docs.
pub struct Transport {
    sink: Arc<dyn LogSink>,
    state: Mutex<Option<Running>>,
}

impl Transport {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            state: Mutex::new(None),
        }
    }

    /// Binds the socket and spawns the receive/send loops. Returns a receiver
    /// of decoded-ready raw datagrams; the caller (a Peer or Controller
    /// engine) owns dispatching them.
    pub async fn start(
        &self,
        options: TransportOptions,
    ) -> Result<mpsc::UnboundedReceiver<InboundDatagram>, TransportError> {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            return Err(TransportError::AlreadyStarted);
        }

        let socket = UdpSocket::bind(options.local)
            .await
            .map_err(TransportError::BindFailed)?;
        let socket = Arc::new(socket);

        let (outbound_tx, outbound_rx) =
            mpsc::channel(options.send_queue_capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let recv_task = tokio::spawn(receive_loop(
            socket.clone(),
            inbound_tx,
            self.sink.clone(),
            cancel_rx.clone(),
        ));
        let send_task = tokio::spawn(send_loop(
            socket.clone(),
            outbound_rx,
            options.remote,
            self.sink.clone(),
            cancel_rx,
        ));

        *guard = Some(Running {
            socket,
            default_remote: options.remote,
            outbound_tx,
            cancel_tx,
            recv_task,
            send_task,
        });
        Ok(inbound_rx)
    }

    /// Cancels both loops, closes the queue (unblocking any producer waiting
    /// on backpressure), joins the loops, and drops the socket. Returns
    /// `false` if the transport was not running.
    pub async fn stop(&self) -> bool {
        let running = {
            let mut guard = self.state.lock().await;
            guard.take()
        };
        match running {
            None => false,
            Some(running) => {
                let _ = running.cancel_tx.send(true);
                let _ = running.recv_task.await;
                let _ = running.send_task.await;
                true
            }
        }
    }

    /// Serializes `msg` and enqueues it for the send loop. Blocks while the
    /// outbound queue is full; returns `false` if the transport is not
    /// running, is cancelled while blocked, or if `msg` fails to encode.
    pub async fn send(&self, msg: &Message, destination_override: Option<SocketAddr>) -> bool {
        let tx = {
            let guard = self.state.lock().await;
            match guard.as_ref() {
                Some(running) => running.outbound_tx.clone(),
                None => return false,
            }
        };
        let bytes = match wire::encode_message(msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.sink
                    .log(LogLevel::Error, &format!("failed to encode outgoing message: {e}"));
                return false;
            }
        };
        tx.send(OutboundPacket {
            bytes,
            destination: destination_override,
        })
        .await
        .is_ok()
    }

    pub async fn default_remote(&self) -> Option<SocketAddr> {
        self.state.lock().await.as_ref().and_then(|r| r.default_remote)
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match self.state.lock().await.as_ref() {
            Some(running) => running.socket.local_addr().ok(),
            None => None,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    inbound_tx: mpsc::UnboundedSender<InboundDatagram>,
    sink: Arc<dyn LogSink>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; 2048];
    loop {
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((n, from)) => {
                        sink.log_datagram(LogLevel::Debug, "udp rx", &buf[..n]);
                        if inbound_tx.send((buf[..n].to_vec(), from)).is_err() {
                            // No dispatcher listening; nothing to do but keep
                            // the socket drained.
                        }
                    }
                    Err(e) => {
                        sink.log(LogLevel::Warning, &format!("transient recv error: {e}"));
                    }
                }
            }
        }
    }
    sink.log(LogLevel::Debug, "receive loop stopped");
}

async fn send_loop(
    socket: Arc<UdpSocket>,
    mut outbound_rx: mpsc::Receiver<OutboundPacket>,
    default_remote: Option<SocketAddr>,
    sink: Arc<dyn LogSink>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }
            packet = outbound_rx.recv() => {
                match packet {
                    None => break,
                    Some(packet) => {
                        let Some(dest) = packet.destination.or(default_remote) else {
                            sink.log(LogLevel::Warning, "dropping outbound packet with no destination");
                            continue;
                        };
                        match socket.send_to(&packet.bytes, dest).await {
                            Ok(_) => sink.log_datagram(LogLevel::Debug, "udp tx", &packet.bytes),
                            Err(e) => sink.log(LogLevel::Warning, &format!("transient send error: {e}")),
                        }
                    }
                }
            }
        }
    }
    sink.log(LogLevel::Debug, "send loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullSink;
    use crate::wire::Negotiation;

    fn loopback_options() -> TransportOptions {
        TransportOptions {
            local: "127.0.0.1:0".parse().unwrap(),
            remote: None,
            send_queue_capacity: 4,
        }
    }

    #[tokio::test]
    async fn start_twice_fails_with_already_started() {
        let t = Transport::new(Arc::new(NullSink));
        let _rx = t.start(loopback_options()).await.unwrap();
        assert!(matches!(
            t.start(loopback_options()).await,
            Err(TransportError::AlreadyStarted)
        ));
        t.stop().await;
    }

    #[tokio::test]
    async fn stop_twice_returns_false_second_time() {
        let t = Transport::new(Arc::new(NullSink));
        let _rx = t.start(loopback_options()).await.unwrap();
        assert!(t.stop().await);
        assert!(!t.stop().await);
    }

    #[tokio::test]
    async fn restart_after_stop_succeeds() {
        let t = Transport::new(Arc::new(NullSink));
        let _rx = t.start(loopback_options()).await.unwrap();
        assert!(t.stop().await);
        let _rx2 = t.start(loopback_options()).await.unwrap();
        assert!(t.stop().await);
    }

    #[tokio::test]
    async fn send_without_start_returns_false() {
        let t = Transport::new(Arc::new(NullSink));
        let msg = Message::NegotiationRequest(Negotiation {
            session_id: 0,
            peer_id: 1,
        });
        assert!(!t.send(&msg, None).await);
    }

    #[tokio::test]
    async fn loopback_datagram_is_delivered() {
        let peer = Transport::new(Arc::new(NullSink));
        let controller = Transport::new(Arc::new(NullSink));

        let mut controller_rx = controller
            .start(TransportOptions {
                local: "127.0.0.1:0".parse().unwrap(),
                remote: None,
                send_queue_capacity: 4,
            })
            .await
            .unwrap();
        let controller_addr = controller.local_addr().await.unwrap();

        let _peer_rx = peer
            .start(TransportOptions {
                local: "127.0.0.1:0".parse().unwrap(),
                remote: Some(controller_addr),
                send_queue_capacity: 4,
            })
            .await
            .unwrap();

        let msg = Message::NegotiationRequest(Negotiation {
            session_id: 0,
            peer_id: 0x1234,
        });
        assert!(peer.send(&msg, None).await);

        let (bytes, _from) = controller_rx.recv().await.unwrap();
        assert_eq!(wire::decode_message(&bytes).unwrap(), msg);

        peer.stop().await;
        controller.stop().await;
    }
}
