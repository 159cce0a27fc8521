//! Configuration structs shared by Peer and Controller.
//!
//! Loads from JSON strings/files (file IO, and parsing of user-typed JSON at a
//! CLI prompt, are left to the out-of-scope front-ends).

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

fn default_send_queue_capacity() -> usize {
    100
}

/// Options passed to [`crate::transport::Transport::start`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportOptions {
    /// UDP bind address.
    pub local: SocketAddr,
    /// Default remote endpoint; required for Peer, optional for Controller.
    #[serde(default)]
    pub remote: Option<SocketAddr>,
    /// Bounded outbound queue capacity; producers block when full.
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
}

impl TransportOptions {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

fn default_disconnected_interval_secs() -> f64 {
    3.0
}

fn default_connected_interval_secs() -> f64 {
    60.0
}

fn default_auto_negotiate() -> bool {
    true
}

/// Peer engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerOptions {
    /// Stable identifier chosen by the Peer at start time.
    pub peer_id: u16,
    /// Timer period while disconnected, in seconds. `0.0` disables the timer.
    #[serde(default = "default_disconnected_interval_secs")]
    pub disconnected_interval_secs: f64,
    /// Timer period while connected, in seconds. `0.0` disables the timer.
    #[serde(default = "default_connected_interval_secs")]
    pub connected_interval_secs: f64,
    /// Whether `start` fires the initial NegotiationRequest immediately.
    /// Not part of the wire/state-machine spec proper; exposed so a caller
    /// can stand up a Peer that stays `Disconnected` until it explicitly
    /// calls `send_negotiation`.
    #[serde(default = "default_auto_negotiate")]
    pub auto_negotiate: bool,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            peer_id: 0,
            disconnected_interval_secs: default_disconnected_interval_secs(),
            connected_interval_secs: default_connected_interval_secs(),
            auto_negotiate: default_auto_negotiate(),
        }
    }
}

impl PeerOptions {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

fn default_peer_timeout_secs() -> f64 {
    180.0
}

/// Controller engine tunables. The sweep period is fixed at 30s per spec and
/// is not configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerOptions {
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: f64,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            peer_timeout_secs: default_peer_timeout_secs(),
        }
    }
}

impl ControllerOptions {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

/// Fixed sweep period for the Controller's registry sweeper (§6: not tunable).
pub const SWEEP_PERIOD_SECS: f64 = 30.0;
