//! `proto_peer`
//!
//! The Peer (client) role: negotiates a session with a Controller, tracks
//! liveness via a miss-counter timer, and exchanges SampleUp/SampleDown
//! messages over the shared UDP transport core.

pub mod peer;

pub use peer::PeerEngine;
