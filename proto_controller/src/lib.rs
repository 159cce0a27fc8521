//! `proto_controller`
//!
//! The Controller (server) role: owns the peer registry, allocates session
//! ids, answers negotiations, evicts stale peers, and exchanges
//! SampleUp/SampleDown messages over the shared UDP transport core.

pub mod controller;

pub use controller::ControllerEngine;
