//! `proto_shared`
//!
//! Shared libraries used by both the Peer and the Controller.
//!
//! Design goals:
//! - Bit-exact, versionable wire format, kept separate from the transport.
//! - Clear separation of concerns (codec, wire, transport, config, events).
//! - No `unsafe`.

pub mod bitio;
pub mod config;
pub mod error;
pub mod event;
pub mod fixed;
pub mod logging;
pub mod transport;
pub mod wire;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::event::*;
    pub use crate::logging::*;
    pub use crate::transport::*;
    pub use crate::wire::*;
}
