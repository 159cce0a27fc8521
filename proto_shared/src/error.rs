//! Typed fault surface for the bit codec.
//!
//! Everything else in this crate that can fail for operational reasons (binding a
//! socket) uses `transport::TransportError`, its own thiserror-derived type; this
//! is the one place a caller mistake (not a runtime condition) needs a real error
//! type to propagate.

use thiserror::Error;

/// Errors raised by [`crate::bitio`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A bit-count argument, or the number of bits remaining in the buffer, was
    /// outside the allowed range.
    #[error("bit codec out of range: {detail}")]
    OutOfRange { detail: String },
}

impl CodecError {
    pub(crate) fn out_of_range(detail: impl Into<String>) -> Self {
        CodecError::OutOfRange {
            detail: detail.into(),
        }
    }
}
