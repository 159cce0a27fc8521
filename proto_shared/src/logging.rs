//! Logging sink interface consumed by the core.
//!
//! The concrete sink a Peer/Controller CLI wires to stdout or a file is out of
//! scope; this module only defines the seam (`LogSink`) and the two adapters
//! the core itself needs: a no-op sink and one that forwards onto `tracing`,
//! so the rest of the crate can stay instrumented with `tracing` macros while
//! still emitting through a sink that a caller can intercept (e.g. for the
//! Debug-level hex dump).

use std::fmt::Write as _;

/// Severity filter for [`LogSink::log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Information,
    Warning,
    Error,
}

/// A write-only logging callback the core emits through.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    /// Convenience for the transport core's Debug-level raw-datagram trace.
    fn log_datagram(&self, level: LogLevel, label: &str, bytes: &[u8]) {
        if level == LogLevel::Debug {
            self.log(level, &format!("{label}\n{}", hex_dump(bytes)));
        } else {
            self.log(level, label);
        }
    }
}

/// Discards everything. Useful as a default when no sink is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

/// Forwards onto `tracing`, matching how the rest of the workspace logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Information => tracing::info!("{message}"),
            LogLevel::Warning => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
    }
}

/// Formats `bytes` as 16-byte rows of hex, with an extra space separating
/// columns 8 and 9 (the canonical `hexdump -C` gutter).
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (row_idx, row) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", row_idx * 16);
        for (i, b) in row.iter().enumerate() {
            if i == 8 {
                out.push(' ');
            }
            let _ = write!(out, "{b:02x} ");
        }
        out.push('\n');
    }
    out
}
