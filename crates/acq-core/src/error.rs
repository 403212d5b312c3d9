//! Error types for the acquisition core.
//!
//! Two layers of errors exist:
//!
//! - [`FramerError`]: conditions detected by the [`crate::framing::StreamFramer`]
//!   itself. Invalid packets are *not* errors; they are recovered locally by
//!   single-byte resynchronization and never surface here.
//! - [`AcqError`]: the session-level error type. It wraps framer conditions,
//!   transport I/O failures and configuration problems, and is what
//!   [`crate::session::AcquisitionSession::run`] returns on abort.

use thiserror::Error;

/// Errors reported by the stream framer.
#[derive(Error, Debug)]
pub enum FramerError {
    /// An `ingest` call would exceed the accumulation buffer capacity.
    ///
    /// The framer has not consumed any of the offending bytes. The caller
    /// decides recovery: the default session policy flushes the buffer and
    /// continues, and aborts only when overflow recurs on the immediately
    /// following poll tick.
    #[error(
        "accumulation buffer overflow: {pending} pending + {incoming} incoming exceeds capacity {capacity}"
    )]
    BufferOverflow {
        capacity: usize,
        pending: usize,
        incoming: usize,
    },

    /// The buffer filled completely without a single packet validating.
    ///
    /// This indicates persistent desynchronization (wrong baud rate, wrong
    /// protocol, dead device). The framer has already wiped the buffer;
    /// `discarded` is the number of bytes dropped.
    #[error("persistent desynchronization: buffer full, {discarded} bytes discarded")]
    Desynchronized { discarded: usize },

    /// The packet handler failed while decoding a validated packet.
    #[error("packet handler error: {0}")]
    Handler(#[source] anyhow::Error),
}

/// Primary error type for acquisition sessions.
#[derive(Error, Debug)]
pub enum AcqError {
    /// Transport I/O failed. Fatal: the session terminates immediately,
    /// after emitting the end-of-stream marker.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A framing condition the session policy could not recover from.
    #[error("framing error: {0}")]
    Framing(#[from] FramerError),

    /// Invalid connection string, serial parameters or limit values.
    #[error("configuration error: {0}")]
    Config(String),

    /// A driver factory rejected its configuration or failed to build.
    #[error("driver '{driver_type}' error: {message}")]
    Driver {
        driver_type: String,
        message: String,
    },
}

/// Convenience alias for results using the session error type.
pub type AcqResult<T> = std::result::Result<T, AcqError>;
