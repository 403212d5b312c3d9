//! `acq-core`
//!
//! Core of the acquisition library: a reusable stream-framing engine plus the
//! session plumbing around it.
//!
//! Serial bench instruments (multimeters, thermologgers, sound level meters,
//! scales) stream their measurements as small binary packets over a
//! byte-oriented transport. Every driver faces the same problems (packets
//! split across reads, noise between packets, corrupted frames) and this
//! crate solves them once:
//!
//! - [`framing::StreamFramer`]: bounded accumulation buffer with scanning,
//!   checksum-driven validation, single-byte resynchronization and
//!   compaction. Protocols plug in via [`framing::PacketValidator`] and
//!   [`framing::PacketHandler`].
//! - [`feed`]: the session data feed, decoded samples fanned out to any
//!   number of subscribers over a broadcast channel, bracketed by header and
//!   end-of-stream markers.
//! - [`transport`]: the non-blocking byte-reader boundary, with serial-port
//!   support behind the `serial` feature and a scripted mock for tests.
//! - [`session::AcquisitionSession`]: the poll-driven loop tying the three
//!   together, with sample/time limits and cooperative cancellation.
//!
//! Protocol drivers themselves live in the `acq-hardware` crate.
//!
//! ## Example
//!
//! ```rust,no_run
//! use acq_core::config::AcquisitionLimits;
//! use acq_core::feed::{feed_channel, SessionFeed};
//! use acq_core::framing::StreamFramer;
//! use acq_core::session::AcquisitionSession;
//! use acq_core::transport::MockByteSource;
//! # fn parts() -> (Box<dyn acq_core::framing::PacketValidator>, Box<dyn acq_core::framing::PacketHandler>) { unimplemented!() }
//! # async fn example() -> anyhow::Result<()> {
//! let (validator, handler) = parts(); // from a driver factory
//! let (tx, _rx) = feed_channel(256);
//! let framer = StreamFramer::new(validator, 256);
//! let (session, _handle) = AcquisitionSession::new(
//!     MockByteSource::new(),
//!     framer,
//!     handler,
//!     SessionFeed::new(tx),
//!     AcquisitionLimits { limit_samples: Some(100), limit_msec: None },
//! );
//! let _summary = session.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod feed;
pub mod framing;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use anyhow::{anyhow, Result};
pub use error::{AcqError, AcqResult, FramerError};
pub use feed::{FeedPacket, FeedReceiver, FeedSender, Sample, SessionFeed};
pub use framing::{FrameValidity, PacketDisposition, PacketHandler, PacketValidator, StreamFramer};
pub use session::{AcquisitionSession, SessionHandle, SessionState, SessionSummary, StopReason};
pub use transport::ByteSource;
