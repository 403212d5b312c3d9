//! Stream framing: turning an arbitrarily-chunked byte stream into validated
//! protocol packets.
//!
//! Serial instruments deliver their wire protocol in whatever chunks the
//! transport happens to produce; packets straddle read boundaries, and noise
//! or dropped bytes can land anywhere. [`StreamFramer`] owns a bounded
//! accumulation buffer and runs the same recovery discipline for every
//! protocol:
//!
//! 1. append the newly read bytes,
//! 2. scan for packet boundaries, asking the protocol's [`PacketValidator`]
//!    about each candidate window,
//! 3. hand every validated packet to the [`PacketHandler`] synchronously,
//! 4. on an invalid window, advance a single byte and retry (resync), so a
//!    valid packet hidden inside noise is never stepped over,
//! 5. compact, keeping only the unconsumed tail.
//!
//! A window the validator cannot yet judge (trailing bytes still in flight)
//! stops the scan; the bytes wait in the buffer for the next ingest. Only two
//! conditions escalate to the caller: an ingest that would overflow the
//! buffer, and a buffer that fills completely without validating a single
//! packet, i.e. persistent desynchronization that will not self-correct.

use crate::error::FramerError;
use crate::feed::SessionFeed;
use tracing::{trace, warn};

/// Verdict of a [`PacketValidator`] on one candidate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameValidity {
    /// The window starts with a complete, well-formed packet of `length` bytes.
    Valid { length: usize },
    /// The window may start a packet, but more bytes are needed to decide
    /// (e.g. the in-band length field promises more than is available).
    Incomplete,
    /// The window does not start a packet (bad marker bytes, failed checksum).
    Invalid,
}

/// Per-protocol packet recognizer.
///
/// Implementations must be pure: deterministic, side-effect-free, and never
/// reading past the window they are given. The framer never presents a window
/// shorter than [`PacketValidator::min_packet_len`].
pub trait PacketValidator: Send {
    /// Smallest window worth inspecting; typically the fixed header length
    /// needed before any length field can be read. Must be at least 1.
    fn min_packet_len(&self) -> usize;

    /// Judge the window starting at its first byte.
    fn inspect(&self, window: &[u8]) -> FrameValidity;
}

/// What the handler wants the session to do after a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDisposition {
    /// Keep acquiring.
    Continue,
    /// The device signalled end-of-stream (e.g. memory-log download done);
    /// the session should stop after this ingest pass.
    Finish,
}

/// Per-protocol packet decoder.
///
/// Receives each validated packet exactly once, in stream order, and pushes
/// decoded samples into the session feed. Handlers may keep private state
/// (multi-packet record accumulation) but must not retain the packet slice
/// past the call.
pub trait PacketHandler: Send {
    fn handle(&mut self, packet: &[u8], feed: &mut SessionFeed)
        -> anyhow::Result<PacketDisposition>;
}

/// Byte accounting for one ingest pass.
///
/// `bytes_in` minus `packet_bytes` minus `bytes_skipped` is exactly the
/// change in [`StreamFramer::pending`] across the call: every ingested byte
/// is consumed into a packet, discarded by resync, or still buffered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Bytes appended by this call.
    pub bytes_in: usize,
    /// Packets validated and handled.
    pub packets: usize,
    /// Bytes consumed into validated packets.
    pub packet_bytes: usize,
    /// Bytes discarded by single-byte resynchronization.
    pub bytes_skipped: usize,
}

/// Result of one ingest pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub stats: IngestStats,
    pub disposition: PacketDisposition,
}

/// The stream framer: accumulation buffer plus scan/resync/compact logic.
///
/// One instance exists per device session, touched only from that session's
/// poll loop. The buffer is bounded at construction; `ingest` never grows it.
pub struct StreamFramer {
    validator: Box<dyn PacketValidator>,
    buf: Vec<u8>,
    capacity: usize,
}

impl StreamFramer {
    /// Create a framer with the given buffer capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is smaller than the validator's minimum packet
    /// length, or the minimum packet length is 0; both are programming errors
    /// in the protocol plugin.
    pub fn new(validator: Box<dyn PacketValidator>, capacity: usize) -> Self {
        let min = validator.min_packet_len();
        assert!(min >= 1, "validator minimum packet length must be >= 1");
        assert!(
            capacity >= min,
            "framer capacity {capacity} smaller than minimum packet length {min}"
        );
        Self {
            validator,
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered but not yet consumed.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Free space available for the next ingest.
    pub fn free(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Drop all buffered bytes.
    pub fn flush(&mut self) {
        self.buf.clear();
    }

    /// Append freshly read bytes and run one scan pass.
    ///
    /// Emits zero or more validated packets to `handler`, then compacts so
    /// the buffer holds only the unconsumed tail, left-aligned. A zero-length
    /// `new_bytes` is a no-op scan over whatever is already buffered.
    ///
    /// # Errors
    ///
    /// - [`FramerError::BufferOverflow`] if the bytes do not fit; nothing is
    ///   consumed and the buffer is unchanged.
    /// - [`FramerError::Desynchronized`] if the buffer ends the pass full
    ///   with no packet validated; the buffer has been wiped.
    /// - [`FramerError::Handler`] if the handler fails; the failing packet
    ///   counts as consumed and the buffer stays consistent.
    pub fn ingest(
        &mut self,
        new_bytes: &[u8],
        handler: &mut dyn PacketHandler,
        feed: &mut SessionFeed,
    ) -> Result<IngestReport, FramerError> {
        if new_bytes.len() > self.free() {
            return Err(FramerError::BufferOverflow {
                capacity: self.capacity,
                pending: self.buf.len(),
                incoming: new_bytes.len(),
            });
        }
        self.buf.extend_from_slice(new_bytes);

        let min = self.validator.min_packet_len();
        let mut stats = IngestStats {
            bytes_in: new_bytes.len(),
            ..IngestStats::default()
        };
        let mut disposition = PacketDisposition::Continue;
        let mut offset = 0;

        while self.buf.len() - offset >= min {
            let window = &self.buf[offset..];
            match self.validator.inspect(window) {
                FrameValidity::Incomplete => break,
                FrameValidity::Valid { length } if length < min || length > window.len() => {
                    // Validator contract breach; degrade to resync rather
                    // than trust the length.
                    warn!(
                        length,
                        available = window.len(),
                        "validator returned out-of-range packet length"
                    );
                    offset += 1;
                    stats.bytes_skipped += 1;
                }
                FrameValidity::Valid { length } => {
                    let result = handler.handle(&self.buf[offset..offset + length], feed);
                    // The packet was delivered; it is consumed even if the
                    // handler failed, so no byte is ever emitted twice.
                    offset += length;
                    stats.packets += 1;
                    stats.packet_bytes += length;
                    match result {
                        Ok(PacketDisposition::Finish) => disposition = PacketDisposition::Finish,
                        Ok(PacketDisposition::Continue) => {}
                        Err(e) => {
                            self.buf.drain(..offset);
                            return Err(FramerError::Handler(e));
                        }
                    }
                }
                FrameValidity::Invalid => {
                    offset += 1;
                    stats.bytes_skipped += 1;
                }
            }
        }

        self.buf.drain(..offset);

        if stats.bytes_skipped > 0 {
            trace!(skipped = stats.bytes_skipped, "resynchronized past noise");
        }

        // Buffer completely full with nothing validated this pass: the
        // contents cannot frame and will never frame. Wipe and report.
        if self.buf.len() == self.capacity && stats.packets == 0 {
            let discarded = self.buf.len();
            self.buf.clear();
            warn!(discarded, "buffer full with no valid packet, wiping");
            return Err(FramerError::Desynchronized { discarded });
        }

        Ok(IngestReport { stats, disposition })
    }
}

impl std::fmt::Debug for StreamFramer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamFramer")
            .field("capacity", &self.capacity)
            .field("pending", &self.buf.len())
            .finish()
    }
}
