//! The acquisition session: a poll-driven loop around one device.
//!
//! Each poll tick reads whatever the transport has, feeds it through the
//! stream framer, and then checks the configured sample/time limits. The
//! session follows a small state machine:
//!
//! ```text
//! Idle -> Running -> Stopping -> Idle
//! ```
//!
//! `Running` ends when a limit is reached, the device signals end-of-stream,
//! the handle cancels the session, the transport fails, or framing fails
//! unrecoverably. In every case the feed's end-of-stream marker is emitted
//! exactly once before the session returns.
//!
//! Everything in one tick runs to completion synchronously with respect to
//! the session; suspension happens only between ticks. Cancellation is also
//! only observed between ticks, never mid-ingest.

use crate::config::AcquisitionLimits;
use crate::error::{AcqError, FramerError};
use crate::feed::SessionFeed;
use crate::framing::{PacketDisposition, PacketHandler, StreamFramer};
use crate::transport::ByteSource;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// Default poll tick interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Acquisition session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
}

/// Why a session stopped normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured sample count was reached.
    SampleLimit,
    /// The configured time limit elapsed.
    TimeLimit,
    /// The device signalled end-of-stream.
    DeviceEnd,
    /// The session was cancelled through its handle.
    Cancelled,
}

/// Summary of a completed session.
#[derive(Debug, Clone, Copy)]
pub struct SessionSummary {
    pub stop_reason: StopReason,
    pub samples: u64,
    pub packets: u64,
    pub elapsed: Duration,
}

/// Remote control for a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Request the session to stop. Observed at the next poll tick.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }
}

/// One device acquisition session.
pub struct AcquisitionSession<S: ByteSource> {
    transport: S,
    framer: StreamFramer,
    handler: Box<dyn PacketHandler>,
    feed: SessionFeed,
    limits: AcquisitionLimits,
    poll_interval: Duration,
    stop_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<SessionState>,
}

impl<S: ByteSource> AcquisitionSession<S> {
    pub fn new(
        transport: S,
        framer: StreamFramer,
        handler: Box<dyn PacketHandler>,
        feed: SessionFeed,
        limits: AcquisitionLimits,
    ) -> (Self, SessionHandle) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let session = Self {
            transport,
            framer,
            handler,
            feed,
            limits,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop_rx,
            state_tx,
        };
        let handle = SessionHandle { stop_tx, state_rx };
        (session, handle)
    }

    /// Override the poll tick interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Subscribe to this session's data feed.
    pub fn subscribe(&self) -> crate::feed::FeedReceiver {
        self.feed.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        let _ = self.state_tx.send(state);
    }

    /// Run the acquisition to completion.
    ///
    /// Emits the feed header, then polls until a stop condition occurs. The
    /// end-of-stream marker is sent exactly once on every exit path,
    /// including errors.
    #[instrument(skip(self), fields(poll_ms = self.poll_interval.as_millis() as u64))]
    pub async fn run(mut self) -> Result<SessionSummary, AcqError> {
        self.set_state(SessionState::Running);
        let started = Instant::now();
        self.feed.send_header();
        info!("acquisition started");

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut scratch = vec![0u8; self.framer.capacity()];
        let mut packets_total: u64 = 0;
        let mut overflowed_last_tick = false;

        let reason = loop {
            ticker.tick().await;

            if *self.stop_rx.borrow() {
                debug!("stop requested");
                break StopReason::Cancelled;
            }

            // Read as much as the accumulation buffer can hold.
            let free = self.framer.free();
            if free == 0 {
                // Buffer saturated with an unframeable prefix. Reset once
                // and keep going; abort if it happens again immediately.
                if overflowed_last_tick {
                    self.abort();
                    return Err(AcqError::Framing(FramerError::BufferOverflow {
                        capacity: self.framer.capacity(),
                        pending: self.framer.pending(),
                        incoming: 0,
                    }));
                }
                warn!("accumulation buffer full, resetting");
                self.framer.flush();
                overflowed_last_tick = true;
                continue;
            }

            let n = match self.transport.read_available(&mut scratch[..free]).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "transport read failed, aborting session");
                    self.abort();
                    return Err(AcqError::Io(e));
                }
            };

            if n > 0 {
                debug!(bytes = n, "ingesting");
                match self
                    .framer
                    .ingest(&scratch[..n], self.handler.as_mut(), &mut self.feed)
                {
                    Ok(report) => {
                        overflowed_last_tick = false;
                        packets_total += report.stats.packets as u64;
                        if report.disposition == PacketDisposition::Finish {
                            info!("device signalled end of stream");
                            break StopReason::DeviceEnd;
                        }
                    }
                    Err(e) => {
                        self.abort();
                        return Err(AcqError::Framing(e));
                    }
                }
            }

            // Limit checks, once per tick.
            if let Some(max) = self.limits.limit_samples {
                if self.feed.samples_sent() >= max {
                    info!(samples = self.feed.samples_sent(), "sample limit reached");
                    break StopReason::SampleLimit;
                }
            }
            if let Some(max) = self.limits.duration() {
                if started.elapsed() > max {
                    info!("time limit reached");
                    break StopReason::TimeLimit;
                }
            }
        };

        self.set_state(SessionState::Stopping);
        self.feed.finish();
        self.set_state(SessionState::Idle);
        info!(
            ?reason,
            samples = self.feed.samples_sent(),
            packets = packets_total,
            "acquisition stopped"
        );

        Ok(SessionSummary {
            stop_reason: reason,
            samples: self.feed.samples_sent(),
            packets: packets_total,
            elapsed: started.elapsed(),
        })
    }

    fn abort(&mut self) {
        self.set_state(SessionState::Stopping);
        self.feed.finish();
        self.set_state(SessionState::Idle);
    }
}
