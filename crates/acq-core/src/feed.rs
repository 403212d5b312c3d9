//! The session data feed.
//!
//! Decoded measurements fan out to consumers over a broadcast channel of
//! `Arc`-wrapped [`FeedPacket`]s, so any number of subscribers (storage,
//! display, tests) observe the same stream without copying sample data.
//!
//! A session's feed always has the shape
//!
//! ```text
//! Header, Sample*, End
//! ```
//!
//! with the [`FeedPacket::End`] marker sent exactly once, no matter how the
//! session terminates. [`SessionFeed`] enforces that invariant and tracks the
//! number of samples sent, which the acquisition loop consults for its
//! sample-count limit.
//!
//! Slow subscribers lag rather than block the acquisition loop: the broadcast
//! channel drops the oldest packets for a receiver that falls behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Measured quantity of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    Temperature,
    SoundPressureLevel,
    Mass,
    Voltage,
    Current,
    Power,
    Frequency,
}

/// Unit of a sample value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Celsius,
    Fahrenheit,
    Kelvin,
    DecibelSpl,
    Gram,
    Kilogram,
    Volt,
    Ampere,
    Watt,
    Hertz,
    Unitless,
}

/// Modifier flags attached to a sample.
///
/// These mirror what instruments report on their displays: hold / min / max /
/// average capture modes, and the time/frequency weighting settings of sound
/// level meters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFlags {
    pub hold: bool,
    pub min: bool,
    pub max: bool,
    pub avg: bool,
    pub time_weight_fast: bool,
    pub time_weight_slow: bool,
    pub freq_weight_a: bool,
    pub freq_weight_c: bool,
}

/// One decoded measurement.
///
/// Timestamps are implicit in arrival order; the session start time is
/// carried by the [`FeedPacket::Header`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Channel name, e.g. `"T1"` or `"SPL"`.
    pub channel: String,
    pub quantity: Quantity,
    pub unit: Unit,
    pub flags: SampleFlags,
    pub value: f64,
}

/// Packets flowing over the session data feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedPacket {
    /// Start-of-stream marker, sent before any sample.
    Header {
        feed_version: u32,
        start_time: DateTime<Utc>,
    },
    /// One decoded measurement.
    Sample(Sample),
    /// End-of-stream marker, sent exactly once per session.
    End,
}

/// Feed version stamped into every [`FeedPacket::Header`].
pub const FEED_VERSION: u32 = 1;

/// Arc-wrapped feed packet for zero-copy distribution.
pub type ArcFeedPacket = Arc<FeedPacket>;

/// Sending half of a session feed.
pub type FeedSender = broadcast::Sender<ArcFeedPacket>;

/// Receiving half of a session feed.
pub type FeedReceiver = broadcast::Receiver<ArcFeedPacket>;

/// Create a feed channel with the given capacity.
pub fn feed_channel(capacity: usize) -> (FeedSender, FeedReceiver) {
    broadcast::channel(capacity)
}

/// The sink a session pushes decoded data into.
///
/// Owned by the acquisition session and lent to the packet handler for the
/// duration of each decode call. Sending to a feed with no subscribers is not
/// an error; the packet is simply dropped.
#[derive(Debug)]
pub struct SessionFeed {
    tx: FeedSender,
    samples_sent: u64,
    ended: bool,
}

impl SessionFeed {
    pub fn new(tx: FeedSender) -> Self {
        Self {
            tx,
            samples_sent: 0,
            ended: false,
        }
    }

    /// Subscribe a new consumer to this feed.
    pub fn subscribe(&self) -> FeedReceiver {
        self.tx.subscribe()
    }

    /// Number of samples sent so far.
    pub fn samples_sent(&self) -> u64 {
        self.samples_sent
    }

    /// Whether the end-of-stream marker has been sent.
    pub fn ended(&self) -> bool {
        self.ended
    }

    /// Send the start-of-stream header.
    pub fn send_header(&mut self) {
        self.send(FeedPacket::Header {
            feed_version: FEED_VERSION,
            start_time: Utc::now(),
        });
    }

    /// Send one decoded sample.
    pub fn send_sample(&mut self, sample: Sample) {
        self.send(FeedPacket::Sample(sample));
        self.samples_sent += 1;
    }

    /// Send the end-of-stream marker. Subsequent calls are no-ops.
    pub fn finish(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.send(FeedPacket::End);
    }

    fn send(&self, packet: FeedPacket) {
        if self.tx.send(Arc::new(packet)).is_err() {
            // No active subscribers; not an error.
            debug!("feed packet dropped: no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(value: f64) -> Sample {
        Sample {
            channel: "T1".into(),
            quantity: Quantity::Temperature,
            unit: Unit::Celsius,
            flags: SampleFlags::default(),
            value,
        }
    }

    #[tokio::test]
    async fn feed_packets_arrive_in_order() {
        let (tx, mut rx) = feed_channel(8);
        let mut feed = SessionFeed::new(tx);

        feed.send_header();
        feed.send_sample(sample(1.0));
        feed.send_sample(sample(2.0));
        feed.finish();

        assert!(matches!(
            *rx.recv().await.unwrap(),
            FeedPacket::Header { feed_version: FEED_VERSION, .. }
        ));
        assert!(matches!(*rx.recv().await.unwrap(), FeedPacket::Sample(_)));
        assert!(matches!(*rx.recv().await.unwrap(), FeedPacket::Sample(_)));
        assert!(matches!(*rx.recv().await.unwrap(), FeedPacket::End));
        assert_eq!(feed.samples_sent(), 2);
    }

    #[tokio::test]
    async fn end_marker_sent_exactly_once() {
        let (tx, mut rx) = feed_channel(8);
        let mut feed = SessionFeed::new(tx);

        feed.finish();
        feed.finish();
        feed.finish();

        assert!(matches!(*rx.recv().await.unwrap(), FeedPacket::End));
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert!(feed.ended());
    }

    #[test]
    fn sending_without_subscribers_is_not_an_error() {
        let (tx, rx) = feed_channel(8);
        drop(rx);
        let mut feed = SessionFeed::new(tx);

        feed.send_header();
        feed.send_sample(sample(0.5));
        feed.finish();

        assert_eq!(feed.samples_sent(), 1);
    }

    #[tokio::test]
    async fn multiple_subscribers_see_same_packets() {
        let (tx, mut rx1) = feed_channel(8);
        let mut rx2 = tx.subscribe();
        let mut feed = SessionFeed::new(tx);

        feed.send_sample(sample(3.5));

        let p1 = rx1.recv().await.unwrap();
        let p2 = rx2.recv().await.unwrap();
        assert!(Arc::ptr_eq(&p1, &p2));
    }
}
