//! Demo driver: a synthetic voltage source protocol.
//!
//! Frame: `0xAA 0xAA <len> <payload...> <checksum>`, checksum being the low
//! byte of `len` plus the payload sum. Each payload byte is one reading in
//! tenths of a volt.
//!
//! No real instrument speaks this; it exists so sessions can be exercised
//! without hardware, in tests and during development.

use crate::registry::{DriverFactory, ProtocolParts};
use acq_core::feed::{Quantity, Sample, SampleFlags, SessionFeed, Unit};
use acq_core::framing::{FrameValidity, PacketDisposition, PacketHandler, PacketValidator};
use anyhow::{Context, Result};
use serde::Deserialize;

const HEADER: [u8; 2] = [0xAA, 0xAA];
/// Header (2) + length (1) + checksum (1).
const MIN_PACKET_LEN: usize = 4;

/// Driver configuration (the `[params]` table).
#[derive(Debug, Clone, Deserialize)]
pub struct DemoConfig {
    /// Scale applied to raw payload bytes; defaults to tenths of a volt.
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    0.1
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            scale: default_scale(),
        }
    }
}

/// Build one demo frame around the given payload. Exposed for tests and
/// simulated transports.
pub fn build_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![HEADER[0], HEADER[1], payload.len() as u8];
    frame.extend_from_slice(payload);
    let sum = frame[2..].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    frame.push(sum);
    frame
}

/// Recognizes demo frames.
pub struct DemoValidator;

impl PacketValidator for DemoValidator {
    fn min_packet_len(&self) -> usize {
        MIN_PACKET_LEN
    }

    fn inspect(&self, window: &[u8]) -> FrameValidity {
        if window[..2] != HEADER {
            return FrameValidity::Invalid;
        }
        let len = window[2] as usize;
        let total = 3 + len + 1;
        if window.len() < total {
            return FrameValidity::Incomplete;
        }
        let sum = window[2..3 + len]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        if window[3 + len] == sum {
            FrameValidity::Valid { length: total }
        } else {
            FrameValidity::Invalid
        }
    }
}

/// Decodes demo frames into voltage samples.
pub struct DemoHandler {
    scale: f64,
}

impl DemoHandler {
    pub fn new(scale: f64) -> Self {
        Self { scale }
    }
}

impl PacketHandler for DemoHandler {
    fn handle(&mut self, packet: &[u8], feed: &mut SessionFeed) -> Result<PacketDisposition> {
        let len = packet[2] as usize;
        for &raw in &packet[3..3 + len] {
            feed.send_sample(Sample {
                channel: "V1".into(),
                quantity: Quantity::Voltage,
                unit: Unit::Volt,
                flags: SampleFlags::default(),
                value: f64::from(raw) * self.scale,
            });
        }
        Ok(PacketDisposition::Continue)
    }
}

/// Factory for demo driver instances.
pub struct DemoFactory;

impl DriverFactory for DemoFactory {
    fn driver_type(&self) -> &'static str {
        "demo"
    }

    fn name(&self) -> &'static str {
        "Demo voltage source"
    }

    fn default_serialcomm(&self) -> &'static str {
        "9600/8n1"
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: DemoConfig = config.clone().try_into().context("Invalid demo config")?;
        if !cfg.scale.is_finite() || cfg.scale <= 0.0 {
            anyhow::bail!("scale must be positive and finite, got {}", cfg.scale);
        }
        Ok(())
    }

    fn build(&self, config: &toml::Value) -> Result<ProtocolParts> {
        let cfg: DemoConfig = config.clone().try_into().context("Invalid demo config")?;
        Ok(ProtocolParts {
            validator: Box::new(DemoValidator),
            handler: Box::new(DemoHandler::new(cfg.scale)),
            channels: vec!["V1".into()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acq_core::feed::{feed_channel, FeedPacket, FeedReceiver};

    fn test_feed() -> (SessionFeed, FeedReceiver) {
        let (tx, rx) = feed_channel(64);
        (SessionFeed::new(tx), rx)
    }

    #[test]
    fn built_frames_validate() {
        let frame = build_frame(&[0x01, 0x02]);
        assert_eq!(frame, vec![0xAA, 0xAA, 0x02, 0x01, 0x02, 0x05]);
        assert_eq!(
            DemoValidator.inspect(&frame),
            FrameValidity::Valid { length: 6 }
        );
    }

    #[test]
    fn handler_scales_payload_bytes() {
        let (mut feed, mut rx) = test_feed();
        let mut handler = DemoHandler::new(0.1);

        handler.handle(&build_frame(&[15, 30]), &mut feed).unwrap();

        let mut values = Vec::new();
        while let Ok(p) = rx.try_recv() {
            if let FeedPacket::Sample(s) = &*p {
                values.push(s.value);
            }
        }
        assert_eq!(values, vec![1.5, 3.0]);
    }

    #[test]
    fn factory_rejects_bad_scale() {
        let bad: toml::Value = toml::from_str("scale = -1.0").unwrap();
        assert!(DemoFactory.validate(&bad).is_err());

        let good: toml::Value = toml::from_str("scale = 0.5").unwrap();
        assert!(DemoFactory.validate(&good).is_ok());
    }
}
