//! APPA 55II thermologger driver.
//!
//! Protocol Overview:
//! - Baud: 9600, 8N1
//! - Frame: `0x55 0x55 <type> <len> <payload...> <checksum>`
//! - `len` is the payload length, at most 32
//! - Checksum: low byte of the sum over header, type and payload bytes
//!
//! The device streams live readings of its two thermocouple channels and can
//! replay its internal memory log. In memory mode the log arrives as a
//! metadata packet announcing the record count, followed by data packets
//! whose payloads concatenate into fixed 20-byte records, and a final
//! log-end packet that terminates the download.

use crate::registry::{DriverFactory, ProtocolParts};
use acq_core::feed::{Quantity, Sample, SampleFlags, SessionFeed, Unit};
use acq_core::framing::{FrameValidity, PacketDisposition, PacketHandler, PacketValidator};
use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

const HEADER: [u8; 2] = [0x55, 0x55];
/// Largest payload the device ever sends.
const MAX_PAYLOAD: usize = 32;
/// Header (2) + type (1) + length (1) + checksum (1): enough to read the
/// length field and the smallest complete frame.
const MIN_PACKET_LEN: usize = 5;
const NUM_CHANNELS: usize = 2;
/// Fixed size of one memory-log record.
const LOG_RECORD_LEN: usize = 20;

// Packet types
const LIVE_DATA: u8 = 0x00;
const LOG_METADATA: u8 = 0x11;
const LOG_DATA: u8 = 0x14;
const LOG_START: u8 = 0x18;
const LOG_END: u8 = 0x19;

/// Which stream of the device to acquire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Live readings as they appear on the display.
    #[default]
    Live,
    /// Download of the internal memory log.
    Memory,
}

/// Driver configuration (the `[params]` table).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Appa55iiConfig {
    #[serde(default)]
    pub data_source: DataSource,
}

fn checksum_ok(frame: &[u8]) -> bool {
    // Checksum covers header, type and payload: buf[3] + 4 bytes.
    let size = frame[3] as usize + 4;
    let sum = frame[..size].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    frame[size] == sum
}

/// Recognizes APPA 55II frames.
pub struct Appa55iiValidator;

impl PacketValidator for Appa55iiValidator {
    fn min_packet_len(&self) -> usize {
        MIN_PACKET_LEN
    }

    fn inspect(&self, window: &[u8]) -> FrameValidity {
        if window[..2] != HEADER {
            return FrameValidity::Invalid;
        }
        let len = window[3] as usize;
        if len > MAX_PAYLOAD {
            return FrameValidity::Invalid;
        }
        let total = 4 + len + 1;
        if window.len() < total {
            return FrameValidity::Incomplete;
        }
        if checksum_ok(window) {
            FrameValidity::Valid { length: total }
        } else {
            FrameValidity::Invalid
        }
    }
}

fn channel_name(ch: usize) -> String {
    format!("T{}", ch + 1)
}

/// Decode the display-mode byte into sample flags.
fn display_flags(disp_mode: u8) -> SampleFlags {
    SampleFlags {
        hold: disp_mode & 0xF0 == 0x20,
        max: disp_mode & 0x0C == 0x04,
        min: disp_mode & 0x0C == 0x08,
        avg: disp_mode & 0x0C == 0x0C,
        ..SampleFlags::default()
    }
}

/// Decode one live-reading channel: little-endian value plus a status byte.
fn live_temperature(raw: i16, status: u8) -> f64 {
    if status & 0x60 != 0 {
        // Open input or out of range.
        f64::INFINITY
    } else if status & 0x01 != 0 {
        f64::from(raw) / 10.0
    } else {
        f64::from(raw)
    }
}

/// Decodes APPA 55II packets into temperature samples.
pub struct Appa55iiHandler {
    data_source: DataSource,
    log_buf: Vec<u8>,
    num_log_records: u64,
}

impl Appa55iiHandler {
    pub fn new(data_source: DataSource) -> Self {
        Self {
            data_source,
            log_buf: Vec::new(),
            num_log_records: 0,
        }
    }

    fn live_data(&mut self, packet: &[u8], feed: &mut SessionFeed) {
        if self.data_source != DataSource::Live {
            return;
        }
        // Live payload: 13 status bytes, display mode, then 3 bytes per channel.
        if packet.len() < 4 + 14 + 3 * NUM_CHANNELS {
            warn!(len = packet.len(), "short live-data packet");
            return;
        }

        let flags = display_flags(packet[4 + 13]);
        for ch in 0..NUM_CHANNELS {
            let base = 4 + 14 + 3 * ch;
            let raw = i16::from_le_bytes([packet[base], packet[base + 1]]);
            feed.send_sample(Sample {
                channel: channel_name(ch),
                quantity: Quantity::Temperature,
                unit: Unit::Celsius,
                flags,
                value: live_temperature(raw, packet[base + 2]),
            });
        }
    }

    fn log_metadata(&mut self, packet: &[u8]) {
        if packet.len() < 6 {
            warn!(len = packet.len(), "short log-metadata packet");
            return;
        }
        self.num_log_records = u64::from(u16::from_le_bytes([packet[4], packet[5]]));
        debug!(records = self.num_log_records, "memory log metadata");
    }

    fn log_data(&mut self, packet: &[u8], feed: &mut SessionFeed) {
        if self.data_source != DataSource::Memory {
            return;
        }
        let len = packet[3] as usize;
        self.log_buf.extend_from_slice(&packet[4..4 + len]);
        self.parse_log_records(feed);
    }

    fn parse_log_records(&mut self, feed: &mut SessionFeed) {
        let mut offset = 0;
        while self.log_buf.len() - offset >= LOG_RECORD_LEN && self.num_log_records > 0 {
            let record = &self.log_buf[offset..offset + LOG_RECORD_LEN];
            debug!(
                "log record timestamp: {:02}:{:02}:{:02}",
                record[2], record[3], record[4]
            );

            for ch in 0..NUM_CHANNELS {
                let base = 12 + 2 * ch;
                let raw = i16::from_le_bytes([record[base], record[base + 1]]);
                let value = if raw == 0x7FFF {
                    f64::INFINITY
                } else {
                    f64::from(raw) / 10.0
                };
                feed.send_sample(Sample {
                    channel: channel_name(ch),
                    quantity: Quantity::Temperature,
                    unit: Unit::Celsius,
                    flags: SampleFlags::default(),
                    value,
                });
            }

            offset += LOG_RECORD_LEN;
            self.num_log_records -= 1;
        }
        self.log_buf.drain(..offset);
    }
}

impl PacketHandler for Appa55iiHandler {
    fn handle(&mut self, packet: &[u8], feed: &mut SessionFeed) -> Result<PacketDisposition> {
        match packet[2] {
            LIVE_DATA => self.live_data(packet, feed),
            LOG_METADATA => self.log_metadata(packet),
            LOG_DATA => self.log_data(packet, feed),
            LOG_START => {}
            LOG_END => {
                if self.data_source == DataSource::Memory {
                    debug!("memory log download complete");
                    return Ok(PacketDisposition::Finish);
                }
            }
            other => warn!(packet_type = other, "invalid packet type"),
        }
        Ok(PacketDisposition::Continue)
    }
}

/// Factory for APPA 55II driver instances.
pub struct Appa55iiFactory;

impl DriverFactory for Appa55iiFactory {
    fn driver_type(&self) -> &'static str {
        "appa-55ii"
    }

    fn name(&self) -> &'static str {
        "APPA 55II"
    }

    fn default_serialcomm(&self) -> &'static str {
        "9600/8n1"
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let _: Appa55iiConfig = config
            .clone()
            .try_into()
            .context("Invalid APPA 55II config")?;
        Ok(())
    }

    fn build(&self, config: &toml::Value) -> Result<ProtocolParts> {
        let cfg: Appa55iiConfig = config
            .clone()
            .try_into()
            .context("Invalid APPA 55II config")?;
        Ok(ProtocolParts {
            validator: Box::new(Appa55iiValidator),
            handler: Box::new(Appa55iiHandler::new(cfg.data_source)),
            channels: (0..NUM_CHANNELS).map(channel_name).collect(),
        })
    }
}
