//! CEM DT-885x sound level meter driver.
//!
//! Protocol Overview:
//! - Baud: 9600, 8N1
//! - Measurement/setting frames: `0xA5 <token> <payload...>` where the
//!   payload length is fixed per token (0-3 bytes)
//! - Hold mode: the device emits bare `0xFF` bytes instead of frames while
//!   the display is frozen
//!
//! Most tokens carry device state (weighting, range, battery); readings
//! arrive as a BCD measurement token followed by a readout or bargraph
//! token that says which display the value belongs to. The device keeps
//! sending bargraph values while in max/min hold; those are suppressed so
//! the feed mirrors the display exactly.

use crate::registry::{DriverFactory, ProtocolParts};
use acq_core::feed::{Quantity, Sample, SampleFlags, SessionFeed, Unit};
use acq_core::framing::{FrameValidity, PacketDisposition, PacketHandler, PacketValidator};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::debug;

/// Command byte opening every measurement/setting frame.
const CMD_MSET: u8 = 0xA5;
/// Emitted continuously while the display is held.
const BYTE_HOLD: u8 = 0xFF;

/// While holding, re-emit the frozen reading at this interval.
const HOLD_REPEAT_INTERVAL: Duration = Duration::from_millis(500);

// Tokens
const TOKEN_WEIGHT_TIME_FAST: u8 = 0x02;
const TOKEN_WEIGHT_TIME_SLOW: u8 = 0x03;
const TOKEN_HOLD_MAX: u8 = 0x04;
const TOKEN_HOLD_MIN: u8 = 0x05;
const TOKEN_TIME: u8 = 0x06;
const TOKEN_MEAS_RANGE_OVER: u8 = 0x07;
const TOKEN_MEAS_RANGE_UNDER: u8 = 0x08;
const TOKEN_STORE_FULL: u8 = 0x09;
const TOKEN_RECORDING_ON: u8 = 0x0A;
const TOKEN_MEAS_WAS_READOUT: u8 = 0x0B;
const TOKEN_MEAS_WAS_BARGRAPH: u8 = 0x0C;
const TOKEN_MEASUREMENT: u8 = 0x0D;
const TOKEN_HOLD_NONE: u8 = 0x0E;
const TOKEN_BATTERY_LOW: u8 = 0x0F;
const TOKEN_MEAS_RANGE_OK: u8 = 0x11;
const TOKEN_STORE_OK: u8 = 0x12;
const TOKEN_RECORDING_OFF: u8 = 0x13;
const TOKEN_WEIGHT_FREQ_A: u8 = 0x14;
const TOKEN_WEIGHT_FREQ_C: u8 = 0x15;
const TOKEN_BATTERY_OK: u8 = 0x16;
const TOKEN_MEAS_RANGE_30_80: u8 = 0x17;
const TOKEN_MEAS_RANGE_30_130: u8 = 0x18;
const TOKEN_MEAS_RANGE_50_100: u8 = 0x19;
const TOKEN_MEAS_RANGE_80_130: u8 = 0x1A;

/// Payload length for each token, `None` for unknown tokens.
fn token_payload_len(token: u8) -> Option<usize> {
    match token {
        TOKEN_TIME => Some(3),
        TOKEN_MEASUREMENT => Some(2),
        TOKEN_MEAS_WAS_READOUT | TOKEN_WEIGHT_FREQ_A | TOKEN_WEIGHT_FREQ_C => Some(1),
        TOKEN_WEIGHT_TIME_FAST
        | TOKEN_WEIGHT_TIME_SLOW
        | TOKEN_HOLD_MAX
        | TOKEN_HOLD_MIN
        | TOKEN_MEAS_RANGE_OVER
        | TOKEN_MEAS_RANGE_UNDER
        | TOKEN_STORE_FULL
        | TOKEN_RECORDING_ON
        | TOKEN_MEAS_WAS_BARGRAPH
        | TOKEN_HOLD_NONE
        | TOKEN_BATTERY_LOW
        | TOKEN_MEAS_RANGE_OK
        | TOKEN_STORE_OK
        | TOKEN_RECORDING_OFF
        | TOKEN_BATTERY_OK
        | TOKEN_MEAS_RANGE_30_80
        | TOKEN_MEAS_RANGE_30_130
        | TOKEN_MEAS_RANGE_50_100
        | TOKEN_MEAS_RANGE_80_130 => Some(0),
        _ => None,
    }
}

/// Driver configuration (the `[params]` table). The DT-885x needs none.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CemDt885xConfig {}

/// Recognizes DT-885x frames and hold bytes.
pub struct CemDt885xValidator;

impl PacketValidator for CemDt885xValidator {
    fn min_packet_len(&self) -> usize {
        1
    }

    fn inspect(&self, window: &[u8]) -> FrameValidity {
        if window[0] == BYTE_HOLD {
            return FrameValidity::Valid { length: 1 };
        }
        if window[0] != CMD_MSET {
            return FrameValidity::Invalid;
        }
        if window.len() < 2 {
            return FrameValidity::Incomplete;
        }
        match token_payload_len(window[1]) {
            None => FrameValidity::Invalid,
            Some(payload) => {
                let total = 2 + payload;
                if window.len() < total {
                    FrameValidity::Incomplete
                } else {
                    FrameValidity::Valid { length: total }
                }
            }
        }
    }
}

/// Decodes DT-885x packets into sound-pressure-level samples.
pub struct CemDt885xHandler {
    flags: SampleFlags,
    last_spl: Option<f64>,
    recording: bool,
    hold_last_sent: Option<Instant>,
}

impl CemDt885xHandler {
    pub fn new() -> Self {
        Self {
            flags: SampleFlags::default(),
            last_spl: None,
            recording: false,
            hold_last_sent: None,
        }
    }

    fn emit(&self, feed: &mut SessionFeed) {
        if let Some(spl) = self.last_spl {
            feed.send_sample(Sample {
                channel: "SPL".into(),
                quantity: Quantity::SoundPressureLevel,
                unit: Unit::DecibelSpl,
                flags: self.flags,
                value: spl,
            });
        }
    }

    /// Whether the device reports an active recording session.
    pub fn recording(&self) -> bool {
        self.recording
    }

    fn hold_byte(&mut self, feed: &mut SessionFeed) {
        self.flags.hold = true;
        let now = Instant::now();
        let due = self
            .hold_last_sent
            .map_or(true, |last| now.duration_since(last) >= HOLD_REPEAT_INTERVAL);
        if due {
            // Force the frozen reading out again so the feed keeps pace
            // with the display.
            self.emit(feed);
            self.hold_last_sent = Some(now);
        }
    }
}

impl Default for CemDt885xHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a 4-digit BCD sound level, e.g. `0x09 0x35` -> 93.5 dB.
fn decode_bcd_spl(hi: u8, lo: u8) -> f64 {
    f64::from((hi & 0xF0) >> 4) * 100.0
        + f64::from(hi & 0x0F) * 10.0
        + f64::from((lo & 0xF0) >> 4)
        + f64::from(lo & 0x0F) / 10.0
}

impl PacketHandler for CemDt885xHandler {
    fn handle(&mut self, packet: &[u8], feed: &mut SessionFeed) -> Result<PacketDisposition> {
        if packet[0] == BYTE_HOLD {
            self.hold_byte(feed);
            return Ok(PacketDisposition::Continue);
        }

        match packet[1] {
            TOKEN_WEIGHT_TIME_FAST => {
                self.flags.time_weight_fast = true;
                self.flags.time_weight_slow = false;
            }
            TOKEN_WEIGHT_TIME_SLOW => {
                self.flags.time_weight_slow = true;
                self.flags.time_weight_fast = false;
            }
            TOKEN_WEIGHT_FREQ_A => {
                self.flags.freq_weight_a = true;
                self.flags.freq_weight_c = false;
            }
            TOKEN_WEIGHT_FREQ_C => {
                self.flags.freq_weight_c = true;
                self.flags.freq_weight_a = false;
            }
            TOKEN_HOLD_MAX => {
                self.flags.hold = true;
                self.flags.max = true;
                self.flags.min = false;
            }
            TOKEN_HOLD_MIN => {
                self.flags.hold = true;
                self.flags.min = true;
                self.flags.max = false;
            }
            TOKEN_HOLD_NONE => {
                self.flags.hold = false;
                self.flags.max = false;
                self.flags.min = false;
                self.hold_last_sent = None;
            }
            TOKEN_MEASUREMENT => {
                self.last_spl = Some(decode_bcd_spl(packet[2], packet[3]));
            }
            TOKEN_MEAS_WAS_READOUT | TOKEN_MEAS_WAS_BARGRAPH => {
                if (self.flags.max || self.flags.min) && packet[1] == TOKEN_MEAS_WAS_BARGRAPH {
                    // The device still sends bargraph measurements in
                    // max/min hold mode; the display ignores them.
                } else {
                    self.emit(feed);
                }
            }
            TOKEN_RECORDING_ON => self.recording = true,
            TOKEN_RECORDING_OFF => self.recording = false,
            other => {
                // Range, battery, store and time tokens carry nothing the
                // feed can express.
                debug!(token = other, "ignoring status token");
            }
        }

        Ok(PacketDisposition::Continue)
    }
}

/// Factory for DT-885x driver instances.
pub struct CemDt885xFactory;

impl DriverFactory for CemDt885xFactory {
    fn driver_type(&self) -> &'static str {
        "cem-dt-885x"
    }

    fn name(&self) -> &'static str {
        "CEM DT-885x"
    }

    fn default_serialcomm(&self) -> &'static str {
        "9600/8n1"
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let _: CemDt885xConfig = config
            .clone()
            .try_into()
            .context("Invalid DT-885x config")?;
        Ok(())
    }

    fn build(&self, config: &toml::Value) -> Result<ProtocolParts> {
        let _: CemDt885xConfig = config
            .clone()
            .try_into()
            .context("Invalid DT-885x config")?;
        Ok(ProtocolParts {
            validator: Box::new(CemDt885xValidator),
            handler: Box::new(CemDt885xHandler::new()),
            channels: vec!["SPL".into()],
        })
    }
}
