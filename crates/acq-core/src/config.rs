//! Session configuration: connection parameters and acquisition limits.
//!
//! Serial line settings use the compact `"<baud>/<bits><parity><stop>"`
//! notation common for bench instruments (`"2400/8n1"`, `"9600/8n1"`), and
//! device sessions are described by small TOML documents:
//!
//! ```toml
//! driver = "appa-55ii"
//! conn = "/dev/ttyUSB0"
//! serialcomm = "9600/8n1"      # optional, driver default otherwise
//! poll_interval_ms = 150        # optional
//!
//! [limits]
//! limit_samples = 500
//! limit_msec = 60000
//!
//! [params]                      # driver-specific, strongly typed per driver
//! data_source = "memory"
//! ```

use crate::error::AcqError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Parity setting of a serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Serial line settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialParams {
    pub baud: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            baud: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }
}

impl SerialParams {
    /// Parse the compact `"<baud>/<bits><parity><stop>"` form, e.g. `"2400/8n1"`.
    pub fn parse(comm: &str) -> Result<Self, AcqError> {
        let bad = || AcqError::Config(format!("invalid serial parameter string '{comm}'"));

        let (baud_str, frame) = comm.split_once('/').ok_or_else(bad)?;
        let baud: u32 = baud_str.parse().map_err(|_| bad())?;

        let mut chars = frame.chars();
        let data_bits = chars.next().and_then(|c| c.to_digit(10)).ok_or_else(bad)? as u8;
        let parity = match chars.next().ok_or_else(bad)? {
            'n' | 'N' => Parity::None,
            'e' | 'E' => Parity::Even,
            'o' | 'O' => Parity::Odd,
            _ => return Err(bad()),
        };
        let stop_bits = chars.next().and_then(|c| c.to_digit(10)).ok_or_else(bad)? as u8;
        if chars.next().is_some() {
            return Err(bad());
        }

        if !(5..=8).contains(&data_bits) || !(1..=2).contains(&stop_bits) || baud == 0 {
            return Err(bad());
        }

        Ok(Self {
            baud,
            data_bits,
            parity,
            stop_bits,
        })
    }

    #[cfg(feature = "serial")]
    pub(crate) fn tokio_data_bits(&self) -> tokio_serial::DataBits {
        match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }

    #[cfg(feature = "serial")]
    pub(crate) fn tokio_parity(&self) -> tokio_serial::Parity {
        match self.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }

    #[cfg(feature = "serial")]
    pub(crate) fn tokio_stop_bits(&self) -> tokio_serial::StopBits {
        match self.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        }
    }
}

impl std::fmt::Display for SerialParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parity = match self.parity {
            Parity::None => 'n',
            Parity::Even => 'e',
            Parity::Odd => 'o',
        };
        write!(
            f,
            "{}/{}{}{}",
            self.baud, self.data_bits, parity, self.stop_bits
        )
    }
}

/// Acquisition stop limits, checked once per poll tick.
///
/// `None` means unlimited; continuous acquisition runs until cancelled or the
/// device signals end-of-stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionLimits {
    /// Stop after this many samples have been sent to the feed.
    pub limit_samples: Option<u64>,
    /// Stop after this many milliseconds of acquisition.
    pub limit_msec: Option<u64>,
}

impl AcquisitionLimits {
    pub fn duration(&self) -> Option<Duration> {
        self.limit_msec.map(Duration::from_millis)
    }
}

/// Configuration of one device session.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Driver type, matching a registered factory.
    pub driver: String,
    /// Connection string (serial port path).
    pub conn: String,
    /// Serial parameters; the driver's default applies when absent.
    pub serialcomm: Option<String>,
    /// Poll tick interval; the session default applies when absent.
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub limits: AcquisitionLimits,
    /// Driver-specific parameters, deserialized by the driver factory into
    /// its own typed configuration.
    #[serde(default = "empty_params")]
    pub params: toml::Value,
}

fn empty_params() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl DeviceConfig {
    /// Parse a device configuration from a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, AcqError> {
        toml::from_str(text).map_err(|e| AcqError::Config(e.to_string()))
    }

    /// Load a device configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, AcqError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Effective serial parameters, falling back to the driver default.
    pub fn serial_params(&self, driver_default: &str) -> Result<SerialParams, AcqError> {
        match &self.serialcomm {
            Some(comm) => SerialParams::parse(comm),
            None => SerialParams::parse(driver_default),
        }
    }

    /// Effective poll interval, if configured.
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_standard_serialcomm() {
        let p = SerialParams::parse("2400/8n1").unwrap();
        assert_eq!(p.baud, 2400);
        assert_eq!(p.data_bits, 8);
        assert_eq!(p.parity, Parity::None);
        assert_eq!(p.stop_bits, 1);
        assert_eq!(p.to_string(), "2400/8n1");
    }

    #[test]
    fn parse_even_parity_and_two_stop_bits() {
        let p = SerialParams::parse("115200/7e2").unwrap();
        assert_eq!(p.baud, 115_200);
        assert_eq!(p.data_bits, 7);
        assert_eq!(p.parity, Parity::Even);
        assert_eq!(p.stop_bits, 2);
    }

    #[test]
    fn parse_rejects_malformed_strings() {
        for bad in ["9600", "9600/8x1", "9600/9n1", "abc/8n1", "9600/8n3", "9600/8n11", "0/8n1"] {
            assert!(SerialParams::parse(bad).is_err(), "accepted '{bad}'");
        }
    }

    #[test]
    fn device_config_from_toml() {
        let cfg = DeviceConfig::from_toml_str(
            r#"
            driver = "appa-55ii"
            conn = "/dev/ttyUSB0"
            serialcomm = "9600/8n1"

            [limits]
            limit_samples = 100

            [params]
            data_source = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.driver, "appa-55ii");
        assert_eq!(cfg.conn, "/dev/ttyUSB0");
        assert_eq!(cfg.limits.limit_samples, Some(100));
        assert_eq!(cfg.limits.limit_msec, None);
        assert_eq!(
            cfg.params.get("data_source").and_then(|v| v.as_str()),
            Some("memory")
        );
        assert_eq!(cfg.serial_params("2400/8n1").unwrap().baud, 9600);
    }

    #[test]
    fn device_config_defaults() {
        let cfg = DeviceConfig::from_toml_str(
            r#"
            driver = "demo"
            conn = "/dev/null"
            "#,
        )
        .unwrap();

        assert!(cfg.serialcomm.is_none());
        assert_eq!(cfg.limits, AcquisitionLimits::default());
        assert_eq!(cfg.serial_params("2400/8n1").unwrap().baud, 2400);
        assert!(cfg.poll_interval().is_none());
    }

    #[test]
    fn device_config_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "driver = \"demo\"\nconn = \"/dev/ttyUSB1\"").unwrap();

        let cfg = DeviceConfig::load(file.path()).unwrap();
        assert_eq!(cfg.conn, "/dev/ttyUSB1");
    }
}
