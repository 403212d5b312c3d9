//! Driver factories and the device registry.
//!
//! Drivers are registered explicitly at the composition root; there is no
//! global driver table and no registration magic:
//!
//! ```rust
//! use acq_hardware::registry::DriverRegistry;
//! use acq_hardware::drivers::appa_55ii::Appa55iiFactory;
//!
//! let mut registry = DriverRegistry::new();
//! registry.register_factory(Box::new(Appa55iiFactory)).unwrap();
//!
//! let config = toml::Value::Table(toml::map::Map::new());
//! let parts = registry.create("appa-55ii", &config).unwrap();
//! assert_eq!(parts.channels, vec!["T1", "T2"]);
//! ```
//!
//! A factory turns a driver-specific TOML table into [`ProtocolParts`]: the
//! validator and handler the stream framer plugs in, plus the channel list
//! the device produces. Configuration is strongly typed per driver: each
//! factory deserializes into its own config struct and rejects bad values in
//! `validate` before anything is built.

use acq_core::framing::{PacketHandler, PacketValidator};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use tracing::debug;

/// Everything a driver contributes to a session.
pub struct ProtocolParts {
    /// Packet recognizer for the stream framer.
    pub validator: Box<dyn PacketValidator>,
    /// Packet decoder pushing samples to the feed.
    pub handler: Box<dyn PacketHandler>,
    /// Channel names this device produces, in emission order.
    pub channels: Vec<String>,
}

impl std::fmt::Debug for ProtocolParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolParts")
            .field("channels", &self.channels)
            .finish()
    }
}

/// Factory for one driver type.
///
/// Factories are registered once and live for the program's lifetime. Both
/// `validate` and `build` receive the `[params]` table of the device
/// configuration; `validate` runs first and should produce actionable
/// messages for bad configs.
pub trait DriverFactory: Send + Sync + 'static {
    /// Driver type name used in configuration, e.g. `"appa-55ii"`.
    fn driver_type(&self) -> &'static str;

    /// Human-readable device name, e.g. `"APPA 55II"`.
    fn name(&self) -> &'static str;

    /// Default serial parameters in compact form, e.g. `"9600/8n1"`.
    fn default_serialcomm(&self) -> &'static str;

    /// Check the configuration without building anything.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Build the protocol parts for one session.
    fn build(&self, config: &toml::Value) -> Result<ProtocolParts>;
}

/// Summary of a registered driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverInfo {
    pub driver_type: &'static str,
    pub name: &'static str,
    pub default_serialcomm: &'static str,
}

/// Explicit driver registry.
///
/// Constructed and populated by the application, then passed wherever
/// sessions are created.
#[derive(Default)]
pub struct DriverRegistry {
    factories: HashMap<&'static str, Box<dyn DriverFactory>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the bundled drivers.
    pub fn with_bundled_drivers() -> Self {
        let mut registry = Self::new();
        for factory in crate::drivers::bundled() {
            // Bundled driver types are distinct by construction.
            let _ = registry.register_factory(factory);
        }
        registry
    }

    /// Register a driver factory.
    ///
    /// # Errors
    ///
    /// Fails if a factory with the same driver type is already registered.
    pub fn register_factory(&mut self, factory: Box<dyn DriverFactory>) -> Result<()> {
        let driver_type = factory.driver_type();
        if self.factories.contains_key(driver_type) {
            return Err(anyhow!("driver type '{driver_type}' already registered"));
        }
        debug!(driver_type, "registered driver factory");
        self.factories.insert(driver_type, factory);
        Ok(())
    }

    /// Look up a factory by driver type.
    pub fn get(&self, driver_type: &str) -> Option<&dyn DriverFactory> {
        self.factories.get(driver_type).map(Box::as_ref)
    }

    /// List registered drivers, sorted by driver type.
    pub fn list(&self) -> Vec<DriverInfo> {
        let mut infos: Vec<DriverInfo> = self
            .factories
            .values()
            .map(|f| DriverInfo {
                driver_type: f.driver_type(),
                name: f.name(),
                default_serialcomm: f.default_serialcomm(),
            })
            .collect();
        infos.sort_by_key(|i| i.driver_type);
        infos
    }

    /// Validate and build protocol parts for the given driver type.
    pub fn create(&self, driver_type: &str, config: &toml::Value) -> Result<ProtocolParts> {
        let factory = self
            .get(driver_type)
            .ok_or_else(|| anyhow!("unknown driver type '{driver_type}'"))?;
        factory.validate(config)?;
        factory.build(config)
    }
}

/// Check that a serial port path exists, with a listing of the ports that do.
///
/// Intended for pre-flight validation of connection strings, so a typo'd
/// port fails with something actionable instead of an opaque open error.
pub fn validate_serial_port(port: &str, device_name: &str) -> Result<()> {
    if std::path::Path::new(port).exists() {
        return Ok(());
    }

    let available = match serialport::available_ports() {
        Ok(ports) if ports.is_empty() => "No serial ports detected on this system".to_string(),
        Ok(ports) => {
            let list: Vec<String> = ports
                .iter()
                .map(|p| format!("  - {}", p.port_name))
                .collect();
            format!("Available serial ports:\n{}", list.join("\n"))
        }
        Err(e) => format!("Could not enumerate serial ports: {e}"),
    };

    Err(anyhow!(
        "Serial port '{port}' does not exist for device '{device_name}'.\n{available}"
    ))
}
