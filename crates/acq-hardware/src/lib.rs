//! `acq-hardware`
//!
//! Hardware layer on top of `acq-core`: the explicit driver registry and the
//! bundled protocol drivers.
//!
//! A driver here is small: a [`acq_core::framing::PacketValidator`] that
//! recognizes the instrument's frames, a
//! [`acq_core::framing::PacketHandler`] that decodes them into samples, and
//! a [`registry::DriverFactory`] that builds both from a strongly typed
//! configuration. Everything else (buffering, resynchronization, the poll
//! loop, the data feed) is shared machinery in `acq-core`.
//!
//! ## Wiring up a session
//!
//! ```rust,no_run
//! use acq_core::config::{AcquisitionLimits, DeviceConfig};
//! use acq_core::feed::{feed_channel, SessionFeed};
//! use acq_core::framing::StreamFramer;
//! use acq_core::session::AcquisitionSession;
//! use acq_core::transport::MockByteSource;
//! use acq_hardware::registry::DriverRegistry;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registry = DriverRegistry::with_bundled_drivers();
//! let config = DeviceConfig::from_toml_str(
//!     "driver = \"demo\"\nconn = \"/dev/ttyUSB0\"",
//! )?;
//!
//! let parts = registry.create(&config.driver, &config.params)?;
//! let (tx, _rx) = feed_channel(256);
//! let (session, _handle) = AcquisitionSession::new(
//!     MockByteSource::new(), // open_serial_async for real hardware
//!     StreamFramer::new(parts.validator, 256),
//!     parts.handler,
//!     SessionFeed::new(tx),
//!     config.limits,
//! );
//! session.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod drivers;
pub mod registry;

pub use registry::{DriverFactory, DriverInfo, DriverRegistry, ProtocolParts};
