//! # chargesync - EV charger follows the home battery
//!
//! Keeps an EV charger's ON/OFF state in step with a battery inverter's
//! state of charge and grid power flow. Every interval the driver reads the
//! inverter, decides whether charging is allowed, compares that with what the
//! charger reports and sends a start or stop sequence only when they differ.
//!
//! ## Architecture
//!
//! - `config`: YAML configuration, environment overrides and validation
//! - `logging`: Structured logging and tracing
//! - `backoff`: Retry policy for transport reads
//! - `telemetry`: Inverter transport seam and retrying snapshot reader
//! - `modbus`: Modbus RTU helpers and the Modbus TCP telemetry transport
//! - `solarman`: Solarman V5 data logger telemetry transport
//! - `controls`: Charging decision logic
//! - `charger`: Charger transport seam, status parsing and command sequences
//! - `tuya`: Tuya local protocol 3.3 charger transport
//! - `driver`: Control loop state machine

pub mod backoff;
pub mod charger;
pub mod config;
pub mod controls;
pub mod driver;
pub mod error;
pub mod logging;
pub mod modbus;
pub mod solarman;
pub mod telemetry;
pub mod tuya;

// Re-export commonly used types
pub use config::Config;
pub use driver::ChargeDriver;
pub use error::{ChargeSyncError, Result};
