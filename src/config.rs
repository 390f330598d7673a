//! Configuration management for chargesync
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files with support for environment variable overrides.
//! The variable names match the `.env` files of existing deployments.

use crate::backoff::{BackoffStrategy, RetryPolicy};
use crate::controls::Thresholds;
use crate::error::{ChargeSyncError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

mod defaults;

/// Placeholder values shipped in example `.env` files
const PLACEHOLDER_DEVICE_ID: &str = "your_device_id_here";
const PLACEHOLDER_LOCAL_KEY: &str = "your_local_key_here";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Battery inverter telemetry link
    pub inverter: InverterConfig,

    /// EV charger device link
    pub charger: ChargerConfig,

    /// Charger data point identifiers
    pub points: DataPointsConfig,

    /// Decision thresholds and loop timing
    pub control: ControlConfig,

    /// Retry and timeout policy for transport calls
    pub retry: RetryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Which wire protocol reaches the inverter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryTransportKind {
    /// Solarman V5 data logger (Modbus RTU tunnelled over TCP)
    Solarman,
    /// Plain Modbus TCP gateway
    ModbusTcp,
}

impl FromStr for TelemetryTransportKind {
    type Err = ChargeSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "solarman" | "solarman_v5" => Ok(Self::Solarman),
            "modbus_tcp" | "modbus-tcp" | "modbus" => Ok(Self::ModbusTcp),
            other => Err(ChargeSyncError::validation(
                "inverter.transport",
                format!("unknown transport '{}'", other),
            )),
        }
    }
}

/// Inverter connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InverterConfig {
    /// Transport used for register reads
    pub transport: TelemetryTransportKind,

    /// IP address of the data logger or gateway
    pub ip: String,

    /// TCP port (8899 for Solarman loggers, 502 for Modbus TCP)
    pub port: u16,

    /// Data logger serial number (Solarman only)
    pub logger_serial: u32,

    /// Modbus slave id of the inverter
    pub slave_id: u8,

    /// Register block layout
    pub registers: InverterRegisters,
}

/// Contiguous holding register block covering grid power and SOC
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InverterRegisters {
    /// First register of the block
    pub block_start: u16,

    /// Number of registers in the block
    pub block_len: u16,

    /// Offset of the signed grid power register within the block
    pub grid_power_offset: u16,

    /// Offset of the battery SOC register within the block
    pub soc_offset: u16,
}

/// Charger connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargerConfig {
    /// IP address of the charger
    pub ip: String,

    /// TCP port of the local device protocol
    pub port: u16,

    /// Device id
    pub device_id: String,

    /// Local key used for payload encryption
    pub local_key: String,

    /// Local protocol version
    pub protocol_version: String,
}

/// Charger data point identifiers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPointsConfig {
    /// Main switch point
    pub switch: u32,

    /// Work mode point
    pub mode: u32,

    /// Work mode value meaning "charge now"
    pub charge_now_mode: String,

    /// Start/stop command point
    pub start_stop: u32,

    /// Auxiliary point set during start
    pub aux: u32,

    /// Value written to the auxiliary point during start
    pub aux_active_value: i64,

    /// Vendor charge status string point
    pub charge_status: u32,

    /// Work state point
    pub work_state: u32,

    /// Session energy point (Wh)
    pub energy: u32,

    /// Charging current point
    pub current: u32,

    /// Maximum current point
    pub max_current: u32,

    /// Charging time point
    pub charging_time: u32,

    /// Charge mode status point
    pub mode_status: u32,
}

/// Decision thresholds and loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Minimum battery SOC (%) required to charge
    pub soc_threshold_pct: f64,

    /// Grid import (W) at or above which charging stops
    pub grid_import_threshold_w: f64,

    /// Charging current requested on start (A)
    pub charging_current_a: u32,

    /// Pause between loop iterations (s)
    pub check_interval_sec: u64,

    /// Pause between the writes of a command sequence (ms)
    pub write_settle_ms: u64,

    /// Pause before the post-command verification read (ms)
    pub verify_settle_ms: u64,
}

/// Retry and timeout policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total tries per telemetry read
    pub max_attempts: u32,

    /// Delay between tries (s)
    pub retry_delay_sec: f64,

    /// Delay growth between tries
    pub backoff: BackoffStrategy,

    /// Socket timeout for every transport call (s)
    pub connection_timeout_sec: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file (its directory receives daily rotated files)
    pub file: String,

    /// Whether to write rotated log files
    pub file_output: bool,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl RetryConfig {
    /// Retry policy for telemetry reads
    pub fn policy(&self) -> RetryPolicy {
        let delay = Duration::try_from_secs_f64(self.retry_delay_sec).unwrap_or(Duration::ZERO);
        match self.backoff {
            BackoffStrategy::Fixed => RetryPolicy::fixed(self.max_attempts, delay),
            BackoffStrategy::Exponential => RetryPolicy::exponential(self.max_attempts, delay),
        }
    }

    /// Socket timeout for transport calls
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_sec)
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first existing default location, then
    /// apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::locate() {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn locate() -> Option<String> {
        if let Ok(path) = std::env::var("CHARGESYNC_CONFIG")
            && !path.is_empty()
        {
            return Some(path);
        }

        let default_paths = ["chargesync.yaml", "/etc/chargesync/config.yaml"];
        default_paths
            .iter()
            .find(|p| Path::new(p).exists())
            .map(|p| (*p).to_string())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("INVERTER_TRANSPORT") {
            self.inverter.transport = v.parse()?;
        }
        if let Some(v) = get("LOGGER_IP") {
            self.inverter.ip = v;
        }
        if let Some(v) = get("LOGGER_SN") {
            self.inverter.logger_serial = parse_var("LOGGER_SN", &v)?;
        }
        if let Some(v) = get("LOGGER_PORT") {
            self.inverter.port = parse_var("LOGGER_PORT", &v)?;
        }
        if let Some(v) = get("MB_SLAVE_ID") {
            self.inverter.slave_id = parse_var("MB_SLAVE_ID", &v)?;
        }

        if let Some(v) = get("FEYREE_IP") {
            self.charger.ip = v;
        }
        if let Some(v) = get("FEYREE_DEVICE_ID") {
            self.charger.device_id = v;
        }
        if let Some(v) = get("FEYREE_LOCAL_KEY") {
            self.charger.local_key = v;
        }
        if let Some(v) = get("FEYREE_VERSION") {
            self.charger.protocol_version = v;
        }

        if let Some(v) = get("FEYREE_SWITCH_DPS") {
            self.points.switch = parse_var("FEYREE_SWITCH_DPS", &v)?;
        }
        if let Some(v) = get("FEYREE_MODE_DPS") {
            self.points.mode = parse_var("FEYREE_MODE_DPS", &v)?;
        }
        if let Some(v) = get("FEYREE_CHARGE_NOW_MODE") {
            self.points.charge_now_mode = v;
        }
        if let Some(v) = get("FEYREE_START_STOP_DPS") {
            self.points.start_stop = parse_var("FEYREE_START_STOP_DPS", &v)?;
        }
        if let Some(v) = get("FEYREE_AUX_DPS") {
            self.points.aux = parse_var("FEYREE_AUX_DPS", &v)?;
        }

        if let Some(v) = get("SOC_THRESHOLD") {
            self.control.soc_threshold_pct = parse_var("SOC_THRESHOLD", &v)?;
        }
        if let Some(v) = get("GRID_IMPORT_THRESHOLD") {
            self.control.grid_import_threshold_w = parse_var("GRID_IMPORT_THRESHOLD", &v)?;
        }
        if let Some(v) = get("CHARGING_CURRENT_A") {
            self.control.charging_current_a = parse_var("CHARGING_CURRENT_A", &v)?;
        }
        if let Some(v) = get("CHECK_INTERVAL_SEC") {
            self.control.check_interval_sec = parse_var("CHECK_INTERVAL_SEC", &v)?;
        }

        if let Some(v) = get("MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_var("MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("RETRY_DELAY_SEC") {
            self.retry.retry_delay_sec = parse_var("RETRY_DELAY_SEC", &v)?;
        }
        if let Some(v) = get("CONNECTION_TIMEOUT_SEC") {
            self.retry.connection_timeout_sec = parse_var("CONNECTION_TIMEOUT_SEC", &v)?;
        }

        if let Some(v) = get("LOG_LEVEL") {
            self.logging.level = v;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Inverter link
        if self.inverter.ip.trim().is_empty() {
            return Err(ChargeSyncError::validation(
                "inverter.ip",
                "IP address cannot be empty",
            ));
        }
        if self.inverter.port == 0 {
            return Err(ChargeSyncError::validation(
                "inverter.port",
                "Port must be greater than 0",
            ));
        }
        if self.inverter.transport == TelemetryTransportKind::Solarman
            && self.inverter.logger_serial == 0
        {
            return Err(ChargeSyncError::validation(
                "inverter.logger_serial",
                "Logger serial is required for the Solarman transport",
            ));
        }

        let regs = &self.inverter.registers;
        if regs.block_len == 0 {
            return Err(ChargeSyncError::validation(
                "inverter.registers.block_len",
                "Must be greater than 0",
            ));
        }
        if regs.grid_power_offset >= regs.block_len {
            return Err(ChargeSyncError::validation(
                "inverter.registers.grid_power_offset",
                "Offset lies outside the register block",
            ));
        }
        if regs.soc_offset >= regs.block_len {
            return Err(ChargeSyncError::validation(
                "inverter.registers.soc_offset",
                "Offset lies outside the register block",
            ));
        }

        // Charger credentials
        if self.charger.ip.trim().is_empty() {
            return Err(ChargeSyncError::validation(
                "charger.ip",
                "IP address cannot be empty",
            ));
        }
        let device_id = self.charger.device_id.trim();
        if device_id.is_empty() || device_id == PLACEHOLDER_DEVICE_ID {
            return Err(ChargeSyncError::validation(
                "charger.device_id",
                "Device id is not configured (set FEYREE_DEVICE_ID)",
            ));
        }
        let local_key = self.charger.local_key.as_str();
        if local_key.trim().is_empty() || local_key == PLACEHOLDER_LOCAL_KEY {
            return Err(ChargeSyncError::validation(
                "charger.local_key",
                "Local key is not configured (set FEYREE_LOCAL_KEY)",
            ));
        }
        if local_key.len() != 16 {
            return Err(ChargeSyncError::validation(
                "charger.local_key",
                "Local key must be exactly 16 bytes",
            ));
        }
        if self.charger.protocol_version.trim() != "3.3" {
            return Err(ChargeSyncError::validation(
                "charger.protocol_version",
                format!(
                    "Unsupported protocol version '{}' (only 3.3 is supported)",
                    self.charger.protocol_version
                ),
            ));
        }

        // Thresholds
        if !(0.0..=100.0).contains(&self.control.soc_threshold_pct) {
            return Err(ChargeSyncError::validation(
                "control.soc_threshold_pct",
                "Must be between 0 and 100",
            ));
        }
        let grid_threshold = self.control.grid_import_threshold_w;
        if !grid_threshold.is_finite() || grid_threshold <= 0.0 {
            return Err(ChargeSyncError::validation(
                "control.grid_import_threshold_w",
                "Must be a positive number",
            ));
        }
        if self.control.charging_current_a == 0 {
            return Err(ChargeSyncError::validation(
                "control.charging_current_a",
                "Must be greater than 0",
            ));
        }
        if self.control.check_interval_sec == 0 {
            return Err(ChargeSyncError::validation(
                "control.check_interval_sec",
                "Must be greater than 0",
            ));
        }

        // Retry policy
        if self.retry.max_attempts == 0 {
            return Err(ChargeSyncError::validation(
                "retry.max_attempts",
                "Must be greater than 0",
            ));
        }
        if !self.retry.retry_delay_sec.is_finite() || self.retry.retry_delay_sec < 0.0 {
            return Err(ChargeSyncError::validation(
                "retry.retry_delay_sec",
                "Must be a non-negative number",
            ));
        }
        if self.retry.connection_timeout_sec == 0 {
            return Err(ChargeSyncError::validation(
                "retry.connection_timeout_sec",
                "Must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Immutable thresholds consumed by the control loop
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            soc_threshold_pct: self.control.soc_threshold_pct,
            grid_import_threshold_w: self.control.grid_import_threshold_w,
            charging_current_a: self.control.charging_current_a,
            check_interval: Duration::from_secs(self.control.check_interval_sec),
            retry: self.retry.policy(),
            connection_timeout: self.retry.connection_timeout(),
        }
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ChargeSyncError::validation(name, format!("invalid value '{}': {}", raw, e)))
}
