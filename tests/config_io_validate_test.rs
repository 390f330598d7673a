use chargesync::backoff::BackoffStrategy;
use chargesync::config::{Config, TelemetryTransportKind};
use std::fs;
use std::time::Duration;

fn provisioned() -> Config {
    let mut cfg = Config::default();
    cfg.inverter.ip = "192.168.1.50".to_string();
    cfg.inverter.logger_serial = 2_712_345_678;
    cfg.charger.ip = "192.168.1.60".to_string();
    cfg.charger.device_id = "bf1234567890abcdef".to_string();
    cfg.charger.local_key = "0123456789abcdef".to_string();
    cfg
}

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = provisioned();
    cfg.inverter.transport = TelemetryTransportKind::ModbusTcp;
    cfg.retry.backoff = BackoffStrategy::Exponential;
    cfg.logging.file = path.with_extension("log").to_string_lossy().to_string();

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.inverter.ip, "192.168.1.50");
    assert_eq!(loaded.inverter.transport, TelemetryTransportKind::ModbusTcp);
    assert_eq!(loaded.retry.backoff, BackoffStrategy::Exponential);
    assert_eq!(loaded.charger.local_key, cfg.charger.local_key);
    assert_eq!(loaded.logging.file, cfg.logging.file);
    assert!(loaded.validate().is_ok());
}

#[test]
fn yaml_uses_snake_case_enums() {
    let yaml = "inverter:\n  transport: modbus_tcp\nretry:\n  backoff: exponential\n";
    let cfg: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(cfg.inverter.transport, TelemetryTransportKind::ModbusTcp);
    assert_eq!(cfg.retry.backoff, BackoffStrategy::Exponential);
}

#[test]
fn config_validation_errors() {
    let mut cfg = provisioned();
    assert!(cfg.validate().is_ok());

    // Missing logger serial for Solarman
    cfg.inverter.logger_serial = 0;
    assert!(cfg.validate().is_err());

    cfg = provisioned();
    cfg.charger.local_key = "your_local_key_here".to_string();
    assert!(cfg.validate().is_err());

    cfg = provisioned();
    cfg.control.soc_threshold_pct = 101.0;
    assert!(cfg.validate().is_err());

    cfg = provisioned();
    cfg.control.grid_import_threshold_w = 0.0;
    assert!(cfg.validate().is_err());

    cfg = provisioned();
    cfg.control.charging_current_a = 0;
    assert!(cfg.validate().is_err());

    cfg = provisioned();
    cfg.control.check_interval_sec = 0;
    assert!(cfg.validate().is_err());

    cfg = provisioned();
    cfg.retry.max_attempts = 0;
    assert!(cfg.validate().is_err());

    cfg = provisioned();
    cfg.inverter.registers.block_len = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn validation_errors_are_fatal() {
    let mut cfg = provisioned();
    cfg.charger.device_id.clear();
    let err = cfg.validate().unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("charger.device_id"));
}

#[test]
fn thresholds_follow_retry_section() {
    let mut cfg = provisioned();
    cfg.retry.max_attempts = 2;
    cfg.retry.retry_delay_sec = 0.25;
    cfg.retry.backoff = BackoffStrategy::Exponential;
    cfg.retry.connection_timeout_sec = 3;

    let t = cfg.thresholds();
    assert_eq!(t.retry.max_attempts, 2);
    assert_eq!(t.retry.delay, Duration::from_millis(250));
    assert_eq!(t.retry.delay_after(2), Duration::from_millis(500));
    assert_eq!(t.connection_timeout, Duration::from_secs(3));
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), b"bad: [unclosed").unwrap();
    let err = Config::from_file(tmp.path()).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("Serialization error"));
}

#[test]
fn from_missing_file_is_io_error() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let err = Config::from_file(tmp_dir.path().join("absent.yaml")).unwrap_err();
    assert!(err.to_string().contains("I/O error"));
}
