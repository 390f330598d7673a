use super::*;

impl Default for InverterConfig {
    fn default() -> Self {
        Self {
            transport: TelemetryTransportKind::Solarman,
            ip: String::new(),
            port: 8899,
            logger_serial: 0,
            slave_id: 1,
            registers: InverterRegisters::default(),
        }
    }
}

impl Default for InverterRegisters {
    fn default() -> Self {
        // 169 = grid active power (W, signed), 184 = battery SOC (%)
        Self {
            block_start: 169,
            block_len: 22,
            grid_power_offset: 0,
            soc_offset: 15,
        }
    }
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            ip: String::new(),
            port: 6668,
            device_id: String::new(),
            local_key: String::new(),
            protocol_version: "3.3".to_string(),
        }
    }
}

impl Default for DataPointsConfig {
    fn default() -> Self {
        Self {
            switch: 18,
            mode: 14,
            charge_now_mode: "charge_now".to_string(),
            start_stop: 123,
            aux: 10,
            aux_active_value: 1,
            charge_status: 101,
            work_state: 3,
            energy: 102,
            current: 114,
            max_current: 115,
            charging_time: 120,
            mode_status: 124,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            soc_threshold_pct: 90.0,
            grid_import_threshold_w: 250.0,
            charging_current_a: 16,
            check_interval_sec: 120,
            write_settle_ms: 500,
            verify_settle_ms: 2000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay_sec: 1.0,
            backoff: BackoffStrategy::Fixed,
            connection_timeout_sec: 15,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/chargesync.log".to_string(),
            file_output: false,
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inverter: InverterConfig::default(),
            charger: ChargerConfig::default(),
            points: DataPointsConfig::default(),
            control: ControlConfig::default(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
