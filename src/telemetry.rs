//! Inverter telemetry: transport seam, retrying reader and the decoded snapshot

use crate::backoff::RetryPolicy;
use crate::config::InverterRegisters;
use crate::error::{ChargeSyncError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::modbus::as_signed16;
use std::fmt;
use tokio::time::sleep;

/// Raw register access to the inverter
#[async_trait::async_trait]
pub trait TelemetryTransport: Send {
    /// Open the connection. Opening an already open transport replaces the socket.
    async fn connect(&mut self) -> Result<()>;

    /// Read `count` holding registers starting at `start`.
    ///
    /// Fails with a connection-lost transport error when the socket is gone
    /// and with a frame error for malformed or short responses.
    async fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>>;

    async fn disconnect(&mut self) -> Result<()>;

    /// Human readable target, for logs
    fn endpoint(&self) -> String {
        "inverter".to_string()
    }
}

/// Direction of the instantaneous grid power flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridDirection {
    Import,
    Export,
    Idle,
}

impl GridDirection {
    /// Half-width of the idle band around zero, in watts
    pub const DEAD_BAND_W: f64 = 10.0;

    pub fn classify(grid_power_w: f64) -> Self {
        if grid_power_w > Self::DEAD_BAND_W {
            GridDirection::Import
        } else if grid_power_w < -Self::DEAD_BAND_W {
            GridDirection::Export
        } else {
            GridDirection::Idle
        }
    }
}

impl fmt::Display for GridDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridDirection::Import => write!(f, "import"),
            GridDirection::Export => write!(f, "export"),
            GridDirection::Idle => write!(f, "idle"),
        }
    }
}

/// Battery and grid state read in one poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemSnapshot {
    battery_soc_pct: f64,
    grid_power_w: f64,
    grid_direction: GridDirection,
}

impl SystemSnapshot {
    /// Direction is derived from the grid power, never supplied
    pub fn new(battery_soc_pct: f64, grid_power_w: f64) -> Self {
        Self {
            battery_soc_pct,
            grid_power_w,
            grid_direction: GridDirection::classify(grid_power_w),
        }
    }

    /// Decode a register block read according to `layout`
    pub fn from_registers(words: &[u16], layout: &InverterRegisters) -> Result<Self> {
        if words.len() != layout.block_len as usize {
            return Err(ChargeSyncError::frame(format!(
                "Expected {} registers, got {}",
                layout.block_len,
                words.len()
            )));
        }
        let grid = words
            .get(layout.grid_power_offset as usize)
            .copied()
            .ok_or_else(|| ChargeSyncError::frame("Grid power offset outside register block"))?;
        let soc = words
            .get(layout.soc_offset as usize)
            .copied()
            .ok_or_else(|| ChargeSyncError::frame("SOC offset outside register block"))?;

        Ok(Self::new(soc as f64, as_signed16(grid) as f64))
    }

    pub fn battery_soc_pct(&self) -> f64 {
        self.battery_soc_pct
    }

    /// Signed watts, positive means import
    pub fn grid_power_w(&self) -> f64 {
        self.grid_power_w
    }

    pub fn grid_direction(&self) -> GridDirection {
        self.grid_direction
    }
}

impl fmt::Display for SystemSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "soc={:.0}% grid={:.0}W ({})",
            self.battery_soc_pct, self.grid_power_w, self.grid_direction
        )
    }
}

/// Retrying, reconnecting reader on top of a [`TelemetryTransport`]
pub struct TelemetryReader<T: TelemetryTransport> {
    transport: T,
    layout: InverterRegisters,
    policy: RetryPolicy,
    logger: StructuredLogger,
}

impl<T: TelemetryTransport> TelemetryReader<T> {
    pub fn new(transport: T, layout: InverterRegisters, policy: RetryPolicy) -> Self {
        Self {
            transport,
            layout,
            policy,
            logger: get_logger("telemetry"),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Open the transport connection
    pub async fn connect(&mut self) -> Result<()> {
        self.logger
            .info(&format!("Connecting to {}", self.transport.endpoint()));
        self.transport.connect().await
    }

    /// Read and decode the register block, retrying per the policy.
    ///
    /// Connection-lost failures reconnect before the next try; frame errors
    /// only wait. After the last try the last error is returned. Errors that
    /// are not transport errors are returned at once.
    pub async fn read_snapshot(&mut self) -> Result<SystemSnapshot> {
        let mut attempt = 1;
        loop {
            match self.read_once().await {
                Ok(snapshot) => {
                    if attempt > 1 {
                        self.logger
                            .info(&format!("Telemetry read succeeded on attempt {}", attempt));
                    }
                    return Ok(snapshot);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if !self.policy.has_next(attempt) {
                        self.logger.error(&format!(
                            "Telemetry read failed after {} attempts: {}",
                            attempt, e
                        ));
                        return Err(e);
                    }
                    self.logger.warn(&format!(
                        "Telemetry read attempt {}/{} failed: {}",
                        attempt, self.policy.max_attempts, e
                    ));
                    if e.is_connection_lost() {
                        // Reconnect failures surface again on the next read
                        if let Err(re) = self.reconnect().await {
                            self.logger.warn(&format!("Reconnect failed: {}", re));
                        }
                    }
                    sleep(self.policy.delay_after(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn read_once(&mut self) -> Result<SystemSnapshot> {
        let words = self
            .transport
            .read_holding_registers(self.layout.block_start, self.layout.block_len)
            .await?;
        SystemSnapshot::from_registers(&words, &self.layout)
    }

    /// Tear down and reopen the connection. Close failures are only logged.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.logger
            .info(&format!("Reconnecting to {}", self.transport.endpoint()));
        if let Err(e) = self.transport.disconnect().await {
            self.logger
                .warn(&format!("Ignoring error while closing connection: {}", e));
        }
        self.transport.connect().await
    }

    /// Best-effort close
    pub async fn disconnect(&mut self) {
        if let Err(e) = self.transport.disconnect().await {
            self.logger.warn(&format!("Disconnect failed: {}", e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedTransport {
        reads: VecDeque<Result<Vec<u16>>>,
        read_calls: u32,
        connects: u32,
        disconnects: u32,
        fail_disconnect: bool,
    }

    #[async_trait::async_trait]
    impl TelemetryTransport for ScriptedTransport {
        async fn connect(&mut self) -> Result<()> {
            self.connects += 1;
            Ok(())
        }

        async fn read_holding_registers(&mut self, _start: u16, _count: u16) -> Result<Vec<u16>> {
            self.read_calls += 1;
            self.reads
                .pop_front()
                .unwrap_or_else(|| Err(ChargeSyncError::frame("script exhausted")))
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.disconnects += 1;
            if self.fail_disconnect {
                return Err(ChargeSyncError::io("already closed"));
            }
            Ok(())
        }
    }

    fn layout() -> InverterRegisters {
        InverterRegisters {
            block_start: 169,
            block_len: 4,
            grid_power_offset: 0,
            soc_offset: 3,
        }
    }

    fn block(grid: u16, soc: u16) -> Vec<u16> {
        vec![grid, 0, 0, soc]
    }

    #[test]
    fn test_grid_direction_dead_band() {
        assert_eq!(GridDirection::classify(5.0), GridDirection::Idle);
        assert_eq!(GridDirection::classify(10.0), GridDirection::Idle);
        assert_eq!(GridDirection::classify(-10.0), GridDirection::Idle);
        assert_eq!(GridDirection::classify(11.0), GridDirection::Import);
        assert_eq!(GridDirection::classify(-15.0), GridDirection::Export);
    }

    #[test]
    fn test_snapshot_from_registers_signed_grid() {
        let snap = SystemSnapshot::from_registers(&block(0xFFCE, 93), &layout()).unwrap();
        assert_eq!(snap.grid_power_w(), -50.0);
        assert_eq!(snap.battery_soc_pct(), 93.0);
        assert_eq!(snap.grid_direction(), GridDirection::Export);
    }

    #[test]
    fn test_snapshot_length_mismatch_is_frame_error() {
        let err = SystemSnapshot::from_registers(&[1, 2], &layout()).unwrap_err();
        assert!(!err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_read_snapshot_first_try() {
        let mut transport = ScriptedTransport::default();
        transport.reads.push_back(Ok(block(300, 95)));
        let mut reader = TelemetryReader::new(transport, layout(), RetryPolicy::immediate(5));

        let snap = reader.read_snapshot().await.unwrap();
        assert_eq!(snap.grid_direction(), GridDirection::Import);
        assert_eq!(reader.transport().read_calls, 1);
        assert_eq!(reader.transport().connects, 0);
    }

    #[tokio::test]
    async fn test_connection_lost_triggers_reconnect() {
        let mut transport = ScriptedTransport {
            fail_disconnect: true,
            ..ScriptedTransport::default()
        };
        transport
            .reads
            .push_back(Err(ChargeSyncError::connection_lost("reset")));
        transport.reads.push_back(Ok(block(5, 50)));
        let mut reader = TelemetryReader::new(transport, layout(), RetryPolicy::immediate(5));

        let snap = reader.read_snapshot().await.unwrap();
        assert_eq!(snap.grid_direction(), GridDirection::Idle);
        assert_eq!(reader.transport().read_calls, 2);
        assert_eq!(reader.transport().disconnects, 1);
        assert_eq!(reader.transport().connects, 1);
    }

    #[tokio::test]
    async fn test_frame_error_does_not_reconnect() {
        let mut transport = ScriptedTransport::default();
        transport.reads.push_back(Ok(vec![1, 2]));
        transport
            .reads
            .push_back(Err(ChargeSyncError::frame("bad crc")));
        transport.reads.push_back(Ok(block(0, 80)));
        let mut reader = TelemetryReader::new(transport, layout(), RetryPolicy::immediate(5));

        reader.read_snapshot().await.unwrap();
        assert_eq!(reader.transport().read_calls, 3);
        assert_eq!(reader.transport().connects, 0);
        assert_eq!(reader.transport().disconnects, 0);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let mut transport = ScriptedTransport::default();
        for i in 0..3 {
            transport
                .reads
                .push_back(Err(ChargeSyncError::frame(format!("failure {}", i))));
        }
        let mut reader = TelemetryReader::new(transport, layout(), RetryPolicy::immediate(3));

        let err = reader.read_snapshot().await.unwrap_err();
        assert!(err.to_string().contains("failure 2"));
        assert_eq!(reader.transport().read_calls, 3);
    }

    #[tokio::test]
    async fn test_unexpected_error_is_not_retried() {
        let mut transport = ScriptedTransport::default();
        transport
            .reads
            .push_back(Err(ChargeSyncError::io("bug")));
        let mut reader = TelemetryReader::new(transport, layout(), RetryPolicy::immediate(5));

        let err = reader.read_snapshot().await.unwrap_err();
        assert!(matches!(err, ChargeSyncError::Io { .. }));
        assert_eq!(reader.transport().read_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_waits_between_attempts_only() {
        let mut transport = ScriptedTransport::default();
        for _ in 0..4 {
            transport
                .reads
                .push_back(Err(ChargeSyncError::connection_lost("down")));
        }
        let policy = RetryPolicy::fixed(4, std::time::Duration::from_secs(1));
        let mut reader = TelemetryReader::new(transport, layout(), policy);

        let started = tokio::time::Instant::now();
        assert!(reader.read_snapshot().await.is_err());
        assert_eq!(started.elapsed(), std::time::Duration::from_secs(3));
        // No reconnect after the final failure
        assert_eq!(reader.transport().connects, 3);
    }
}
