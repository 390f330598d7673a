//! EV charger control
//!
//! [`ChargerController`] reads the charger status and runs the multi-step
//! start and stop sequences. It does not decide whether a command is
//! needed; the driver does that from a freshly fetched state.

use crate::config::DataPointsConfig;
use crate::error::{ChargeSyncError, Result};
use crate::logging::{StructuredLogger, get_logger};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::sleep;

mod status;

pub use status::ChargerObservedState;

/// Raw status and per-point write access to the charger
#[async_trait::async_trait]
pub trait DeviceTransport: Send {
    /// Full status reply; its `dps` object maps point ids to values
    async fn status(&mut self) -> Result<Value>;

    /// Write one point. `Ok(false)` means the device answered but refused.
    async fn set_value(&mut self, point: u32, value: Value) -> Result<bool>;

    fn set_timeout(&mut self, timeout: Duration);
}

pub struct ChargerController<D: DeviceTransport> {
    transport: D,
    points: DataPointsConfig,
    write_settle: Duration,
    /// Display only, never used to decide on commands
    last_observed: Option<ChargerObservedState>,
    logger: StructuredLogger,
}

impl<D: DeviceTransport> ChargerController<D> {
    pub fn new(
        mut transport: D,
        points: DataPointsConfig,
        write_settle: Duration,
        timeout: Duration,
    ) -> Self {
        transport.set_timeout(timeout);
        Self {
            transport,
            points,
            write_settle,
            last_observed: None,
            logger: get_logger("charger"),
        }
    }

    pub fn transport(&self) -> &D {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut D {
        &mut self.transport
    }

    /// Most recent successfully parsed state
    pub fn last_observed(&self) -> Option<&ChargerObservedState> {
        self.last_observed.as_ref()
    }

    /// Status read that reports failure, used for the startup probe
    pub async fn probe_status(&mut self) -> Result<ChargerObservedState> {
        let status = self.transport.status().await?;
        let state = ChargerObservedState::from_status(&status, &self.points)
            .ok_or_else(|| ChargeSyncError::device_status("Status reply has no dps object"))?;
        self.last_observed = Some(state.clone());
        Ok(state)
    }

    /// Fresh charger state, `None` if it could not be read
    pub async fn fetch_observed_state(&mut self) -> Option<ChargerObservedState> {
        match self.probe_status().await {
            Ok(state) => Some(state),
            Err(e) => {
                self.logger
                    .error(&format!("Failed to read charger status: {}", e));
                None
            }
        }
    }

    async fn write(&mut self, point: u32, value: Value) -> Result<bool> {
        self.logger
            .debug(&format!("Writing point {} = {}", point, value));
        self.transport.set_value(point, value).await
    }

    /// Write that only logs on failure
    async fn write_unchecked(&mut self, point: u32, value: Value, what: &str) {
        match self.write(point, value).await {
            Ok(true) => {}
            Ok(false) => self
                .logger
                .warn(&format!("Charger refused {} (point {})", what, point)),
            Err(e) => self.logger.warn(&format!(
                "Failed to write {} (point {}): {}",
                what, point, e
            )),
        }
    }

    /// Switch on, select "charge now", send start, set the auxiliary point.
    ///
    /// Only the switch write is checked; if it fails nothing else is sent.
    pub async fn start_charging(&mut self, current_a: u32) -> bool {
        self.logger
            .info(&format!("Starting charging at {}A", current_a));

        let switch = self.points.switch;
        match self.write(switch, json!(true)).await {
            Ok(true) => {}
            Ok(false) => {
                self.logger
                    .warn(&format!("Charger refused switch on (point {})", switch));
                return false;
            }
            Err(e) => {
                self.logger.error(&format!(
                    "Failed to switch charger on (point {}): {}",
                    switch, e
                ));
                return false;
            }
        }
        sleep(self.write_settle).await;

        let mode = self.points.mode;
        let charge_now = json!(self.points.charge_now_mode);
        self.write_unchecked(mode, charge_now, "work mode").await;
        sleep(self.write_settle).await;

        let start_stop = self.points.start_stop;
        self.write_unchecked(start_stop, json!(true), "start command")
            .await;
        sleep(self.write_settle).await;

        let aux = self.points.aux;
        let aux_value = json!(self.points.aux_active_value);
        self.write_unchecked(aux, aux_value, "auxiliary point").await;

        self.logger
            .info(&format!("Charging start sequence sent ({}A)", current_a));
        true
    }

    /// Send stop, then switch off. Only the switch write is checked.
    pub async fn stop_charging(&mut self) -> bool {
        self.logger.info("Stopping charging");

        let start_stop = self.points.start_stop;
        self.write_unchecked(start_stop, json!(false), "stop command")
            .await;
        sleep(self.write_settle).await;

        let switch = self.points.switch;
        match self.write(switch, json!(false)).await {
            Ok(true) => {
                self.logger.info("Charging stopped");
                true
            }
            Ok(false) => {
                self.logger
                    .warn(&format!("Charger refused switch off (point {})", switch));
                false
            }
            Err(e) => {
                self.logger.error(&format!(
                    "Failed to switch charger off (point {}): {}",
                    switch, e
                ));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedDevice {
        statuses: VecDeque<Result<Value>>,
        write_results: VecDeque<Result<bool>>,
        writes: Vec<(u32, Value)>,
        timeout: Option<Duration>,
    }

    #[async_trait::async_trait]
    impl DeviceTransport for ScriptedDevice {
        async fn status(&mut self) -> Result<Value> {
            self.statuses
                .pop_front()
                .unwrap_or_else(|| Err(ChargeSyncError::connection_lost("no status scripted")))
        }

        async fn set_value(&mut self, point: u32, value: Value) -> Result<bool> {
            self.writes.push((point, value));
            self.write_results.pop_front().unwrap_or(Ok(true))
        }

        fn set_timeout(&mut self, timeout: Duration) {
            self.timeout = Some(timeout);
        }
    }

    fn controller(device: ScriptedDevice) -> ChargerController<ScriptedDevice> {
        ChargerController::new(
            device,
            DataPointsConfig::default(),
            Duration::ZERO,
            Duration::from_secs(15),
        )
    }

    #[test]
    fn test_new_applies_timeout() {
        let c = controller(ScriptedDevice::default());
        assert_eq!(c.transport().timeout, Some(Duration::from_secs(15)));
    }

    #[tokio::test]
    async fn test_start_sequence_order() {
        let mut c = controller(ScriptedDevice::default());
        assert!(c.start_charging(16).await);
        assert_eq!(
            c.transport().writes,
            vec![
                (18, json!(true)),
                (14, json!("charge_now")),
                (123, json!(true)),
                (10, json!(1)),
            ]
        );
    }

    #[tokio::test]
    async fn test_start_aborts_when_switch_refused() {
        let mut device = ScriptedDevice::default();
        device.write_results.push_back(Ok(false));
        let mut c = controller(device);

        assert!(!c.start_charging(16).await);
        assert_eq!(c.transport().writes.len(), 1);
    }

    #[tokio::test]
    async fn test_start_aborts_when_switch_errors() {
        let mut device = ScriptedDevice::default();
        device
            .write_results
            .push_back(Err(ChargeSyncError::connection_lost("refused")));
        let mut c = controller(device);

        assert!(!c.start_charging(16).await);
        assert_eq!(c.transport().writes.len(), 1);
    }

    #[tokio::test]
    async fn test_start_ignores_later_failures() {
        let mut device = ScriptedDevice::default();
        device.write_results.extend([
            Ok(true),
            Ok(false),
            Err(ChargeSyncError::frame("garbled")),
            Ok(false),
        ]);
        let mut c = controller(device);

        assert!(c.start_charging(16).await);
        assert_eq!(c.transport().writes.len(), 4);
    }

    #[tokio::test]
    async fn test_stop_sequence_depends_on_switch_only() {
        let mut device = ScriptedDevice::default();
        device
            .write_results
            .extend([Err(ChargeSyncError::frame("x")), Ok(true)]);
        let mut c = controller(device);
        assert!(c.stop_charging().await);
        assert_eq!(
            c.transport().writes,
            vec![(123, json!(false)), (18, json!(false))]
        );

        let mut device = ScriptedDevice::default();
        device.write_results.extend([Ok(true), Ok(false)]);
        let mut c = controller(device);
        assert!(!c.stop_charging().await);
    }

    #[tokio::test]
    async fn test_fetch_observed_state_swallows_errors() {
        let mut device = ScriptedDevice::default();
        device
            .statuses
            .push_back(Err(ChargeSyncError::connection_lost("timeout")));
        device.statuses.push_back(Ok(json!({"devId": "x"})));
        device
            .statuses
            .push_back(Ok(json!({"dps": {"101": "finish", "18": false}})));
        let mut c = controller(device);

        assert!(c.fetch_observed_state().await.is_none());
        assert!(c.fetch_observed_state().await.is_none());
        assert!(c.last_observed().is_none());

        let state = c.fetch_observed_state().await.unwrap();
        assert_eq!(state.is_charging(), Some(false));
        assert_eq!(c.last_observed(), Some(&state));
    }

    #[tokio::test]
    async fn test_probe_status_reports_errors() {
        let mut c = controller(ScriptedDevice::default());
        assert!(c.probe_status().await.is_err());
    }
}
