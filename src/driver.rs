//! Core driver logic for chargesync
//!
//! [`ChargeDriver`] owns the telemetry reader and the charger controller and
//! runs the control loop: read, decide, reconcile with the charger, act,
//! verify, sleep. Only startup failures end the loop; everything else is
//! contained within one iteration.

use crate::charger::{ChargerController, DeviceTransport};
use crate::config::Config;
use crate::controls::Thresholds;
use crate::logging::{StructuredLogger, get_logger};
use crate::telemetry::{TelemetryReader, TelemetryTransport};
use std::time::Duration;
use tokio::sync::watch;

mod runtime;
mod types;


pub use types::{DriverState, IterationOutcome};

/// Main driver for chargesync
pub struct ChargeDriver<T: TelemetryTransport, D: DeviceTransport> {
    thresholds: Thresholds,

    /// Inverter side, owns the telemetry connection
    reader: TelemetryReader<T>,

    /// Charger side, owns the device transport
    charger: ChargerController<D>,

    /// Pause before the post-command verification read
    verify_settle: Duration,

    /// Current driver state
    state: watch::Sender<DriverState>,

    /// Number of the iteration in progress (1-based, 0 before the first)
    iteration: u64,

    logger: StructuredLogger,
}

impl<T: TelemetryTransport, D: DeviceTransport> ChargeDriver<T, D> {
    pub fn new(
        thresholds: Thresholds,
        reader: TelemetryReader<T>,
        charger: ChargerController<D>,
        verify_settle: Duration,
    ) -> Self {
        let (state, _) = watch::channel(DriverState::Init);
        Self {
            thresholds,
            reader,
            charger,
            verify_settle,
            state,
            iteration: 0,
            logger: get_logger("driver"),
        }
    }

    /// Wire both transports according to a validated configuration
    pub fn from_config(config: &Config, telemetry: T, device: D) -> Self {
        let thresholds = config.thresholds();
        let reader = TelemetryReader::new(
            telemetry,
            config.inverter.registers.clone(),
            thresholds.retry,
        );
        let charger = ChargerController::new(
            device,
            config.points.clone(),
            Duration::from_millis(config.control.write_settle_ms),
            thresholds.connection_timeout,
        );
        Self::new(
            thresholds,
            reader,
            charger,
            Duration::from_millis(config.control.verify_settle_ms),
        )
    }

    /// Watch driver state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<DriverState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> DriverState {
        *self.state.borrow()
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn reader(&self) -> &TelemetryReader<T> {
        &self.reader
    }

    pub fn charger(&self) -> &ChargerController<D> {
        &self.charger
    }

    fn set_state(&self, state: DriverState) {
        self.state.send_replace(state);
    }
}
