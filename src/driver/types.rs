use crate::controls::{CommandAction, DecisionVerdict};
use std::fmt;

/// Lifecycle of the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Components constructed, nothing contacted yet
    Init,
    /// Probing inverter and charger once before the loop
    ConnectivityCheck,
    /// Control loop, iteration in progress or sleeping after it
    Running { iteration: u64 },
    /// Cancellation received, closing connections
    ShuttingDown,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverState::Init => write!(f, "init"),
            DriverState::ConnectivityCheck => write!(f, "connectivity-check"),
            DriverState::Running { iteration } => write!(f, "running (iteration {})", iteration),
            DriverState::ShuttingDown => write!(f, "shutting-down"),
        }
    }
}

/// How one iteration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Telemetry read failed after all retries; nothing decided
    TelemetryUnavailable,
    /// Charger status could not be read; no command sent
    StatusUnavailable,
    /// Charger already matches the verdict, or its state is unknown
    NoAction { verdict: DecisionVerdict },
    /// A start or stop sequence was sent
    Commanded {
        action: CommandAction,
        accepted: bool,
    },
    /// Unexpected error inside the iteration
    Failed,
}
