//! Charging decision logic
//!
//! Pure functions only: a snapshot and the thresholds go in, a verdict comes
//! out. Whether a command is sent also depends on what the charger reports.

use crate::backoff::RetryPolicy;
use crate::telemetry::{GridDirection, SystemSnapshot};
use std::fmt;
use std::time::Duration;

/// Immutable control parameters, fixed at startup
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    /// Minimum SOC (%) at which charging is allowed, inclusive
    pub soc_threshold_pct: f64,
    /// Grid import (W) at which charging is no longer allowed
    pub grid_import_threshold_w: f64,
    pub charging_current_a: u32,
    pub check_interval: Duration,
    pub retry: RetryPolicy,
    pub connection_timeout: Duration,
}

/// Charge or not
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionVerdict {
    ShouldCharge,
    ShouldNotCharge,
}

impl DecisionVerdict {
    pub fn wants_charging(self) -> bool {
        matches!(self, DecisionVerdict::ShouldCharge)
    }
}

impl fmt::Display for DecisionVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionVerdict::ShouldCharge => write!(f, "should charge"),
            DecisionVerdict::ShouldNotCharge => write!(f, "should not charge"),
        }
    }
}

/// Verdict together with the conditions that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub verdict: DecisionVerdict,
    pub soc_ok: bool,
    pub grid_ok: bool,
}

/// Evaluate both conditions for a snapshot
pub fn evaluate(snapshot: &SystemSnapshot, thresholds: &Thresholds) -> Decision {
    let soc_ok = snapshot.battery_soc_pct() >= thresholds.soc_threshold_pct;
    let grid_ok = snapshot.grid_direction() != GridDirection::Import
        || snapshot.grid_power_w() < thresholds.grid_import_threshold_w;

    let verdict = if soc_ok && grid_ok {
        DecisionVerdict::ShouldCharge
    } else {
        DecisionVerdict::ShouldNotCharge
    };

    Decision {
        verdict,
        soc_ok,
        grid_ok,
    }
}

pub fn decide(snapshot: &SystemSnapshot, thresholds: &Thresholds) -> DecisionVerdict {
    evaluate(snapshot, thresholds).verdict
}

/// What to send to the charger this iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    StartCharging,
    StopCharging,
    NoAction,
}

impl CommandAction {
    /// Edge-triggered: a command only when verdict and observed state disagree.
    ///
    /// `None` for the observed state means the charger state is unknown, which
    /// never leads to a command.
    pub fn derive(verdict: DecisionVerdict, charging: Option<bool>) -> Self {
        match (verdict, charging) {
            (_, None) => CommandAction::NoAction,
            (DecisionVerdict::ShouldCharge, Some(false)) => CommandAction::StartCharging,
            (DecisionVerdict::ShouldNotCharge, Some(true)) => CommandAction::StopCharging,
            _ => CommandAction::NoAction,
        }
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandAction::StartCharging => write!(f, "start charging"),
            CommandAction::StopCharging => write!(f, "stop charging"),
            CommandAction::NoAction => write!(f, "no action"),
        }
    }
}
