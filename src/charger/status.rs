use crate::config::DataPointsConfig;
use serde_json::{Map, Value};
use std::fmt;

/// Charger state as last reported by the device
///
/// Each field is `None` when the point is missing or carries a value of an
/// unexpected type. Only `charge_status` drives control decisions; the rest
/// is for display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChargerObservedState {
    pub switch_on: Option<bool>,
    pub charge_status: Option<String>,
    pub work_mode: Option<String>,
    pub work_state: Option<String>,
    pub mode_status: Option<String>,
    pub energy_kwh: Option<f64>,
    pub current_a: Option<f64>,
    pub max_current_a: Option<f64>,
    pub charging_time: Option<String>,
}

fn point<'a>(dps: &'a Map<String, Value>, id: u32) -> Option<&'a Value> {
    dps.get(&id.to_string())
}

fn text(dps: &Map<String, Value>, id: u32) -> Option<String> {
    point(dps, id).and_then(Value::as_str).map(str::to_string)
}

fn number(dps: &Map<String, Value>, id: u32) -> Option<f64> {
    point(dps, id).and_then(Value::as_f64)
}

impl ChargerObservedState {
    /// Parse a status reply; `None` if it carries no `dps` object
    pub fn from_status(status: &Value, points: &DataPointsConfig) -> Option<Self> {
        let dps = status.get("dps")?.as_object()?;

        let charging_time = match point(dps, points.charging_time) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        Some(Self {
            switch_on: point(dps, points.switch).and_then(Value::as_bool),
            charge_status: text(dps, points.charge_status),
            work_mode: text(dps, points.mode),
            work_state: text(dps, points.work_state),
            mode_status: text(dps, points.mode_status),
            // Reported in Wh
            energy_kwh: number(dps, points.energy).map(|wh| wh / 1000.0),
            current_a: number(dps, points.current),
            max_current_a: number(dps, points.max_current),
            charging_time,
        })
    }

    /// Whether the charger is actively charging, `None` when unknown.
    ///
    /// The firmware reports "charing"; matching "char" covers both spellings.
    pub fn is_charging(&self) -> Option<bool> {
        self.charge_status
            .as_deref()
            .map(|s| s.to_lowercase().contains("char"))
    }
}

impl fmt::Display for ChargerObservedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map_or_else(|| "-".to_string(), ToString::to_string)
        }

        let switch = match self.switch_on {
            Some(true) => "on",
            Some(false) => "off",
            None => "-",
        };
        write!(
            f,
            "switch={} status={} work_state={} mode={} mode_status={} current={}A max_current={}A energy={} time={}",
            switch,
            opt(&self.charge_status),
            opt(&self.work_state),
            opt(&self.work_mode),
            opt(&self.mode_status),
            opt(&self.current_a),
            opt(&self.max_current_a),
            self.energy_kwh
                .map_or_else(|| "-".to_string(), |e| format!("{:.3}kWh", e)),
            opt(&self.charging_time),
        )
    }
}
