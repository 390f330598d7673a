use chargesync::backoff::RetryPolicy;
use chargesync::charger::ChargerObservedState;
use chargesync::config::DataPointsConfig;
use chargesync::controls::{CommandAction, DecisionVerdict, Thresholds, decide, evaluate};
use chargesync::telemetry::{GridDirection, SystemSnapshot};
use serde_json::json;
use std::time::Duration;

fn thresholds() -> Thresholds {
    Thresholds {
        soc_threshold_pct: 90.0,
        grid_import_threshold_w: 250.0,
        charging_current_a: 16,
        check_interval: Duration::from_secs(120),
        retry: RetryPolicy::default(),
        connection_timeout: Duration::from_secs(15),
    }
}

fn observed(charge_status: &str) -> ChargerObservedState {
    let status = json!({"dps": {"101": charge_status}});
    ChargerObservedState::from_status(&status, &DataPointsConfig::default()).unwrap()
}

#[test]
fn heavy_import_blocks_charging_despite_full_battery() {
    let snap = SystemSnapshot::new(95.0, 300.0);
    assert_eq!(snap.grid_direction(), GridDirection::Import);
    assert_eq!(decide(&snap, &thresholds()), DecisionVerdict::ShouldNotCharge);
}

#[test]
fn light_import_allows_charging() {
    let snap = SystemSnapshot::new(95.0, 100.0);
    assert_eq!(snap.grid_direction(), GridDirection::Import);
    assert_eq!(decide(&snap, &thresholds()), DecisionVerdict::ShouldCharge);
}

#[test]
fn low_soc_dominates_export() {
    let snap = SystemSnapshot::new(85.0, -50.0);
    assert_eq!(snap.grid_direction(), GridDirection::Export);
    let d = evaluate(&snap, &thresholds());
    assert!(!d.soc_ok);
    assert!(d.grid_ok);
    assert_eq!(d.verdict, DecisionVerdict::ShouldNotCharge);
}

#[test]
fn grid_direction_scenarios() {
    assert_eq!(SystemSnapshot::new(0.0, 5.0).grid_direction(), GridDirection::Idle);
    assert_eq!(SystemSnapshot::new(0.0, -15.0).grid_direction(), GridDirection::Export);
    assert_eq!(SystemSnapshot::new(0.0, 11.0).grid_direction(), GridDirection::Import);
}

#[test]
fn full_battery_without_import_always_charges() {
    let t = thresholds();
    for soc in [90.0, 95.5, 100.0] {
        for grid in [-5000.0, -11.0, -10.0, 0.0, 10.0] {
            let snap = SystemSnapshot::new(soc, grid);
            assert_ne!(snap.grid_direction(), GridDirection::Import);
            assert_eq!(decide(&snap, &t), DecisionVerdict::ShouldCharge, "soc={soc} grid={grid}");
        }
    }
}

#[test]
fn import_at_or_above_threshold_never_charges() {
    let t = thresholds();
    for soc in [0.0, 50.0, 100.0] {
        for grid in [250.0, 251.0, 4000.0] {
            let snap = SystemSnapshot::new(soc, grid);
            assert_eq!(decide(&snap, &t), DecisionVerdict::ShouldNotCharge, "soc={soc} grid={grid}");
        }
    }
}

#[test]
fn already_charging_needs_no_action() {
    let state = observed("charging");
    assert_eq!(
        CommandAction::derive(DecisionVerdict::ShouldCharge, state.is_charging()),
        CommandAction::NoAction
    );
}

#[test]
fn finished_charger_needs_start() {
    let state = observed("finish");
    assert_eq!(
        CommandAction::derive(DecisionVerdict::ShouldCharge, state.is_charging()),
        CommandAction::StartCharging
    );
}
