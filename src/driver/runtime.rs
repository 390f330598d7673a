use std::future::Future;
use std::pin::Pin;
use tokio::time::sleep;

use crate::charger::DeviceTransport;
use crate::controls::{CommandAction, DecisionVerdict, evaluate};
use crate::error::{ChargeSyncError, Result};
use crate::logging::StructuredLogger;
use crate::telemetry::TelemetryTransport;

use super::types::{DriverState, IterationOutcome};

/// Whether `shutdown` has already resolved, without waiting for it
async fn shutdown_requested<F: Future<Output = ()>>(shutdown: Pin<&mut F>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown => true,
        _ = std::future::ready(()) => false,
    }
}

fn yes_no(v: bool) -> &'static str {
    if v { "yes" } else { "no" }
}

impl<T: TelemetryTransport, D: DeviceTransport> super::ChargeDriver<T, D> {
    /// Run until `shutdown` resolves.
    ///
    /// Returns an error only when the startup connectivity check fails. The
    /// shutdown future is checked before every iteration and raced against
    /// the interval sleep, so an iteration in progress always completes.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        self.log_thresholds();
        self.connectivity_check().await?;

        loop {
            if shutdown_requested(shutdown.as_mut()).await {
                self.logger.info("Shutdown signal received");
                break;
            }

            let outcome = self.run_iteration().await;
            self.logger.debug(&format!(
                "Iteration {} finished: {:?}",
                self.iteration, outcome
            ));

            self.logger.info(&format!(
                "Waiting {} seconds until the next check",
                self.thresholds.check_interval.as_secs()
            ));
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    self.logger.info("Shutdown signal received");
                    break;
                }
                _ = sleep(self.thresholds.check_interval) => {}
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn log_thresholds(&self) {
        let t = &self.thresholds;
        self.logger.info(&format!(
            "Thresholds: SOC >= {}%, grid import < {} W, charging current {} A, interval {} s",
            t.soc_threshold_pct,
            t.grid_import_threshold_w,
            t.charging_current_a,
            t.check_interval.as_secs()
        ));
        self.logger.info(&format!(
            "Retry: {} attempts, {:?} delay ({:?}), connection timeout {:?}",
            t.retry.max_attempts, t.retry.delay, t.retry.strategy, t.connection_timeout
        ));
    }

    /// One telemetry read and one charger status read; either failing is fatal
    pub async fn connectivity_check(&mut self) -> Result<()> {
        self.set_state(DriverState::ConnectivityCheck);
        self.logger.info("Checking connectivity");

        let endpoint = self.reader.transport().endpoint();
        self.reader.connect().await.map_err(|e| {
            self.logger
                .error(&format!("Cannot connect to inverter {}: {}", endpoint, e));
            ChargeSyncError::connectivity(format!("inverter {}: {}", endpoint, e))
        })?;

        let snapshot = self.reader.read_snapshot().await.map_err(|e| {
            self.logger
                .error(&format!("Initial telemetry read failed: {}", e));
            ChargeSyncError::connectivity(format!("inverter telemetry: {}", e))
        })?;
        self.logger.info(&format!("Inverter reachable: {}", snapshot));

        let state = self.charger.probe_status().await.map_err(|e| {
            self.logger
                .error(&format!("Initial charger status read failed: {}", e));
            ChargeSyncError::connectivity(format!("charger status: {}", e))
        })?;
        self.logger.info(&format!("Charger reachable: {}", state));

        Ok(())
    }

    /// Run one iteration. Never fails; errors end up in the outcome.
    pub async fn run_iteration(&mut self) -> IterationOutcome {
        self.iteration += 1;
        self.set_state(DriverState::Running {
            iteration: self.iteration,
        });
        let logger = self.logger.for_iteration(self.iteration);
        logger.info(&format!(
            "Iteration {} at {}",
            self.iteration,
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ));

        match self.iterate(&logger).await {
            Ok(outcome) => outcome,
            Err(e) => {
                logger.error(&format!("Unexpected error in iteration: {}", e));
                IterationOutcome::Failed
            }
        }
    }

    async fn iterate(&mut self, logger: &StructuredLogger) -> Result<IterationOutcome> {
        let snapshot = match self.reader.read_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_transient() => {
                logger.error(&format!(
                    "Telemetry unavailable, skipping this iteration: {}",
                    e
                ));
                return Ok(IterationOutcome::TelemetryUnavailable);
            }
            Err(e) => return Err(e),
        };
        logger.info(&format!(
            "Battery SOC {:.0}%, grid {:.0} W ({})",
            snapshot.battery_soc_pct(),
            snapshot.grid_power_w(),
            snapshot.grid_direction()
        ));

        let decision = evaluate(&snapshot, &self.thresholds);
        logger.info(&format!(
            "SOC >= {}%: {}; import < {} W or not importing: {}; verdict: {}",
            self.thresholds.soc_threshold_pct,
            yes_no(decision.soc_ok),
            self.thresholds.grid_import_threshold_w,
            yes_no(decision.grid_ok),
            decision.verdict
        ));

        let Some(before) = self.charger.fetch_observed_state().await else {
            logger.warn("[before] Charger status unavailable, no command this iteration");
            return Ok(IterationOutcome::StatusUnavailable);
        };
        logger.info(&format!("[before] {}", before));

        let charging = before.is_charging();
        let action = CommandAction::derive(decision.verdict, charging);
        match action {
            CommandAction::NoAction => {
                match charging {
                    None => logger.warn("Charge status not reported, leaving charger as is"),
                    Some(true) => logger.info(&format!(
                        "Already charging ({})",
                        before.charge_status.as_deref().unwrap_or("-")
                    )),
                    Some(false) => logger.info("Charging state unchanged (not charging)"),
                }
                Ok(IterationOutcome::NoAction {
                    verdict: decision.verdict,
                })
            }
            CommandAction::StartCharging | CommandAction::StopCharging => {
                logger.info(&format!("Action: {}", action));
                let accepted = if action == CommandAction::StartCharging {
                    self.charger
                        .start_charging(self.thresholds.charging_current_a)
                        .await
                } else {
                    self.charger.stop_charging().await
                };

                if accepted {
                    self.verify(logger, decision.verdict).await;
                } else {
                    logger.warn(&format!("Charger did not accept {}", action));
                }
                Ok(IterationOutcome::Commanded { action, accepted })
            }
        }
    }

    /// Re-read the charger after a command; mismatches are only logged
    async fn verify(&mut self, logger: &StructuredLogger, verdict: DecisionVerdict) {
        sleep(self.verify_settle).await;
        logger.info("Checking charger state after the command");

        let Some(after) = self.charger.fetch_observed_state().await else {
            logger.warn("[after] Charger status unavailable, command not verified");
            return;
        };
        logger.info(&format!("[after] {}", after));

        let expected = verdict.wants_charging();
        match after.is_charging() {
            Some(actual) if actual == expected => logger.info("Charger state matches the command"),
            Some(actual) => logger.warn(&format!(
                "Charger reports {} after the command",
                if actual { "charging" } else { "not charging" }
            )),
            None => logger.warn("[after] Charge status not reported, command not verified"),
        }
    }

    async fn shutdown(&mut self) {
        self.set_state(DriverState::ShuttingDown);
        self.logger.info("Shutting down driver");
        self.reader.disconnect().await;
        self.logger.info("Driver shutdown complete");
    }
}
