use anyhow::Result;
use chargesync::charger::DeviceTransport;
use chargesync::config::TelemetryTransportKind;
use chargesync::driver::ChargeDriver;
use chargesync::modbus::ModbusTcpTransport;
use chargesync::solarman::SolarmanTransport;
use chargesync::telemetry::TelemetryTransport;
use chargesync::tuya::TuyaTransport;
use chargesync::Config;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Deployments keep credentials in a .env file next to the binary
    dotenv::dotenv().ok();

    let config = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    chargesync::logging::init_logging(&config.logging)?;

    info!("chargesync {} starting up", env!("APP_VERSION"));

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    let timeout = config.retry.connection_timeout();
    let device = TuyaTransport::new(
        &config.charger.ip,
        config.charger.port,
        &config.charger.device_id,
        &config.charger.local_key,
        timeout,
    )?;
    info!(
        "Charger {} at {}:{} (protocol {})",
        config.charger.device_id, config.charger.ip, config.charger.port, config.charger.protocol_version
    );

    let inverter = &config.inverter;
    match inverter.transport {
        TelemetryTransportKind::Solarman => {
            let telemetry = SolarmanTransport::new(
                &inverter.ip,
                inverter.port,
                inverter.logger_serial,
                inverter.slave_id,
                timeout,
            );
            run(&config, telemetry, device).await
        }
        TelemetryTransportKind::ModbusTcp => {
            let telemetry =
                ModbusTcpTransport::new(&inverter.ip, inverter.port, inverter.slave_id, timeout);
            run(&config, telemetry, device).await
        }
    }
}

async fn run<T, D>(config: &Config, telemetry: T, device: D) -> Result<()>
where
    T: TelemetryTransport,
    D: DeviceTransport,
{
    let mut driver = ChargeDriver::from_config(config, telemetry, device);

    // Listen for Ctrl+C from the start, not only once the loop first sleeps
    let (stop_tx, mut stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                stop_tx.send_replace(true);
                // A closed channel reads as "never stop"; hold the sender
                std::future::pending::<()>().await;
            }
            Err(e) => {
                error!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });
    let shutdown = async move {
        if stop_rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    match driver.run(shutdown).await {
        Ok(()) => {
            info!("chargesync stopped");
            Ok(())
        }
        Err(e) if e.is_fatal() => {
            error!("Fatal error, exiting: {}", e);
            Err(anyhow::anyhow!("Driver error: {}", e))
        }
        Err(e) => {
            warn!("Driver stopped on a recoverable error: {}", e);
            Err(anyhow::anyhow!("Driver error: {}", e))
        }
    }
}
