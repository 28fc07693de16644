//! Service Bootstrap and Initialization
//!
//! Command-line parsing, logging setup, configuration validation and the
//! start/stop sequence of the service process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use common::shutdown::wait_for_shutdown;
pub use common::ServiceArgs;

use crate::core::config::AppConfig;
use crate::error::{Result, SensorSrvError};
use crate::manager::SensorManager;
use crate::notify::NotificationDispatcher;

pub const SERVICE_NAME: &str = "sensorsrv";
pub const DEFAULT_CONFIG_PATH: &str = "config/sensors.yaml";

/// Command-line arguments for sensorsrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sensorsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Field sensor polling and alarm service",
    long_about = None
)]
pub struct Args {
    /// Configuration file (.yaml, .yml, .json or .toml)
    #[arg(short = 'c', long, env = "SENSORSRV_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(flatten)]
    pub service: ServiceArgs,
}

pub fn initialize_logging(args: &Args) -> Result<()> {
    common::logging::init_with_config(args.service.log_config(SERVICE_NAME))
        .map_err(|e| SensorSrvError::internal(format!("Failed to init logging: {e}")))
}

/// Load the config file and report what it describes
pub fn validate_configuration(path: &Path) -> Result<AppConfig> {
    debug!("Validating configuration: {}", path.display());
    let config = AppConfig::load(path)?;

    info!("Found {} sensor(s)", config.sensors.len());
    for sensor in &config.sensors {
        info!(
            "  Sensor {}: {} [{}, {}] {} on {}",
            sensor.id,
            sensor.name,
            sensor.low_limit(),
            sensor.high_limit(),
            sensor.unit,
            sensor.protocol.endpoint().key()
        );
    }
    Ok(config)
}

/// Create the manager and register every configured sensor
pub async fn build_manager(config: &AppConfig) -> Result<Arc<SensorManager>> {
    let manager = Arc::new(SensorManager::new(
        config.connection_settings(),
        config.connection.event_buffer,
    ));
    for sensor in &config.sensors {
        manager.add_sensor(sensor.clone()).await?;
    }
    info!(
        "{} sensors on {} endpoints",
        manager.sensor_count(),
        manager.endpoint_count()
    );
    Ok(manager)
}

/// Run until Ctrl+C / SIGTERM
pub async fn run(args: Args) -> Result<()> {
    if args.service.validate {
        validate_configuration(&args.config)?;
        info!("Validation completed successfully");
        return Ok(());
    }

    let config = AppConfig::load(&args.config)?;
    let manager = build_manager(&config).await?;

    let results = manager.connect_all().await;
    let connected = results.values().filter(|ok| **ok).count();
    for (key, ok) in &results {
        if *ok {
            info!("{}: connected", key);
        } else {
            warn!("{}: not connected", key);
        }
    }
    info!("Endpoints up: {}/{}", connected, results.len());

    let cancel = CancellationToken::new();
    let dispatcher = Arc::new(NotificationDispatcher::new(config.alarm_settings.clone())?);
    let notifier = Arc::clone(&dispatcher).start(&manager, cancel.clone());

    if config.remote_console.enabled {
        info!(
            "Remote console: {} users on {}:{}",
            config.remote_console.users.len(),
            config.remote_console.host,
            config.remote_console.port
        );
    }

    wait_for_shutdown().await;
    info!("Shutting down");

    cancel.cancel();
    manager.disconnect_all().await;
    if let Err(e) = notifier.await {
        warn!("Notifier task ended abnormally: {}", e);
    }

    let status = manager.status();
    info!("Stopped ({} alarms recorded)", status.alarm_count);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["sensorsrv"]).unwrap();
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(!args.service.validate);
    }

    #[test]
    fn test_args_flags() {
        let args = Args::try_parse_from([
            "sensorsrv",
            "--config",
            "/etc/sensorsrv/sensors.json",
            "--validate",
            "--no-color",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/sensorsrv/sensors.json"));
        assert!(args.service.validate);
        assert!(args.service.no_color);
    }

    #[tokio::test]
    async fn test_build_manager_groups_sensors() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(
            br#"{"sensors": [
                {"id": 1, "name": "A", "low_limit": 0, "high_limit": 10,
                 "protocol": "serial", "protocol_config": {"port": "P1"}},
                {"id": 2, "name": "B", "low_limit": 0, "high_limit": 10,
                 "protocol": "serial", "protocol_config": {"port": "P1"}},
                {"id": 3, "name": "C", "low_limit": 0, "high_limit": 10}]}"#,
        )
        .unwrap();

        let config = validate_configuration(file.path()).unwrap();
        let manager = build_manager(&config).await.unwrap();
        assert_eq!(manager.sensor_count(), 3);
        assert_eq!(manager.endpoint_count(), 2);
    }
}
