//! Service configuration
//!
//! Loaded with figment from a JSON, YAML or TOML file (chosen by extension)
//! and merged with `SENSORSRV_`-prefixed environment variables, where `__`
//! separates nesting levels (`SENSORSRV_CONNECTION__READ_TIMEOUT_MS=2000`).

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::connection::{ConnectionSettings, ReconnectPolicy, ReconnectSettings};
use crate::console::Permission;
use crate::domain::SensorConfig;
use crate::error::{Result, SensorSrvError};

pub const ENV_PREFIX: &str = "SENSORSRV_";
pub const DEFAULT_UPDATE_RATE: f64 = 0.5;
pub const DEFAULT_CONSOLE_PORT: u16 = 8765;

// ============================================================================
// Sections
// ============================================================================

/// Link timing and buffering
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub response_timeout_ms: u64,
    /// Capacity of each outbound broadcast stream
    pub event_buffer: usize,
    pub modbus_connect_attempts: u32,
    pub modbus_retry_delay_ms: u64,
    pub reconnect: ReconnectSettings,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            read_timeout_ms: 1000,
            response_timeout_ms: 3000,
            event_buffer: 1024,
            modbus_connect_attempts: 3,
            modbus_retry_delay_ms: 1000,
            reconnect: ReconnectSettings::default(),
        }
    }
}

/// Which alarms reach the notifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyMode {
    /// Once per status transition, same as the alarm log
    #[default]
    Transitions,
    /// Every LOW/HIGH/FAULTY reading
    EveryViolation,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AlarmSettings {
    /// Gates webhook delivery
    pub enable_notifications: bool,
    pub enable_desktop_notifications: bool,
    /// Empty disables the webhook
    pub webhook_url: String,
    pub notify_mode: NotifyMode,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            enable_notifications: false,
            enable_desktop_notifications: true,
            webhook_url: String::new(),
            notify_mode: NotifyMode::Transitions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserConfig {
    pub password: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub users: BTreeMap<String, UserConfig>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: DEFAULT_CONSOLE_PORT,
            users: BTreeMap::new(),
        }
    }
}

// ============================================================================
// AppConfig
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Poll interval in seconds
    pub update_rate: f64,
    pub connection: ConnectionConfig,
    pub sensors: Vec<SensorConfig>,
    pub alarm_settings: AlarmSettings,
    pub remote_console: ConsoleConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            update_rate: DEFAULT_UPDATE_RATE,
            connection: ConnectionConfig::default(),
            sensors: Vec::new(),
            alarm_settings: AlarmSettings::default(),
            remote_console: ConsoleConfig::default(),
        }
    }
}

impl AppConfig {
    /// File provider by extension, then environment overrides
    pub fn figment<P: AsRef<Path>>(path: P) -> Result<Figment> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| SensorSrvError::config("Invalid file extension"))?;

        let figment = match extension {
            "json" => Figment::new().merge(Json::file(path)),
            "toml" => Figment::new().merge(Toml::file(path)),
            "yaml" | "yml" => Figment::new().merge(Yaml::file(path)),
            _ => {
                return Err(SensorSrvError::config(format!(
                    "Unsupported config format: {extension}"
                )))
            },
        };

        // CLI-only variables share the prefix
        Ok(figment.merge(
            Env::prefixed(ENV_PREFIX)
                .split("__")
                .ignore(&["config", "log_dir"]),
        ))
    }

    /// Load and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SensorSrvError::config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        debug!("Loading config: {}", path.display());
        let config = Self::from_figment(&Self::figment(path)?)?;
        info!(
            "Config loaded: {} sensors, update rate {}s",
            config.sensors.len(),
            config.update_rate
        );
        Ok(config)
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.update_rate.is_finite() || self.update_rate <= 0.0 {
            return Err(SensorSrvError::config(format!(
                "update_rate must be positive, got {}",
                self.update_rate
            )));
        }
        let conn = &self.connection;
        if conn.event_buffer == 0 {
            return Err(SensorSrvError::config("connection.event_buffer must be > 0"));
        }
        if conn.read_timeout_ms == 0 || conn.response_timeout_ms == 0 {
            return Err(SensorSrvError::config(
                "connection.read_timeout_ms and response_timeout_ms must be > 0",
            ));
        }
        let reconnect = &conn.reconnect;
        if !reconnect.backoff_multiplier.is_finite() || reconnect.backoff_multiplier < 1.0 {
            return Err(SensorSrvError::config(format!(
                "connection.reconnect.backoff_multiplier must be >= 1.0, got {}",
                reconnect.backoff_multiplier
            )));
        }
        if reconnect.initial_delay_ms > reconnect.max_delay_ms {
            return Err(SensorSrvError::config(format!(
                "connection.reconnect.initial_delay_ms {} > max_delay_ms {}",
                reconnect.initial_delay_ms, reconnect.max_delay_ms
            )));
        }

        let mut ids = HashSet::new();
        for sensor in &self.sensors {
            if !ids.insert(sensor.id) {
                return Err(SensorSrvError::config(format!(
                    "Duplicate sensor ID: {}",
                    sensor.id
                )));
            }
            if sensor.low_limit() > sensor.high_limit() {
                return Err(SensorSrvError::config(format!(
                    "Sensor {}: low_limit {} > high_limit {}",
                    sensor.id,
                    sensor.low_limit(),
                    sensor.high_limit()
                )));
            }
        }
        Ok(())
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        let conn = &self.connection;
        ConnectionSettings {
            poll_interval: Duration::from_secs_f64(self.update_rate),
            connect_timeout: Duration::from_millis(conn.connect_timeout_ms),
            read_timeout: Duration::from_millis(conn.read_timeout_ms),
            response_timeout: Duration::from_millis(conn.response_timeout_ms),
            modbus_connect_attempts: conn.modbus_connect_attempts,
            modbus_retry_delay: Duration::from_millis(conn.modbus_retry_delay_ms),
            reconnect: ReconnectPolicy::from(&conn.reconnect),
        }
    }
}
