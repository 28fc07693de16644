//! Remote console command surface
//!
//! Transport-agnostic: callers authenticate to obtain a `Session`, then pass
//! JSON command messages of the form `{"command": "...", "data": {...}}`.
//! Every command needs a session; `clear_alarms` and `set_limit` also need
//! the `write` permission.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use errors::ErrorInfo;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::config::{ConsoleConfig, UserConfig};
use crate::domain::{AlarmEvent, SensorReading};
use crate::error::{Result, SensorSrvError};
use crate::manager::SensorManager;

/// Default `get_alarms` page size
pub const DEFAULT_ALARM_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Commands,
}

/// An authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    permissions: BTreeSet<Permission>,
}

impl Session {
    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn permissions(&self) -> Vec<Permission> {
        self.permissions.iter().copied().collect()
    }
}

// ============================================================================
// Commands and responses
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    GetStatus,
    GetSensors,
    GetAlarms { limit: usize },
    ClearAlarms,
    SetLimit { sensor_id: u32, low: f64, high: f64 },
}

#[derive(Debug, Deserialize)]
struct CommandMessage {
    command: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SetLimitArgs {
    sensor_id: u32,
    low: f64,
    high: f64,
}

impl ConsoleCommand {
    pub fn parse(message: &str) -> Result<Self> {
        let message: CommandMessage = serde_json::from_str(message)?;
        match message.command.as_str() {
            "get_status" => Ok(ConsoleCommand::GetStatus),
            "get_sensors" => Ok(ConsoleCommand::GetSensors),
            "get_alarms" => {
                let limit = message
                    .data
                    .get("limit")
                    .and_then(serde_json::Value::as_u64)
                    .map(|l| l as usize)
                    .unwrap_or(DEFAULT_ALARM_LIMIT);
                Ok(ConsoleCommand::GetAlarms { limit })
            },
            "clear_alarms" => Ok(ConsoleCommand::ClearAlarms),
            "set_limit" => {
                let args: SetLimitArgs = serde_json::from_value(message.data)?;
                Ok(ConsoleCommand::SetLimit {
                    sensor_id: args.sensor_id,
                    low: args.low,
                    high: args.high,
                })
            },
            other => Err(SensorSrvError::NotFound(format!("Unknown command: {other}"))),
        }
    }

    pub fn required_permission(&self) -> Option<Permission> {
        match self {
            ConsoleCommand::ClearAlarms | ConsoleCommand::SetLimit { .. } => {
                Some(Permission::Write)
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsoleResponse {
    Status {
        sensor_count: usize,
        alarm_count: usize,
        timestamp: DateTime<Utc>,
    },
    Sensors {
        sensors: Vec<SensorReading>,
    },
    Alarms {
        alarms: Vec<AlarmEvent>,
        count: usize,
    },
    Success {
        message: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ConsoleResponse {
    pub fn error(err: &SensorSrvError) -> Self {
        let info = ErrorInfo::from_error(err);
        ConsoleResponse::Error {
            code: info.code,
            message: info.message,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ConsoleResponse::Error { .. })
    }
}

// ============================================================================
// ConsoleService
// ============================================================================

pub struct ConsoleService {
    manager: Arc<SensorManager>,
    users: BTreeMap<String, UserConfig>,
}

impl ConsoleService {
    pub fn new(manager: Arc<SensorManager>, config: &ConsoleConfig) -> Self {
        Self {
            manager,
            users: config.users.clone(),
        }
    }

    pub fn authenticate(&self, username: &str, password: &str) -> Result<Session> {
        match self.users.get(username) {
            Some(user) if user.password == password => {
                info!("Console login: {}", username);
                Ok(Session {
                    username: username.to_string(),
                    permissions: user.permissions.iter().copied().collect(),
                })
            },
            _ => {
                warn!("Console login failed: {}", username);
                Err(SensorSrvError::permission("Invalid credentials"))
            },
        }
    }

    /// Parse and execute one JSON command message
    pub fn handle_message(&self, session: Option<&Session>, message: &str) -> ConsoleResponse {
        match ConsoleCommand::parse(message) {
            Ok(command) => self.execute(session, command),
            Err(e) => ConsoleResponse::error(&e),
        }
    }

    pub fn execute(&self, session: Option<&Session>, command: ConsoleCommand) -> ConsoleResponse {
        let Some(session) = session else {
            return ConsoleResponse::error(&SensorSrvError::permission("Not authenticated"));
        };
        if let Some(required) = command.required_permission() {
            if !session.has(required) {
                warn!("Console {}: denied {:?}", session.username, command);
                return ConsoleResponse::error(&SensorSrvError::permission("Permission denied"));
            }
        }

        match self.run(session, command) {
            Ok(response) => response,
            Err(e) => ConsoleResponse::error(&e),
        }
    }

    fn run(&self, session: &Session, command: ConsoleCommand) -> Result<ConsoleResponse> {
        let response = match command {
            ConsoleCommand::GetStatus => {
                let status = self.manager.status();
                ConsoleResponse::Status {
                    sensor_count: status.sensor_count,
                    alarm_count: status.alarm_count,
                    timestamp: status.timestamp,
                }
            },
            ConsoleCommand::GetSensors => ConsoleResponse::Sensors {
                sensors: self.manager.latest_readings(),
            },
            ConsoleCommand::GetAlarms { limit } => {
                let alarms = self.manager.alarms(limit);
                ConsoleResponse::Alarms {
                    count: alarms.len(),
                    alarms,
                }
            },
            ConsoleCommand::ClearAlarms => {
                let removed = self.manager.clear_alarms();
                info!("Console {}: cleared {} alarms", session.username, removed);
                ConsoleResponse::Success {
                    message: format!("Alarm log cleared ({removed} removed)"),
                }
            },
            ConsoleCommand::SetLimit {
                sensor_id,
                low,
                high,
            } => {
                self.manager.set_limit(sensor_id, low, high)?;
                info!(
                    "Console {}: sensor {} limits [{}, {}]",
                    session.username, sensor_id, low, high
                );
                ConsoleResponse::Success {
                    message: format!("Sensor {sensor_id} limits set to [{low}, {high}]"),
                }
            },
        };
        Ok(response)
    }
}
