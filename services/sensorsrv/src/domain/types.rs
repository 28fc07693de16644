//! Sensor domain types: configuration, readings, status and alarm records

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::endpoint::{
    ProtocolConfig, ProtocolKind, DEFAULT_MODBUS_PORT, DEFAULT_MODBUS_UNIT_ID,
    DEFAULT_SERIAL_BAUDRATE, DEFAULT_TCP_HOST, DEFAULT_TCP_PORT,
};
use crate::error::{Result, SensorSrvError};

/// Value a device reports when its sensing element has failed
pub const FAULT_SENTINEL: f64 = -999.0;

// ============================================================================
// Limits
// ============================================================================

/// Alarm limit pair, `low <= high`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub low: f64,
    pub high: f64,
}

impl Limits {
    pub fn new(low: f64, high: f64) -> Result<Self> {
        if !low.is_finite() || !high.is_finite() {
            return Err(SensorSrvError::config(format!(
                "Limits must be finite numbers (low={low}, high={high})"
            )));
        }
        if low > high {
            return Err(SensorSrvError::config(format!(
                "Invalid limit ordering: low_limit {low} > high_limit {high}"
            )));
        }
        Ok(Self { low, high })
    }
}

// ============================================================================
// SensorStatus / AlarmType
// ============================================================================

/// Classified state of a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensorStatus {
    Ok,
    LowAlarm,
    HighAlarm,
    Faulty,
}

impl SensorStatus {
    /// Operator-facing label
    pub fn label(&self) -> &'static str {
        match self {
            SensorStatus::Ok => "OK",
            SensorStatus::LowAlarm => "LOW Alarm",
            SensorStatus::HighAlarm => "HIGH Alarm",
            SensorStatus::Faulty => "Faulty Sensor",
        }
    }

    /// Alarm type raised when a sensor enters this status
    pub fn alarm_type(&self) -> Option<AlarmType> {
        match self {
            SensorStatus::Ok => None,
            SensorStatus::LowAlarm => Some(AlarmType::Low),
            SensorStatus::HighAlarm => Some(AlarmType::High),
            SensorStatus::Faulty => Some(AlarmType::Fault),
        }
    }

    pub fn is_alarm(&self) -> bool {
        !matches!(self, SensorStatus::Ok)
    }
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlarmType {
    Low,
    High,
    Fault,
}

impl AlarmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmType::Low => "LOW",
            AlarmType::High => "HIGH",
            AlarmType::Fault => "FAULT",
        }
    }
}

impl fmt::Display for AlarmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SensorConfig
// ============================================================================

/// Immutable sensor definition
///
/// Limits given here are the initial pair; runtime changes go through
/// `SensorManager::set_limit` and never mutate the config itself.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "SensorConfigRaw")]
pub struct SensorConfig {
    pub id: u32,
    pub name: String,
    limits: Limits,
    pub unit: String,
    pub protocol: ProtocolConfig,
}

impl SensorConfig {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        low_limit: f64,
        high_limit: f64,
        unit: impl Into<String>,
        protocol: ProtocolConfig,
    ) -> Result<Self> {
        Ok(Self {
            id,
            name: name.into(),
            limits: Limits::new(low_limit, high_limit)?,
            unit: unit.into(),
            protocol,
        })
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn low_limit(&self) -> f64 {
        self.limits.low
    }

    pub fn high_limit(&self) -> f64 {
        self.limits.high
    }
}

/// Port value as written in configuration: a device path or a TCP port number
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PortSpec {
    Number(u16),
    Text(String),
}

/// Flat `protocol_config` table; which fields apply depends on `protocol`
#[derive(Debug, Clone, Default, Deserialize)]
struct ProtocolParams {
    port: Option<PortSpec>,
    baudrate: Option<u32>,
    host: Option<String>,
    unit_id: Option<u8>,
    register: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
struct SensorConfigRaw {
    id: u32,
    name: String,
    low_limit: f64,
    high_limit: f64,
    #[serde(default)]
    unit: String,
    #[serde(default = "default_protocol")]
    protocol: ProtocolKind,
    #[serde(default)]
    protocol_config: ProtocolParams,
}

fn default_protocol() -> ProtocolKind {
    ProtocolKind::Tcp
}

fn network_port(spec: Option<PortSpec>, default: u16) -> Result<u16> {
    match spec {
        None => Ok(default),
        Some(PortSpec::Number(port)) => Ok(port),
        Some(PortSpec::Text(text)) => text
            .trim()
            .parse()
            .map_err(|_| SensorSrvError::config(format!("Invalid TCP port: {text}"))),
    }
}

impl TryFrom<SensorConfigRaw> for SensorConfig {
    type Error = SensorSrvError;

    fn try_from(raw: SensorConfigRaw) -> Result<Self> {
        let params = raw.protocol_config;
        let protocol = match raw.protocol {
            ProtocolKind::Serial => {
                let port = match params.port {
                    Some(PortSpec::Text(path)) if !path.trim().is_empty() => path,
                    Some(PortSpec::Number(n)) => n.to_string(),
                    _ => {
                        return Err(SensorSrvError::config(format!(
                            "Sensor {}: serial protocol requires protocol_config.port",
                            raw.id
                        )))
                    },
                };
                ProtocolConfig::Serial {
                    port,
                    baudrate: params.baudrate.unwrap_or(DEFAULT_SERIAL_BAUDRATE),
                }
            },
            ProtocolKind::Tcp => ProtocolConfig::Tcp {
                host: params.host.unwrap_or_else(|| DEFAULT_TCP_HOST.to_string()),
                port: network_port(params.port, DEFAULT_TCP_PORT)?,
            },
            ProtocolKind::Modbus => ProtocolConfig::Modbus {
                host: params.host.unwrap_or_else(|| DEFAULT_TCP_HOST.to_string()),
                port: network_port(params.port, DEFAULT_MODBUS_PORT)?,
                unit_id: params.unit_id.unwrap_or(DEFAULT_MODBUS_UNIT_ID),
                register: params.register.unwrap_or(0),
            },
        };

        SensorConfig::new(
            raw.id,
            raw.name,
            raw.low_limit,
            raw.high_limit,
            raw.unit,
            protocol,
        )
    }
}

// ============================================================================
// SensorReading
// ============================================================================

/// One classified measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: u32,
    pub sensor_name: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub status: SensorStatus,
}

// ============================================================================
// AlarmEvent
// ============================================================================

/// A status transition, with the limits that were in effect when it happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub timestamp: DateTime<Utc>,
    pub sensor_id: u32,
    pub sensor_name: String,
    pub value: f64,
    pub alarm_type: AlarmType,
    pub unit: String,
    pub low_limit: f64,
    pub high_limit: f64,
}

impl AlarmEvent {
    /// Multi-line operator message
    pub fn message(&self) -> String {
        format!(
            "ALARM: {}\nSensor: {}\nValue: {:.2} {}\nTime: {}",
            self.alarm_type,
            self.sensor_name,
            self.value,
            self.unit,
            self.timestamp.format("%Y-%m-%d %H:%M:%S")
        )
    }
}
