//! Error handling for the sensor service
//!
//! The four core kinds follow the failure taxonomy of the polling core:
//! configuration problems are rejected at the call that caused them, decode
//! failures are swallowed by workers, connect failures are returned from
//! `connect()`, and transport failures downgrade an endpoint to disconnected.

use errors::{ErrorCategory, ServiceErrorTrait};
use thiserror::Error;

/// Sensor service error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorSrvError {
    /// Invalid or conflicting configuration (duplicate id, inverted limits)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Malformed frame or Modbus response
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Endpoint unreachable
    #[error("Connect error: {endpoint}: {reason}")]
    ConnectError { endpoint: String, reason: String },

    /// Mid-stream socket or port loss
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Response or connect timeout
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Console caller lacks the required permission tag
    #[error("Permission error: {0}")]
    PermissionError(String),

    /// Unknown sensor or endpoint
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local I/O failures (config files, process spawn)
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the sensor service
pub type Result<T> = std::result::Result<T, SensorSrvError>;

impl SensorSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        SensorSrvError::ConfigError(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        SensorSrvError::DecodeError(msg.into())
    }

    pub fn connect(endpoint: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SensorSrvError::ConnectError {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        SensorSrvError::TransportError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        SensorSrvError::TimeoutError(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        SensorSrvError::PermissionError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        SensorSrvError::InternalError(msg.into())
    }

    pub fn sensor_not_found(id: u32) -> Self {
        SensorSrvError::NotFound(format!("Sensor not found: {id}"))
    }

    pub fn sensor_exists(id: u32) -> Self {
        SensorSrvError::ConfigError(format!("Sensor already registered: {id}"))
    }

    /// Whether this failure means the link itself is gone
    pub fn is_link_loss(&self) -> bool {
        matches!(self, SensorSrvError::TransportError(_))
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<std::io::Error> for SensorSrvError {
    fn from(err: std::io::Error) -> Self {
        SensorSrvError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for SensorSrvError {
    fn from(err: serde_json::Error) -> Self {
        SensorSrvError::DecodeError(format!("JSON: {err}"))
    }
}

impl From<figment::Error> for SensorSrvError {
    fn from(err: figment::Error) -> Self {
        SensorSrvError::ConfigError(format!("Failed to parse config: {err}"))
    }
}

impl From<tokio_serial::Error> for SensorSrvError {
    fn from(err: tokio_serial::Error) -> Self {
        SensorSrvError::IoError(format!("Serial: {err}"))
    }
}

impl From<reqwest::Error> for SensorSrvError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SensorSrvError::TimeoutError(format!("HTTP: {err}"))
        } else {
            SensorSrvError::IoError(format!("HTTP: {err}"))
        }
    }
}

// ============================================================================
// SensorSrvError implements ServiceErrorTrait
// ============================================================================

impl ServiceErrorTrait for SensorSrvError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "SENSORSRV_CONFIG_ERROR",
            Self::DecodeError(_) => "SENSORSRV_DECODE_ERROR",
            Self::ConnectError { .. } => "SENSORSRV_CONNECT_ERROR",
            Self::TransportError(_) => "SENSORSRV_TRANSPORT_ERROR",
            Self::TimeoutError(_) => "SENSORSRV_TIMEOUT",
            Self::PermissionError(_) => "SENSORSRV_PERMISSION_ERROR",
            Self::NotFound(_) => "SENSORSRV_NOT_FOUND",
            Self::IoError(_) => "SENSORSRV_IO_ERROR",
            Self::InternalError(_) => "SENSORSRV_INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError(_) => ErrorCategory::Configuration,
            Self::DecodeError(_) => ErrorCategory::Protocol,
            Self::ConnectError { .. } => ErrorCategory::Connection,
            Self::TransportError(_) => ErrorCategory::Network,
            Self::TimeoutError(_) => ErrorCategory::Timeout,
            Self::PermissionError(_) => ErrorCategory::Permission,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::IoError(_) => ErrorCategory::Internal,
            Self::InternalError(_) => ErrorCategory::Internal,
        }
    }
}
