//! Field Sensor Service (`sensorsrv`)
//!
//! Polls serial, TCP and Modbus/TCP field devices, classifies every
//! measurement against per-sensor limits and raises one alarm per status
//! transition.
//!
//! Sensors that share a physical address share one `Connection`; each
//! connection runs a single worker task that feeds the `SensorManager`.
//! Consumers follow the manager's broadcast streams and never block polling.

pub mod alarm;
pub mod connection;
pub mod console;
pub mod core;
pub mod domain;
pub mod error;
pub mod manager;
pub mod notify;
pub mod protocols;

pub use crate::alarm::{AlarmEvaluator, AlarmLog};
pub use crate::connection::{Connection, ConnectionEvent, ConnectionSettings, EndpointRegistry};
pub use crate::console::{ConsoleCommand, ConsoleResponse, ConsoleService, Permission, Session};
pub use crate::core::config::AppConfig;
pub use crate::domain::{
    AlarmEvent, AlarmType, EndpointKey, Limits, ProtocolConfig, SensorConfig, SensorReading,
    SensorStatus, FAULT_SENTINEL,
};
pub use crate::error::{Result, SensorSrvError};
pub use crate::manager::SensorManager;
pub use crate::notify::NotificationDispatcher;
