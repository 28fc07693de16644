//! Sensor, endpoint and alarm data model

pub mod endpoint;
pub mod types;

pub use endpoint::{Endpoint, EndpointKey, ModbusAddress, ProtocolConfig, ProtocolKind};
pub use types::{
    AlarmEvent, AlarmType, Limits, SensorConfig, SensorReading, SensorStatus, FAULT_SENTINEL,
};
