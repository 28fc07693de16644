//! Physical endpoints and their canonical keys
//!
//! Sensors that share a protocol and an address share one physical
//! endpoint. The endpoint key is the only identity the registry uses.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_SERIAL_BAUDRATE: u32 = 9600;
pub const DEFAULT_TCP_HOST: &str = "localhost";
pub const DEFAULT_TCP_PORT: u16 = 5000;
pub const DEFAULT_MODBUS_PORT: u16 = 502;
pub const DEFAULT_MODBUS_UNIT_ID: u8 = 1;

/// Protocol tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Serial,
    Tcp,
    Modbus,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Serial => "serial",
            ProtocolKind::Tcp => "tcp",
            ProtocolKind::Modbus => "modbus",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol-specific address of one sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolConfig {
    /// Serial device path, or `host:port` for a serial line bridged over TCP
    Serial { port: String, baudrate: u32 },
    Tcp { host: String, port: u16 },
    /// Modbus/TCP server plus the per-sensor unit id and holding register
    Modbus {
        host: String,
        port: u16,
        unit_id: u8,
        register: u16,
    },
}

impl ProtocolConfig {
    pub fn serial(port: impl Into<String>) -> Self {
        ProtocolConfig::Serial {
            port: port.into(),
            baudrate: DEFAULT_SERIAL_BAUDRATE,
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        ProtocolConfig::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn modbus(host: impl Into<String>, port: u16, unit_id: u8, register: u16) -> Self {
        ProtocolConfig::Modbus {
            host: host.into(),
            port,
            unit_id,
            register,
        }
    }

    pub fn kind(&self) -> ProtocolKind {
        match self {
            ProtocolConfig::Serial { .. } => ProtocolKind::Serial,
            ProtocolConfig::Tcp { .. } => ProtocolKind::Tcp,
            ProtocolConfig::Modbus { .. } => ProtocolKind::Modbus,
        }
    }

    /// The physical endpoint this sensor lives on (per-sensor details dropped)
    pub fn endpoint(&self) -> Endpoint {
        match self {
            ProtocolConfig::Serial { port, baudrate } => Endpoint::Serial {
                port: port.clone(),
                baudrate: *baudrate,
            },
            ProtocolConfig::Tcp { host, port } => Endpoint::Tcp {
                host: host.clone(),
                port: *port,
            },
            ProtocolConfig::Modbus { host, port, .. } => Endpoint::Modbus {
                host: host.clone(),
                port: *port,
            },
        }
    }

    /// Modbus unit id and register, if this is a Modbus sensor
    pub fn modbus_address(&self) -> Option<ModbusAddress> {
        match self {
            ProtocolConfig::Modbus {
                unit_id, register, ..
            } => Some(ModbusAddress {
                unit_id: *unit_id,
                register: *register,
            }),
            _ => None,
        }
    }
}

/// Where a Modbus sensor's value lives on its server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModbusAddress {
    pub unit_id: u8,
    pub register: u16,
}

/// One physical communication channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Serial { port: String, baudrate: u32 },
    Tcp { host: String, port: u16 },
    Modbus { host: String, port: u16 },
}

impl Endpoint {
    pub fn kind(&self) -> ProtocolKind {
        match self {
            Endpoint::Serial { .. } => ProtocolKind::Serial,
            Endpoint::Tcp { .. } => ProtocolKind::Tcp,
            Endpoint::Modbus { .. } => ProtocolKind::Modbus,
        }
    }

    /// Canonical key; baudrate is a link setting, not part of the identity
    pub fn key(&self) -> EndpointKey {
        match self {
            Endpoint::Serial { port, .. } => EndpointKey(format!("serial:{port}")),
            Endpoint::Tcp { host, port } => EndpointKey(format!("tcp:{host}:{port}")),
            Endpoint::Modbus { host, port } => EndpointKey(format!("modbus:{host}:{port}")),
        }
    }

    /// `host:port` socket address for network endpoints
    pub fn socket_addr(&self) -> Option<String> {
        match self {
            Endpoint::Serial { .. } => None,
            Endpoint::Tcp { host, port } | Endpoint::Modbus { host, port } => {
                Some(format!("{host}:{port}"))
            },
        }
    }
}

/// Derived endpoint identity: `serial:<port>`, `tcp:<host>:<port>`, `modbus:<host>:<port>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointKey(String);

impl EndpointKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EndpointKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for EndpointKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
