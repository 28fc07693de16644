//! Modbus/TCP read-holding-register support
//!
//! Only FC03 with a quantity of one register is used: each sensor maps to a
//! single scaled register on its unit.

pub mod codec;
pub mod constants;
pub mod pdu;
pub mod simulator;

pub use codec::{MbapHeader, ModbusCodec};
pub use pdu::{ModbusPdu, PduBuilder};
pub use simulator::ModbusSimulator;
