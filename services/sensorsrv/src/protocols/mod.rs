//! Wire formats: newline-delimited JSON frames and Modbus/TCP

pub mod frame;
pub mod modbus;

pub use frame::{FrameCodec, FrameItem, RawReading};
