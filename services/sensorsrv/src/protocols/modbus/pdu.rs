//! Modbus PDU buffer
//!
//! Fixed-size stack array, so building a request per sensor per tick does
//! not allocate.

use tracing::trace;

use super::constants::{EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, MAX_PDU_SIZE};
use crate::error::{Result, SensorSrvError};

/// Function code plus payload
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(SensorSrvError::decode(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }
        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(pdu)
    }

    #[inline]
    pub fn push(&mut self, byte: u8) -> Result<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(SensorSrvError::decode("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> Result<()> {
        let [hi, lo] = value.to_be_bytes();
        self.push(hi)?;
        self.push(lo)
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        (self.len > 0).then(|| self.data[0])
    }

    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    pub fn exception_code(&self) -> Option<u8> {
        (self.is_exception() && self.len > 1).then(|| self.data[1])
    }

    /// Big-endian u16 at `offset`
    pub fn read_u16(&self, offset: usize) -> Result<u16> {
        match self.as_slice().get(offset..offset + 2) {
            Some(&[hi, lo]) => Ok(u16::from_be_bytes([hi, lo])),
            _ => Err(SensorSrvError::decode(format!(
                "PDU too short: need {} bytes, have {}",
                offset + 2,
                self.len
            ))),
        }
    }

    pub(crate) fn describe(fc: u8) -> &'static str {
        match fc & !EXCEPTION_FLAG {
            FC_READ_HOLDING_REGISTERS => "Read Holding Registers",
            0x04 => "Read Input Registers",
            0x06 => "Write Single Register",
            0x10 => "Write Multiple Registers",
            _ => "Unknown Function",
        }
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent PDU construction
#[derive(Debug, Default)]
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl PduBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function_code(mut self, fc: u8) -> Result<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    pub fn address(mut self, addr: u16) -> Result<Self> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    pub fn quantity(mut self, qty: u16) -> Result<Self> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    pub fn byte(mut self, b: u8) -> Result<Self> {
        self.pdu.push(b)?;
        Ok(self)
    }

    pub fn word(mut self, value: u16) -> Result<Self> {
        self.pdu.push_u16(value)?;
        Ok(self)
    }

    pub fn build(self) -> ModbusPdu {
        if let Some(fc) = self.pdu.function_code() {
            trace!(
                "PDU built: FC={:02X} ({}), len={}",
                fc,
                ModbusPdu::describe(fc),
                self.pdu.len()
            );
        }
        self.pdu
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_builder_read_request_layout() {
        let pdu = PduBuilder::new()
            .function_code(FC_READ_HOLDING_REGISTERS)
            .unwrap()
            .address(0x0100)
            .unwrap()
            .quantity(1)
            .unwrap()
            .build();
        assert_eq!(pdu.as_slice(), &[0x03, 0x01, 0x00, 0x00, 0x01]);
        assert!(!pdu.is_exception());
    }

    #[test]
    fn test_exception_detection() {
        let pdu = ModbusPdu::from_slice(&[0x83, 0x02]).unwrap();
        assert!(pdu.is_exception());
        assert_eq!(pdu.exception_code(), Some(0x02));
        assert_eq!(ModbusPdu::describe(0x83), "Read Holding Registers");
    }

    #[test]
    fn test_read_u16_bounds() {
        let pdu = ModbusPdu::from_slice(&[0x03, 0x02, 0x01, 0xC7]).unwrap();
        assert_eq!(pdu.read_u16(2).unwrap(), 455);
        assert!(pdu.read_u16(3).is_err());
    }

    #[test]
    fn test_overflow_rejected() {
        assert!(ModbusPdu::from_slice(&[0u8; MAX_PDU_SIZE + 1]).is_err());
        let mut pdu = ModbusPdu::from_slice(&[0u8; MAX_PDU_SIZE]).unwrap();
        assert!(pdu.push(1).is_err());
        assert!(!pdu.is_empty());
    }
}
