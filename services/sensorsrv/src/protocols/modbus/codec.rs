//! Modbus/TCP framing for FC03 single-register reads
//!
//! Request:  MBAP(tid, proto=0, len=6, unit) + [0x03, addr_hi, addr_lo, 0x00, 0x01]
//! Response: MBAP(tid, proto=0, len=5, unit) + [0x03, 0x02, reg_hi, reg_lo]
//!
//! The register is a two's-complement i16 scaled by 1/10.

use super::constants::{
    self, EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, MAX_MBAP_LENGTH, MBAP_HEADER_LEN,
    MBAP_PREFIX_LEN, MODBUS_PROTOCOL_ID, READ_QUANTITY, VALUE_SCALE,
};
use super::pdu::{ModbusPdu, PduBuilder};
use crate::error::{Result, SensorSrvError};

/// Modbus Application Protocol header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Unit ID + PDU byte count
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn for_pdu(transaction_id: u16, unit_id: u8, pdu_len: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: MODBUS_PROTOCOL_ID,
            length: (pdu_len + 1) as u16,
            unit_id,
        }
    }

    pub fn to_bytes(&self) -> [u8; MBAP_HEADER_LEN] {
        let [t0, t1] = self.transaction_id.to_be_bytes();
        let [p0, p1] = self.protocol_id.to_be_bytes();
        let [l0, l1] = self.length.to_be_bytes();
        [t0, t1, p0, p1, l0, l1, self.unit_id]
    }

    /// Parse and validate the 7-byte header
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let &[t0, t1, p0, p1, l0, l1, unit_id, ..] = bytes else {
            return Err(SensorSrvError::decode(format!(
                "MBAP header too short: {} bytes",
                bytes.len()
            )));
        };
        let header = Self {
            transaction_id: u16::from_be_bytes([t0, t1]),
            protocol_id: u16::from_be_bytes([p0, p1]),
            length: u16::from_be_bytes([l0, l1]),
            unit_id,
        };
        header.validate()?;
        Ok(header)
    }

    /// Length check alone; used after reading just the 6-byte prefix
    pub fn body_len(prefix: &[u8; MBAP_PREFIX_LEN]) -> Result<usize> {
        let protocol_id = u16::from_be_bytes([prefix[2], prefix[3]]);
        if protocol_id != MODBUS_PROTOCOL_ID {
            return Err(SensorSrvError::decode(format!(
                "Invalid protocol id: {protocol_id}"
            )));
        }
        let length = u16::from_be_bytes([prefix[4], prefix[5]]) as usize;
        if length < 2 || length > MAX_MBAP_LENGTH {
            return Err(SensorSrvError::decode(format!(
                "Invalid MBAP length: {length}"
            )));
        }
        Ok(length)
    }

    fn validate(&self) -> Result<()> {
        if self.protocol_id != MODBUS_PROTOCOL_ID {
            return Err(SensorSrvError::decode(format!(
                "Invalid protocol id: {}",
                self.protocol_id
            )));
        }
        let length = self.length as usize;
        if length < 2 || length > MAX_MBAP_LENGTH {
            return Err(SensorSrvError::decode(format!(
                "Invalid MBAP length: {length}"
            )));
        }
        Ok(())
    }

    /// PDU size implied by the length field
    pub fn pdu_len(&self) -> usize {
        (self.length as usize).saturating_sub(1)
    }
}

/// FC03 request/response encoding and register scaling
pub struct ModbusCodec;

impl ModbusCodec {
    pub fn build_read_pdu(register: u16) -> Result<ModbusPdu> {
        Ok(PduBuilder::new()
            .function_code(FC_READ_HOLDING_REGISTERS)?
            .address(register)?
            .quantity(READ_QUANTITY)?
            .build())
    }

    /// Complete request frame for one sensor
    pub fn encode_read_request(transaction_id: u16, unit_id: u8, register: u16) -> Result<Vec<u8>> {
        let pdu = Self::build_read_pdu(register)?;
        Ok(Self::frame(transaction_id, unit_id, &pdu))
    }

    /// Complete response frame carrying one register
    pub fn encode_read_response(transaction_id: u16, unit_id: u8, raw: u16) -> Result<Vec<u8>> {
        let pdu = PduBuilder::new()
            .function_code(FC_READ_HOLDING_REGISTERS)?
            .byte(2)?
            .word(raw)?
            .build();
        Ok(Self::frame(transaction_id, unit_id, &pdu))
    }

    pub fn encode_exception(
        transaction_id: u16,
        unit_id: u8,
        function_code: u8,
        exception_code: u8,
    ) -> Result<Vec<u8>> {
        let pdu = PduBuilder::new()
            .function_code(function_code | EXCEPTION_FLAG)?
            .byte(exception_code)?
            .build();
        Ok(Self::frame(transaction_id, unit_id, &pdu))
    }

    fn frame(transaction_id: u16, unit_id: u8, pdu: &ModbusPdu) -> Vec<u8> {
        let header = MbapHeader::for_pdu(transaction_id, unit_id, pdu.len());
        let mut out = Vec::with_capacity(constants::mbap_frame_size(pdu.len()));
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(pdu.as_slice());
        out
    }

    /// Split a full frame into header and PDU
    pub fn split_frame(frame: &[u8]) -> Result<(MbapHeader, ModbusPdu)> {
        let header = MbapHeader::parse(frame)?;
        let end = MBAP_HEADER_LEN + header.pdu_len();
        let body = frame.get(MBAP_HEADER_LEN..end).ok_or_else(|| {
            SensorSrvError::decode(format!(
                "Frame truncated: {} bytes, header declares {}",
                frame.len(),
                end
            ))
        })?;
        Ok((header, ModbusPdu::from_slice(body)?))
    }

    /// Raw register from an FC03 response PDU
    pub fn parse_read_response(pdu: &ModbusPdu) -> Result<u16> {
        let Some(fc) = pdu.function_code() else {
            return Err(SensorSrvError::decode("Empty response PDU"));
        };
        if pdu.is_exception() {
            return Err(SensorSrvError::decode(format!(
                "Modbus exception: FC={:02X} code={:02X}",
                fc & !EXCEPTION_FLAG,
                pdu.exception_code().unwrap_or(0)
            )));
        }
        if fc != FC_READ_HOLDING_REGISTERS {
            return Err(SensorSrvError::decode(format!(
                "Function code mismatch: expected {FC_READ_HOLDING_REGISTERS:02X}, got {fc:02X}"
            )));
        }
        let byte_count = pdu.as_slice().get(1).copied().unwrap_or(0);
        if byte_count != 2 {
            return Err(SensorSrvError::decode(format!(
                "Unexpected byte count: {byte_count}"
            )));
        }
        pdu.read_u16(2)
    }

    /// Two's-complement aware scaling: 455 -> 45.5, 55546 -> -999.0
    pub fn decode_register(raw: u16) -> f64 {
        f64::from(raw as i16) / VALUE_SCALE
    }

    /// Inverse of `decode_register`; rejects values outside the i16 range
    pub fn encode_value(value: f64) -> Result<u16> {
        let scaled = (value * VALUE_SCALE).round();
        if !scaled.is_finite() || scaled < f64::from(i16::MIN) || scaled > f64::from(i16::MAX) {
            return Err(SensorSrvError::decode(format!(
                "Value {value} does not fit a scaled register"
            )));
        }
        Ok((scaled as i16) as u16)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_request_frame_layout() {
        let frame = ModbusCodec::encode_read_request(0x0102, 7, 40).unwrap();
        assert_eq!(
            frame,
            vec![0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0x07, 0x03, 0x00, 0x28, 0x00, 0x01]
        );
    }

    #[test]
    fn test_response_round_trip_positive_and_sentinel() {
        for (value, raw) in [(45.5, 455u16), (-999.0, 55546u16)] {
            let encoded = ModbusCodec::encode_value(value).unwrap();
            assert_eq!(encoded, raw);

            let frame = ModbusCodec::encode_read_response(9, 1, encoded).unwrap();
            let (header, pdu) = ModbusCodec::split_frame(&frame).unwrap();
            assert_eq!(header.transaction_id, 9);
            assert_eq!(header.unit_id, 1);
            let decoded = ModbusCodec::decode_register(ModbusCodec::parse_read_response(&pdu).unwrap());
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_decode_register_boundaries() {
        assert_eq!(ModbusCodec::decode_register(0), 0.0);
        assert_eq!(ModbusCodec::decode_register(32767), 3276.7);
        assert_eq!(ModbusCodec::decode_register(32768), -3276.8);
        assert_eq!(ModbusCodec::decode_register(65535), -0.1);
    }

    #[test]
    fn test_encode_value_out_of_range() {
        assert!(ModbusCodec::encode_value(4000.0).is_err());
        assert!(ModbusCodec::encode_value(f64::NAN).is_err());
    }

    #[test]
    fn test_exception_response_is_decode_error() {
        let frame =
            ModbusCodec::encode_exception(3, 1, FC_READ_HOLDING_REGISTERS, 0x02).unwrap();
        let (_, pdu) = ModbusCodec::split_frame(&frame).unwrap();
        let err = ModbusCodec::parse_read_response(&pdu).unwrap_err();
        assert!(matches!(err, SensorSrvError::DecodeError(ref m) if m.contains("exception")));
    }

    #[test]
    fn test_malformed_frames_rejected() {
        // Wrong protocol id
        let bad_proto = [0, 1, 0, 1, 0, 5, 1, 3, 2, 0, 1];
        assert!(ModbusCodec::split_frame(&bad_proto).is_err());

        // Truncated body
        let truncated = [0, 1, 0, 0, 0, 5, 1, 3, 2];
        assert!(ModbusCodec::split_frame(&truncated).is_err());

        // Wrong byte count
        let pdu = ModbusPdu::from_slice(&[0x03, 0x04, 0, 1, 0, 2]).unwrap();
        assert!(ModbusCodec::parse_read_response(&pdu).is_err());

        // Wrong function code
        let pdu = ModbusPdu::from_slice(&[0x04, 0x02, 0, 1]).unwrap();
        assert!(ModbusCodec::parse_read_response(&pdu).is_err());
    }

    #[test]
    fn test_body_len_validation() {
        assert_eq!(MbapHeader::body_len(&[0, 1, 0, 0, 0, 5]).unwrap(), 5);
        assert!(MbapHeader::body_len(&[0, 1, 0, 0, 0, 0]).is_err());
        assert!(MbapHeader::body_len(&[0, 1, 0, 0, 1, 0]).is_err());
    }
}
