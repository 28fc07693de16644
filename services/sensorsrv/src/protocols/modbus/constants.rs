//! Modbus/TCP frame constants

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Bytes before the length-counted part: Transaction ID(2) + Protocol ID(2) + Length(2)
pub const MBAP_PREFIX_LEN: usize = 6;

/// Full MBAP header including the Unit ID byte
pub const MBAP_HEADER_LEN: usize = MBAP_PREFIX_LEN + 1;

/// Maximum PDU size per the Modbus application protocol
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Protocol identifier carried by every Modbus/TCP frame
pub const MODBUS_PROTOCOL_ID: u16 = 0;

// ============================================================================
// Function Codes
// ============================================================================

pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

// ============================================================================
// Read Request Layout
// ============================================================================

/// Each sensor occupies exactly one holding register
pub const READ_QUANTITY: u16 = 1;

/// FC(1) + Address(2) + Quantity(2)
pub const READ_REQUEST_PDU_LEN: usize = 5;

/// FC(1) + Byte count(1) + Register(2)
pub const READ_RESPONSE_PDU_LEN: usize = 4;

/// Register value scale: business value = signed register / 10
pub const VALUE_SCALE: f64 = 10.0;

/// Total frame size for a PDU of the given length
#[inline]
pub const fn mbap_frame_size(pdu_len: usize) -> usize {
    MBAP_HEADER_LEN + pdu_len
}
