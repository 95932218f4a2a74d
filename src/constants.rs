//! Modbus TCP constants used by the acquisition pipeline
//!
//! Only the read side of the protocol is needed here: FC03/FC04 requests
//! and their responses, framed by the 7-byte MBAP header.

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header length as read off the wire
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) + Unit ID(1) = 7 bytes
pub const MBAP_HEADER_LEN: usize = 7;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Smallest legal MBAP length field for a response: Unit ID + at least
/// function code and one more byte (byte count or exception code).
pub const MIN_RESPONSE_MBAP_LENGTH: usize = 3;

/// Read request PDU: Function Code(1) + Start Address(2) + Quantity(2)
pub const READ_REQUEST_PDU_LEN: usize = 5;

/// Maximum number of registers for FC03/FC04 (Read Holding/Input Registers)
///
/// Response PDU: Function Code(1) + Byte Count(1) + N × 2 ≤ 253
/// → N ≤ 125
pub const MAX_READ_REGISTERS: usize = 125;

/// Bytes per Modbus register
pub const REGISTER_BYTES: usize = 2;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// High bit set on the echoed function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

/// Acknowledge
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;

/// Server Device Busy
pub const EXCEPTION_SERVER_DEVICE_BUSY: u8 = 0x06;

/// Memory Parity Error
pub const EXCEPTION_MEMORY_PARITY_ERROR: u8 = 0x08;

/// Gateway Path Unavailable
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

/// Human-readable name of a Modbus exception code
pub fn exception_description(code: u8) -> &'static str {
    match code {
        EXCEPTION_ILLEGAL_FUNCTION => "Illegal function",
        EXCEPTION_ILLEGAL_DATA_ADDRESS => "Illegal data address",
        EXCEPTION_ILLEGAL_DATA_VALUE => "Illegal data value",
        EXCEPTION_SERVER_DEVICE_FAILURE => "Server device failure",
        EXCEPTION_ACKNOWLEDGE => "Acknowledge",
        EXCEPTION_SERVER_DEVICE_BUSY => "Server device busy",
        EXCEPTION_MEMORY_PARITY_ERROR => "Memory parity error",
        EXCEPTION_GATEWAY_PATH_UNAVAILABLE => "Gateway path unavailable",
        EXCEPTION_GATEWAY_TARGET_FAILED => "Gateway target device failed to respond",
        _ => "Unknown exception",
    }
}

/// Whether a function code is one of the register reads this crate issues
#[inline]
pub fn is_register_read(function_code: u8) -> bool {
    matches!(
        function_code,
        FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS
    )
}
