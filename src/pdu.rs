//! Stack-allocated Modbus PDU
//!
//! Requests are built with [`PduBuilder`]; responses are wrapped with
//! [`ModbusPdu::from_slice`] and inspected through the read-response
//! accessors.

use tracing::trace;

use crate::constants::{
    is_register_read, EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS,
    MAX_PDU_SIZE, MAX_READ_REGISTERS,
};
use crate::error::{MeterError, MeterResult};

/// PDU backed by a fixed array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Wrap a received PDU
    pub fn from_slice(data: &[u8]) -> MeterResult<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(MeterError::frame(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();

        match pdu.function_code() {
            Some(fc) if pdu.is_exception() => trace!(
                "PDU parsed: FC={:02X} ({}), exception_code={:02X}",
                fc,
                Self::function_code_description(fc),
                pdu.exception_code().unwrap_or(0)
            ),
            Some(fc) => trace!(
                "PDU parsed: FC={:02X} ({}), data_len={}",
                fc,
                Self::function_code_description(fc),
                pdu.len - 1
            ),
            None => trace!("PDU parsed: empty PDU"),
        }

        Ok(pdu)
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> MeterResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(MeterError::frame("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> MeterResult<()> {
        for b in value.to_be_bytes() {
            self.push(b)?;
        }
        Ok(())
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

    /// Function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    /// Whether the function code carries the exception flag
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    /// Exception code of an exception response
    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.as_slice().get(1).copied()
        } else {
            None
        }
    }

    /// Declared byte count of a read response
    #[inline]
    pub fn byte_count(&self) -> Option<usize> {
        if self.is_exception() {
            return None;
        }
        self.as_slice().get(1).map(|&n| n as usize)
    }

    /// Register data of a read response: exactly `byte_count` bytes, or
    /// `None` when the PDU is shorter than it claims.
    pub fn register_data(&self) -> Option<&[u8]> {
        let count = self.byte_count()?;
        self.as_slice().get(2..2 + count)
    }

    /// Human-readable function code description
    pub fn function_code_description(fc: u8) -> &'static str {
        match fc & !EXCEPTION_FLAG {
            FC_READ_HOLDING_REGISTERS => "Read Holding Registers",
            FC_READ_INPUT_REGISTERS => "Read Input Registers",
            _ => "Unknown Function",
        }
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// PDU builder - fluent API
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl Default for PduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PduBuilder {
    #[inline]
    pub fn new() -> Self {
        Self {
            pdu: ModbusPdu::new(),
        }
    }

    #[inline]
    pub fn function_code(mut self, fc: u8) -> MeterResult<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    #[inline]
    pub fn address(mut self, addr: u16) -> MeterResult<Self> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    #[inline]
    pub fn quantity(mut self, qty: u16) -> MeterResult<Self> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    #[inline]
    pub fn build(self) -> ModbusPdu {
        self.pdu
    }

    /// Build an FC03/FC04 read request PDU
    ///
    /// # Arguments
    /// * `fc` - Function code (3 or 4)
    /// * `start_address` - First register
    /// * `quantity` - Number of registers, 1..=125
    pub fn build_read_request(fc: u8, start_address: u16, quantity: u16) -> MeterResult<ModbusPdu> {
        if !is_register_read(fc) {
            return Err(MeterError::configuration(format!(
                "Unsupported function code 0x{:02X}: only register reads (0x03, 0x04)",
                fc
            )));
        }
        if quantity == 0 || quantity as usize > MAX_READ_REGISTERS {
            return Err(MeterError::configuration(format!(
                "Invalid register count {} (1..={})",
                quantity, MAX_READ_REGISTERS
            )));
        }
        if u32::from(start_address) + u32::from(quantity) > 0x1_0000 {
            return Err(MeterError::configuration(format!(
                "Register range {}+{} exceeds the address space",
                start_address, quantity
            )));
        }
        Ok(PduBuilder::new()
            .function_code(fc)?
            .address(start_address)?
            .quantity(quantity)?
            .build())
    }
}
