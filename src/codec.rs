//! # Modbus TCP Frame Codec
//!
//! Encodes read requests into MBAP frames and validates/decodes the
//! responses.
//!
//! ## Frame Layout
//!
//! ```text
//! request:  [tid_hi tid_lo][0x00 0x00][len_hi len_lo][unit][fc][addr_hi addr_lo][cnt_hi cnt_lo]
//! response: [tid_hi tid_lo][0x00 0x00][len_hi len_lo][unit][fc][byte_count][data ...]
//! error:    [tid_hi tid_lo][0x00 0x00][len_hi len_lo][unit][fc | 0x80][exception_code]
//! ```
//!
//! `len` counts the unit id plus the PDU, so after the 7-byte header exactly
//! `len - 1` bytes remain.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::{
    EXCEPTION_FLAG, MAX_MBAP_LENGTH, MBAP_HEADER_LEN, MIN_RESPONSE_MBAP_LENGTH,
};
use crate::error::{MeterError, MeterResult};
use crate::pdu::{ModbusPdu, PduBuilder};

/// The 7-byte MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    /// Parse the first 7 bytes of `buf`
    pub fn parse(buf: &[u8]) -> MeterResult<Self> {
        if buf.len() < MBAP_HEADER_LEN {
            return Err(MeterError::frame(format!(
                "short MBAP header: {} of {} bytes",
                buf.len(),
                MBAP_HEADER_LEN
            )));
        }
        Ok(Self {
            transaction_id: u16::from_be_bytes([buf[0], buf[1]]),
            protocol_id: u16::from_be_bytes([buf[2], buf[3]]),
            length: u16::from_be_bytes([buf[4], buf[5]]),
            unit_id: buf[6],
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.transaction_id);
        dst.put_u16(self.protocol_id);
        dst.put_u16(self.length);
        dst.put_u8(self.unit_id);
    }

    /// Bytes that follow the header (the unit id is already consumed)
    #[inline]
    pub fn remaining_len(&self) -> usize {
        (self.length as usize).saturating_sub(1)
    }

    /// Check a response header against the transaction just sent and return
    /// the number of PDU bytes still to read.
    pub fn check_response(&self, expected_transaction_id: u16) -> MeterResult<usize> {
        if self.transaction_id != expected_transaction_id {
            return Err(MeterError::frame(format!(
                "transaction id mismatch: expected {}, got {}",
                expected_transaction_id, self.transaction_id
            )));
        }
        if self.protocol_id != 0 {
            return Err(MeterError::frame(format!(
                "invalid protocol id {}",
                self.protocol_id
            )));
        }
        let length = self.length as usize;
        if !(MIN_RESPONSE_MBAP_LENGTH..=MAX_MBAP_LENGTH).contains(&length) {
            return Err(MeterError::frame(format!("invalid MBAP length {}", length)));
        }
        Ok(self.remaining_len())
    }
}

/// One FC03/FC04 register read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub function_code: u8,
    pub start: u16,
    pub count: u16,
}

/// Encode a read request as a complete MBAP frame.
///
/// # Example
///
/// ```rust
/// use voltage_meter_logger::codec::{encode_read_request, ReadRequest};
///
/// let frame = encode_read_request(&ReadRequest {
///     transaction_id: 1,
///     unit_id: 1,
///     function_code: 0x04,
///     start: 100,
///     count: 4,
/// }).unwrap();
/// assert_eq!(&frame[..], &[0, 1, 0, 0, 0, 6, 1, 0x04, 0, 100, 0, 4]);
/// ```
pub fn encode_read_request(request: &ReadRequest) -> MeterResult<Bytes> {
    let pdu = PduBuilder::build_read_request(request.function_code, request.start, request.count)?;
    let header = MbapHeader {
        transaction_id: request.transaction_id,
        protocol_id: 0,
        length: pdu.len() as u16 + 1,
        unit_id: request.unit_id,
    };

    let mut buf = BytesMut::with_capacity(MBAP_HEADER_LEN + pdu.len());
    header.encode(&mut buf);
    buf.put_slice(pdu.as_slice());
    Ok(buf.freeze())
}

/// Decode the PDU of a read response and return only its data bytes.
///
/// Exception responses become [`MeterError::Exception`]; a wrong function
/// code or a byte count larger than the data received is a frame error.
pub fn decode_read_response(expected_fc: u8, pdu: &[u8]) -> MeterResult<Bytes> {
    let pdu = ModbusPdu::from_slice(pdu)?;
    let fc = pdu
        .function_code()
        .ok_or_else(|| MeterError::frame("empty response PDU"))?;

    if pdu.is_exception() {
        let code = pdu
            .exception_code()
            .ok_or_else(|| MeterError::frame("exception response without exception code"))?;
        return Err(MeterError::exception(fc & !EXCEPTION_FLAG, code));
    }

    if fc != expected_fc {
        return Err(MeterError::frame(format!(
            "function code mismatch: expected 0x{:02X}, got 0x{:02X}",
            expected_fc, fc
        )));
    }

    let data = pdu.register_data().ok_or_else(|| {
        MeterError::frame(format!(
            "byte count {} exceeds {} received bytes",
            pdu.byte_count().unwrap_or(0),
            pdu.len().saturating_sub(2)
        ))
    })?;

    Ok(Bytes::copy_from_slice(data))
}

/// Decode a buffered response frame against the request that produced it.
///
/// Reads exactly the length the header declares; anything shorter is a
/// frame error and trailing bytes are left untouched.
pub fn decode_frame(frame: &[u8], request: &ReadRequest) -> MeterResult<Bytes> {
    let header = MbapHeader::parse(frame)?;
    let remaining = header.check_response(request.transaction_id)?;

    let body = &frame[MBAP_HEADER_LEN..];
    if body.len() < remaining {
        return Err(MeterError::frame(format!(
            "short frame: {} of {} PDU bytes",
            body.len(),
            remaining
        )));
    }

    decode_read_response(request.function_code, &body[..remaining])
}
