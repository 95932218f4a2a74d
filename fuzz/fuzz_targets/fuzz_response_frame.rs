#![no_main]

use libfuzzer_sys::fuzz_target;
use voltage_meter_logger::codec::{decode_frame, ReadRequest};
use voltage_meter_logger::MAX_READ_REGISTERS;

#[derive(Debug, arbitrary::Arbitrary)]
struct Input {
    transaction_id: u16,
    unit_id: u8,
    holding: bool,
    count: u8,
    frame: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let request = ReadRequest {
        transaction_id: input.transaction_id,
        unit_id: input.unit_id,
        function_code: if input.holding { 0x03 } else { 0x04 },
        start: 0,
        count: u16::from(input.count).min(MAX_READ_REGISTERS as u16),
    };

    if let Ok(data) = decode_frame(&input.frame, &request) {
        // Data never extends past the declared length
        assert!(data.len() + 9 <= input.frame.len());
    }
});
