#![no_main]

use libfuzzer_sys::fuzz_target;
use voltage_meter_logger::{decode_value, BytePermutation, DataType};

#[derive(Debug, arbitrary::Arbitrary)]
struct Input {
    span: Vec<u8>,
    kind: u8,
    order: Vec<u8>,
    scale: f64,
}

fuzz_target!(|input: Input| {
    let data_type = match input.kind % 3 {
        0 => DataType::UnsignedInt,
        1 => DataType::SignedInt,
        _ => DataType::Float,
    };
    let order = BytePermutation::new(&input.order).unwrap_or_default();

    if let Ok(value) = decode_value(&input.span, data_type, &order, input.scale) {
        assert!(value.is_finite());
    }
});
