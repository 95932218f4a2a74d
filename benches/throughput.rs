//! Hot-path benchmarks: framing, value decoding and read planning

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use voltage_meter_logger::{
    decode_frame, decode_group, decode_value, encode_read_request, BytePermutation, DataType,
    Parameter, ParameterSpec, ReadRequest, RegisterPlanner,
};

fn read_request(count: u16) -> ReadRequest {
    ReadRequest {
        transaction_id: 0x1234,
        unit_id: 1,
        function_code: 0x03,
        start: 3000,
        count,
    }
}

fn response_frame(request: &ReadRequest) -> Vec<u8> {
    let data_len = request.count as usize * 2;
    let length = (data_len + 3) as u16;
    let mut frame = Vec::with_capacity(7 + 2 + data_len);
    frame.extend_from_slice(&request.transaction_id.to_be_bytes());
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(request.unit_id);
    frame.push(request.function_code);
    frame.push(data_len as u8);
    frame.extend((0..data_len).map(|i| i as u8));
    frame
}

/// A realistic meter: every parameter, packed in pairs of registers
fn catalog() -> Vec<(Parameter, ParameterSpec)> {
    Parameter::ALL
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            let gap = if i % 5 == 4 { 6 } else { 0 };
            (p, ParameterSpec::new(3000 + i as u16 * 2 + gap, 2, DataType::Float))
        })
        .collect()
}

fn benchmark_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");

    group.bench_function("encode_read_request", |b| {
        let request = read_request(4);
        b.iter(|| encode_read_request(black_box(&request)))
    });

    for count in [2u16, 20, 125] {
        let request = read_request(count);
        let frame = response_frame(&request);
        group.bench_with_input(BenchmarkId::new("decode_frame", count), &frame, |b, frame| {
            b.iter(|| decode_frame(black_box(frame), &request))
        });
    }

    group.finish();
}

fn benchmark_values(c: &mut Criterion) {
    let mut group = c.benchmark_group("values");
    let swapped = BytePermutation::parse("3412").unwrap_or_default();
    let identity = BytePermutation::default();

    group.bench_function("float_word_swap", |b| {
        b.iter(|| decode_value(black_box(&[0x00, 0x00, 0x43, 0x65]), DataType::Float, &swapped, 1.0))
    });
    group.bench_function("u64_scaled", |b| {
        let span = [0, 0, 0, 0, 0x01, 0x02, 0x03, 0x04];
        b.iter(|| decode_value(black_box(&span), DataType::UnsignedInt, &identity, 0.001))
    });

    let specs = catalog();
    let groups = RegisterPlanner::new().plan(specs.iter().map(|(p, s)| (*p, s)));
    let data: Vec<u8> = (0..250u32).map(|i| (i % 7) as u8 + 0x40).collect();
    group.bench_function("decode_group_full_meter", |b| {
        b.iter(|| {
            for g in &groups {
                black_box(decode_group(g, &data));
            }
        })
    });

    group.finish();
}

fn benchmark_planning(c: &mut Criterion) {
    let specs = catalog();
    let planner = RegisterPlanner::new();

    c.bench_function("plan_full_meter", |b| {
        b.iter(|| planner.plan(black_box(&specs).iter().map(|(p, s)| (*p, s))))
    });
}

criterion_group!(benches, benchmark_framing, benchmark_values, benchmark_planning);
criterion_main!(benches);
