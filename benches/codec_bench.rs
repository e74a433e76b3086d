//! Criterion benchmarks for the frame codec and stream framing
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use groundbus::codec::{default_registry, BitCursor, BitWriter, MessageId, Priority, Record, Value};
use groundbus::protocol::{Decoder, Encoder, Message};
use serde_json::json;

fn raw_id(message_type: u16) -> u32 {
    MessageId {
        priority: Priority::Medium,
        message_type,
        board_type: 0x07,
        board_instance: 1,
    }
    .to_raw()
}

fn bench_bit_cursor(c: &mut Criterion) {
    let mut group = c.benchmark_group("bit_cursor");
    let frame = [0x12u8, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];
    group.throughput(Throughput::Bytes(frame.len() as u64));

    group.bench_function("take_odd_widths", |b| {
        b.iter(|| {
            let mut cursor = BitCursor::new(black_box(&frame));
            let mut sum = 0u64;
            for width in [3, 5, 12, 4, 24, 16] {
                sum += cursor.take_uint(width).unwrap_or(0);
            }
            black_box(sum)
        });
    });

    group.bench_function("put_odd_widths", |b| {
        b.iter(|| {
            let mut writer = BitWriter::new();
            for (value, width) in [(5u64, 3), (17, 5), (0x123, 12), (6, 4), (0xABCDEF, 24), (0xFFFF, 16)] {
                writer.put_uint(black_box(value), width);
            }
            black_box(writer.into_bytes())
        });
    });

    group.finish();
}

fn bench_registry(c: &mut Criterion) {
    let registry = default_registry().expect("static tables are valid");
    let mut group = c.benchmark_group("registry");
    group.throughput(Throughput::Elements(1));

    let temp_id = raw_id(0x2A);
    let temp_payload = [0u8, 0, 5, 2, 0xFF, 0xFA, 0x00];
    group.bench_function("decode_sensor_temp", |b| {
        b.iter(|| black_box(registry.decode(black_box(temp_id), black_box(&temp_payload))));
    });

    group.bench_function("decode_to_payload", |b| {
        b.iter(|| {
            let frame = registry.decode(temp_id, &temp_payload).unwrap();
            black_box(frame.to_payload())
        });
    });

    let unknown_id = raw_id(0x1FF);
    group.bench_function("decode_unknown", |b| {
        b.iter(|| black_box(registry.decode(black_box(unknown_id), &[1, 2, 3])));
    });

    let record = Record::new()
        .with("time", Value::Int(5))
        .with("sensor_id", Value::Int(2))
        .with("temperature", Value::Float(-1.5));
    group.bench_function("encode_sensor_temp", |b| {
        b.iter(|| {
            black_box(registry.encode("SENSOR_TEMP", "SENSOR", 1, Priority::Medium, black_box(&record)))
        });
    });

    group.finish();
}

fn bench_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");
    let msg = Message::with_timestamp(
        "DAQ",
        1_700_000_000.5,
        json!({"data": {"PT1": [1.0, 2.0, 3.0], "TC1": [20.5]}}),
    );

    group.throughput(Throughput::Elements(1));
    group.bench_function("encode_message", |b| {
        let mut encoder = Encoder::new(4096);
        b.iter(|| {
            encoder.reset();
            black_box(encoder.encode_message(black_box(&msg)).map(<[u8]>::len))
        });
    });

    let mut encoder = Encoder::new(64 * 1024);
    for _ in 0..100 {
        encoder.encode_message(&msg).expect("message fits in a frame");
    }
    let stream = encoder.as_bytes().to_vec();

    group.throughput(Throughput::Elements(100));
    group.bench_function("decode_batch_100", |b| {
        b.iter(|| {
            let mut decoder = Decoder::new(black_box(&stream));
            let mut count = 0;
            while let Ok(Some(frame)) = decoder.next() {
                black_box(frame.to_message().is_ok());
                count += 1;
            }
            black_box(count)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_bit_cursor, bench_registry, bench_framing);
criterion_main!(benches);
