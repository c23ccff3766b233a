//! # Telemetry Decode Benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use comms_if::eqpt::gecko::{self, ErrorStatus, StatusFlags, StatusPacket};
use gecko_lib::{gripper_state::StateWatch, sim::SimGripper, sim::SimGripperConfig};
use std::sync::Arc;

fn decode_benchmark(c: &mut Criterion) {
    // ---- Build a status packet ----

    let packet = StatusPacket::new(
        1234,
        StatusFlags::from_word(0x0129),
        250,
        7,
        ErrorStatus::InstrSDWrite,
    );
    let slots = packet.to_slots();
    let bytes = gecko::slots_to_bytes(&slots);

    c.bench_function("gecko::decode", |b| {
        b.iter(|| gecko::decode(black_box(&slots)).unwrap())
    });

    c.bench_function("gecko::slots_from_bytes + decode", |b| {
        b.iter(|| {
            let slots = gecko::slots_from_bytes(black_box(&bytes)).unwrap();
            gecko::decode(&slots).unwrap()
        })
    });

    // Decode and apply under the state lock, as the telemetry thread does
    let watch = Arc::new(StateWatch::new());
    let gripper = SimGripper::new(watch.clone(), SimGripperConfig::default());
    c.bench_function("StateWatch::apply", |b| {
        b.iter(|| watch.apply(&gecko::decode(black_box(&slots))))
    });
    c.bench_function("SimGripper::emit_status", |b| b.iter(|| gripper.emit_status()));
}

criterion_group!(benches, decode_benchmark);
criterion_main!(benches);
