//! Benchmarks for PMD stream decoding and PFTP reassembly
//!
//! Measures the per-notification cost of the hot paths:
//! - Raw ECG frames at a full ATT payload
//! - Delta-compressed ECG and accelerometer frames
//! - Reassembling a fragmented PFTP response
//!
//! Platform: Cross-platform (synthetic device frames, CI-safe)

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use polar_ble::pftp::rfc76::Reassembler;
use polar_ble::pmd::StreamDecoder;
use polar_ble::test_utils::{delta_payload, frame_bytes, rfc76_fragments};
use polar_ble::types::{PmdMeasurementType, PmdSetting, SettingType};
use std::collections::BTreeMap;
use std::hint::black_box;

const FRAME_INTERVAL_NS: u64 = 561_538_461;

fn settings(sample_rate: u32) -> PmdSetting {
    PmdSetting::from_selected(BTreeMap::from([(SettingType::SampleRate, sample_rate)]))
}

fn raw_ecg_frame(timestamp: u64) -> Vec<u8> {
    let payload: Vec<u8> = (0..73i32).flat_map(|i| (i * 7 - 250).to_le_bytes()[..3].to_vec()).collect();
    frame_bytes(PmdMeasurementType::Ecg, timestamp, 0x00, &payload)
}

fn compressed_frame(measurement_type: PmdMeasurementType, channels: usize, resolution: u32) -> Vec<u8> {
    let reference = vec![-120; channels];
    let deltas: Vec<Vec<i32>> = (0..60).map(|i| vec![(i % 9) - 4; channels]).collect();
    frame_bytes(measurement_type, FRAME_INTERVAL_NS, 0x80, &delta_payload(&reference, resolution, 5, &deltas))
}

fn bench_raw_decode(c: &mut Criterion) {
    let frames: Vec<Vec<u8>> = (1..=16).map(|i| raw_ecg_frame(i * FRAME_INTERVAL_NS)).collect();

    let mut group = c.benchmark_group("raw_decode");
    group.throughput(Throughput::Bytes(frames[0].len() as u64));

    group.bench_function("ecg_frame_sequence", |b| {
        b.iter(|| {
            let mut decoder = StreamDecoder::new(PmdMeasurementType::Ecg, &settings(130));
            for frame in &frames {
                black_box(decoder.decode(black_box(frame)).ok());
            }
        })
    });

    group.finish();
}

fn bench_delta_decode(c: &mut Criterion) {
    let ecg = compressed_frame(PmdMeasurementType::Ecg, 1, 14);
    let acc = compressed_frame(PmdMeasurementType::Acc, 3, 16);

    let mut group = c.benchmark_group("delta_decode");

    group.bench_function("ecg_compressed", |b| {
        let mut decoder = StreamDecoder::new(PmdMeasurementType::Ecg, &settings(130));
        b.iter(|| black_box(decoder.decode(black_box(&ecg)).ok()))
    });

    group.bench_function("acc_compressed", |b| {
        let mut decoder = StreamDecoder::new(PmdMeasurementType::Acc, &settings(52));
        b.iter(|| black_box(decoder.decode(black_box(&acc)).ok()))
    });

    group.finish();
}

fn bench_pftp_reassembly(c: &mut Criterion) {
    let message: Vec<u8> = (0..4096u32).map(|i| i as u8).collect();
    let fragments = rfc76_fragments(&message, 240);

    let mut group = c.benchmark_group("pftp_reassembly");
    group.throughput(Throughput::Bytes(message.len() as u64));

    group.bench_function("4k_response_mtu_244", |b| {
        b.iter(|| {
            let mut reassembler = Reassembler::new();
            let mut complete = None;
            for fragment in &fragments {
                complete = reassembler.push(black_box(fragment)).ok().flatten();
            }
            black_box(complete)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_raw_decode, bench_delta_decode, bench_pftp_reassembly);
criterion_main!(benches);
