//! Benchmarks for frame reconstruction throughput
//!
//! Runs decoded frames through the pipeline (sequence and clock checks,
//! SRI merge, batching) to estimate the sustainable frame rate of the
//! reconstruction task.
//!
//! Platform: Cross-platform (synthetic packets, CI-safe)

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use sdds_source::pipeline::Pipeline;
use sdds_source::status::StatusCounters;
use sdds_source::test_utils::FrameGenerator;
use sdds_source::{Frame, PacketCodec, SessionConfig};
use std::hint::black_box;
use std::sync::Arc;
use tokio::sync::watch;

const FRAMES: usize = 2046;

fn decoded_frames(bits_per_sample: u8) -> Vec<Frame> {
    let mut generator = FrameGenerator::new(25e6, bits_per_sample);
    (0..FRAMES)
        .map(|index| {
            PacketCodec::decode(&generator.next_packet(), index as u64)
                .expect("generated packet is valid")
        })
        .collect()
}

fn new_pipeline(config: &SessionConfig) -> Pipeline {
    let (_tx, rx) = watch::channel(None);
    Pipeline::new("bench", config, rx, Arc::new(StatusCounters::new()))
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Elements(FRAMES as u64));

    for (name, bits, push) in [
        ("octet_push_1000", 8, 1000),
        ("short_push_1000", 16, 1000),
        ("short_push_32", 16, 32),
    ] {
        let frames = decoded_frames(bits);
        let config = SessionConfig { sdds_pkts_per_bulkio_push: push, ..SessionConfig::default() };

        group.bench_function(name, |b| {
            b.iter_batched(
                || new_pipeline(&config),
                |mut pipeline| {
                    let mut pushes = 0;
                    for frame in &frames {
                        pushes += pipeline.handle_frame(black_box(frame)).len();
                    }
                    pushes += pipeline.finish().len();
                    black_box(pushes)
                },
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
