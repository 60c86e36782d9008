//! Criterion benchmarks for frame fan-out
//!
//! Measures:
//! - Dispatch cost as the destination count grows
//! - Queue drain throughput on the playback side

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

use audio_duplicator::audio::{create_shared_queue, AudioFrame, FanOut};

/// One default-rate stereo callback worth of samples
const BLOCK: usize = 960;

fn bench_dispatch_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout_dispatch");
    group.throughput(Throughput::Elements(BLOCK as u64));

    for destinations in 1..=5usize {
        let queues: Vec<_> = (0..destinations).map(|_| create_shared_queue(64)).collect();
        let fanout = FanOut::new(queues.clone());
        let samples: Arc<[f32]> = vec![0.25f32; BLOCK].into();

        group.bench_with_input(
            BenchmarkId::from_parameter(destinations),
            &destinations,
            |b, _| {
                let mut sequence = 0u32;
                b.iter(|| {
                    fanout.dispatch(AudioFrame::new(Arc::clone(&samples), 2, sequence));
                    sequence = sequence.wrapping_add(1);
                    // Drain so the dispatch path never hits overflow
                    for queue in &queues {
                        black_box(queue.try_pop());
                    }
                });
            },
        );
    }
    group.finish();
}

fn bench_queue_drain(c: &mut Criterion) {
    let queue = create_shared_queue(64);
    let samples: Arc<[f32]> = vec![0.5f32; BLOCK].into();

    c.bench_function("queue_push_pop", |b| {
        let mut sequence = 0u32;
        b.iter(|| {
            queue.push(AudioFrame::new(Arc::clone(&samples), 2, sequence));
            sequence = sequence.wrapping_add(1);
            black_box(queue.pop())
        });
    });
}

criterion_group!(benches, bench_dispatch_scaling, bench_queue_drain);
criterion_main!(benches);
