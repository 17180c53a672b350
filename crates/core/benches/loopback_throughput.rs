// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use labwired_uart_config::StimulusMode;

#[path = "support/workload.rs"]
mod workload;

fn bench_loopback(c: &mut Criterion) {
    let mut group = c.benchmark_group("loopback");
    for len in [16usize, 256, 4096] {
        group.throughput(Throughput::Bytes(len as u64));
        for (label, mode) in [("polled", StimulusMode::Polled), ("burst", StimulusMode::Burst)] {
            group.bench_with_input(BenchmarkId::new(label, len), &len, |b, &len| {
                b.iter(|| {
                    let received = workload::run_payload(len, mode).received.len();
                    assert_eq!(received, len);
                })
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_loopback);
criterion_main!(benches);
