//! Quantization benchmarks
//!
//! Run with: cargo bench -p litequant-tensor

use candle_core::{Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use litequant_tensor::{fake_quantize, quantize_per_channel, QuantParams, RangeObserver};
use std::time::Duration;

/// Benchmark per-tensor fake quantization
fn bench_fake_quantize(c: &mut Criterion) {
    let mut group = c.benchmark_group("fake_quantize");
    group.measurement_time(Duration::from_secs(5));

    let device = Device::Cpu;
    let params = QuantParams::from_range(-1.0, 6.0);

    for size in [1024usize, 16384, 150528] {
        let tensor = Tensor::randn(0.0f32, 1.0, size, &device).unwrap();
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("f32", size), &tensor, |b, t| {
            b.iter(|| black_box(fake_quantize(t, &params).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark per-channel weight quantization
fn bench_per_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("per_channel");

    let device = Device::Cpu;
    for (out, inp) in [(16usize, 8usize), (64, 32), (256, 128)] {
        let weight = Tensor::randn(0.0f32, 1.0, (out, inp, 3, 3), &device).unwrap();
        group.throughput(Throughput::Elements((out * inp * 9) as u64));

        group.bench_with_input(
            BenchmarkId::new("conv3x3", format!("{out}x{inp}")),
            &weight,
            |b, w| {
                b.iter(|| black_box(quantize_per_channel(w).unwrap()));
            },
        );
    }

    group.finish();
}

/// Benchmark range observation
fn bench_observer(c: &mut Criterion) {
    let data: Vec<f32> = (0..150528).map(|i| (i as f32 * 0.001).sin()).collect();

    c.bench_function("observe_slice_150k", |b| {
        b.iter(|| {
            let mut obs = RangeObserver::new();
            obs.observe_slice(black_box(&data));
            black_box(obs.range())
        });
    });
}

criterion_group!(benches, bench_fake_quantize, bench_per_channel, bench_observer);
criterion_main!(benches);
