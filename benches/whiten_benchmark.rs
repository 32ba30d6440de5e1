use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use parallel_whiten::whitening_matrix;

/// Generates a random multi-channel signal of shape (channels, samples),
/// seeded for reproducibility.
fn generate_signal(channels: usize, samples: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Array2::from_shape_fn((channels, samples), |_| rng.gen_range(-1.0..1.0))
}

fn bench_chunk_gram(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_gram");
    for &(channels, samples) in &[(16usize, 30_000usize), (64, 30_000), (16, 300_000)] {
        let chunk = generate_signal(channels, samples, 7);
        group.throughput(Throughput::Elements((channels * samples) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{channels}ch_x_{samples}")),
            &chunk,
            |b, chunk| b.iter(|| chunk.dot(&chunk.t())),
        );
    }
    group.finish();
}

fn bench_whitening_matrix(c: &mut Criterion) {
    let mut group = c.benchmark_group("whitening_matrix");
    for &channels in &[16usize, 64, 128] {
        let chunk = generate_signal(channels, 10_000, 3);
        let grams = vec![chunk.dot(&chunk.t()); 10];
        group.bench_with_input(BenchmarkId::from_parameter(channels), &grams, |b, grams| {
            b.iter(|| whitening_matrix(grams, 10_000).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chunk_gram, bench_whitening_matrix);
criterion_main!(benches);
