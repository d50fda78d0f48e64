use atmcast::prune::{correlation_matrix, find_correlation};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::Array2;
use rand::distributions::Standard;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// `rows x cols` design where every third column nearly copies its left neighbour
/// and about one value in twenty is missing.
fn random_design(rows: usize, cols: usize) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(0xA7_C0DE + cols as u64);
    let mut x = Array2::from_shape_fn((rows, cols), |_| rng.sample::<f64, _>(Standard));
    for j in (2..cols).step_by(3) {
        for i in 0..rows {
            x[[i, j]] = x[[i, j - 1]] + 0.01 * rng.sample::<f64, _>(Standard);
        }
    }
    for value in x.iter_mut() {
        if rng.gen_bool(0.05) {
            *value = f64::NAN;
        }
    }
    x
}

fn benchmark_pruning(c: &mut Criterion) {
    let widths = [20_usize, 40, 80];
    let designs: Vec<_> = widths.iter().map(|&w| (w, random_design(365, w))).collect();

    let mut group = c.benchmark_group("correlation_pruning");
    for (width, design) in designs.iter() {
        group.throughput(Throughput::Elements((*width * *width) as u64));

        group.bench_with_input(BenchmarkId::new("matrix", width), design, |b, input| {
            b.iter(|| black_box(correlation_matrix(black_box(input.view()))));
        });

        let corr = correlation_matrix(design.view());
        group.bench_with_input(BenchmarkId::new("find", width), &corr, |b, input| {
            b.iter(|| black_box(find_correlation(black_box(input), 0.9)));
        });
    }
    group.finish();
}

criterion_group!(prune_benchmark, benchmark_pruning);
criterion_main!(prune_benchmark);
