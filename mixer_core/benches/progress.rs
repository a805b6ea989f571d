use criterion::{Criterion, black_box, criterion_group, criterion_main};
use mixer_core::{compute_progress, progress_effect};

pub fn bench_progress(c: &mut Criterion) {
    let mut g = c.benchmark_group("progress");
    g.sample_size(50);

    g.bench_function("compute_progress_sweep", |b| {
        b.iter(|| {
            let mut acc: u32 = 0;
            for i in 0..=300u32 {
                acc += u32::from(compute_progress(black_box(f64::from(i)), black_box(250.0)));
            }
            black_box(acc)
        })
    });

    g.bench_function("progress_effect_sweep", |b| {
        b.iter(|| {
            for p in 0..=100u8 {
                black_box(progress_effect(black_box(p)));
            }
        })
    });

    g.finish();
}

criterion_group!(progress, bench_progress);
criterion_main!(progress);
