use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use perfusion_core::{Direction, EstimatorCfg, estimate};
use perfusion_core::estimator::{Estimation, FlowModel};

fn bench_estimate(c: &mut Criterion) {
    let cfg = EstimatorCfg::default();
    let mut group = c.benchmark_group("estimate");
    // An empty reservoir is the slow path: every step hits the floor.
    for reservoir in [0.0f32, 30.0, 50.0, 500.0] {
        group.bench_with_input(BenchmarkId::new("remove", reservoir), &reservoir, |b, &r| {
            b.iter(|| estimate(&cfg, black_box(30.0), black_box(r), Direction::Remove, |_| {}))
        });
    }
    group.finish();
}

fn bench_incremental(c: &mut Criterion) {
    let cfg = EstimatorCfg::default();
    let model = FlowModel::for_direction(&cfg, 30.0, Direction::Add);
    c.bench_function("estimation_advance_64", |b| {
        b.iter(|| {
            let mut est = Estimation::new(model, black_box(0.0));
            let mut ticks = 0u32;
            while est.advance(64).is_none() {
                ticks += 1;
            }
            black_box(ticks)
        })
    });
}

criterion_group!(benches, bench_estimate, bench_incremental);
criterion_main!(benches);
