use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode};
use investforge::bench_support::MeterBenchFixture;
use tokio::runtime::Runtime;

fn fixtures() -> Vec<(&'static str, MeterBenchFixture)> {
    vec![
        ("memory", MeterBenchFixture::memory()),
        ("sqlite", MeterBenchFixture::sqlite()),
    ]
}

fn bench_check_and_increment(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("check_and_increment");
    group
        .sample_size(500)
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(3))
        .sampling_mode(SamplingMode::Auto);

    for (backend, fixture) in fixtures() {
        // growth analyses are unlimited, so every iteration takes the write path
        group.bench_function(BenchmarkId::new(backend, "unlimited"), |b| {
            b.to_async(&runtime).iter(|| async {
                let decision = fixture
                    .meter
                    .check_and_increment(&fixture.user_id, "analyses", "growth")
                    .await
                    .expect("metering");
                black_box(decision);
            });
        });

        // free backtests exhaust after two calls; the rest measure the denial path
        group.bench_function(BenchmarkId::new(backend, "denied"), |b| {
            b.to_async(&runtime).iter(|| async {
                let decision = fixture
                    .meter
                    .check_and_increment(&fixture.user_id, "backtests", "free")
                    .await
                    .expect("metering");
                black_box(decision);
            });
        });
    }

    group.finish();
}

fn bench_get_usage(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("get_usage");
    group
        .sample_size(500)
        .measurement_time(Duration::from_secs(5));

    for (backend, fixture) in fixtures() {
        group.bench_function(BenchmarkId::new(backend, "snapshot"), |b| {
            b.to_async(&runtime).iter(|| async {
                let usage = fixture
                    .meter
                    .get_usage(&fixture.user_id, "analyses", "free")
                    .await
                    .expect("usage");
                black_box(usage);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_check_and_increment, bench_get_usage);
criterion_main!(benches);
