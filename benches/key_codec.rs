//! Benchmarks for the hot path around every fetch
//!
//! Key building runs once per fetch; single-flight resolution runs once per
//! miss.

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use forecast_cache::cache::{CacheKey, KeyPattern, Params, SingleFlight};
use forecast_cache::{CacheableRequest, ComputeError, ForecastRequest};
use std::sync::Arc;

fn bench_key_building(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_codec");
    group.throughput(Throughput::Elements(1));

    let params = Params::new()
        .with("horizonDays", 90)
        .with("includePending", true)
        .with("startDate", NaiveDate::from_ymd_opt(2026, 1, 1).unwrap())
        .with("scenario", "baseline");

    group.bench_function("build_key", |b| {
        b.iter(|| CacheKey::build(black_box("forecast"), black_box(42), black_box(&params)));
    });

    group.bench_function("forecast_request_key", |b| {
        let request = ForecastRequest::new(42, 90).with_pending().with_scenario("baseline");
        b.iter(|| {
            let request = black_box(&request);
            CacheKey::build(request.namespace(), request.owner_id(), &request.params())
        });
    });

    let key = CacheKey::build("forecast", 42, &params).unwrap();
    let storage_key = key.to_storage_key();

    group.bench_function("storage_key_roundtrip", |b| {
        b.iter(|| CacheKey::from_storage_key(black_box(&storage_key)));
    });

    let pattern = KeyPattern::owner(42);
    group.bench_function("pattern_match", |b| {
        b.iter(|| pattern.matches_storage_key(black_box(&storage_key)));
    });

    group.finish();
}

fn bench_single_flight(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_flight");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    group.throughput(Throughput::Elements(1));
    group.bench_function("uncontended", |b| {
        let flights: SingleFlight<u64> = SingleFlight::new();
        b.to_async(&runtime).iter(|| async {
            let (result, _) = flights
                .resolve("forecast:42:k", None, || async { Ok::<_, ComputeError>(7) })
                .await;
            black_box(result)
        });
    });

    group.throughput(Throughput::Elements(64));
    group.bench_function("contended_64", |b| {
        let flights: Arc<SingleFlight<u64>> = Arc::new(SingleFlight::new());
        b.to_async(&runtime).iter(|| {
            let flights = flights.clone();
            async move {
                let calls = (0..64).map(|_| {
                    let flights = flights.clone();
                    tokio::spawn(async move {
                        flights
                            .resolve("forecast:42:k", None, || async {
                                tokio::task::yield_now().await;
                                Ok::<_, ComputeError>(7)
                            })
                            .await
                            .0
                    })
                });
                black_box(futures::future::join_all(calls).await)
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_key_building, bench_single_flight);
criterion_main!(benches);
