//! Indexed view and search map benchmarks
//!
//! Measures breadcrumb layout and map scaling over large match sets.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use logweave::BreadcrumbsConfig;
use logweave::indexes::{Controller, Mode};
use logweave::search::{FilterMatch, SearchFilter, SearchMap};

const STREAM_LEN: u64 = 1_000_000;

fn positions(step: u64) -> Vec<u64> {
    (0..STREAM_LEN).step_by(step as usize).collect()
}

fn bench_breadcrumbs(c: &mut Criterion) {
    let mut group = c.benchmark_group("breadcrumbs");

    for step in [10u64, 100, 1_000] {
        let matches = positions(step);
        group.throughput(Throughput::Elements(matches.len() as u64));

        group.bench_with_input(BenchmarkId::new("build", step), &matches, |b, matches| {
            b.iter(|| {
                let mut controller = Controller::new(BreadcrumbsConfig::default());
                controller.set_stream_len(STREAM_LEN).unwrap();
                controller.set_search_results(matches).unwrap();
                controller.set_mode(Mode::Breadcrumbs).unwrap();
                black_box(controller.len());
            });
        });

        // Live tail: one new match per append on top of a built view
        group.bench_with_input(BenchmarkId::new("append", step), &matches, |b, matches| {
            let mut controller = Controller::new(BreadcrumbsConfig::default());
            controller.set_stream_len(STREAM_LEN).unwrap();
            controller.set_search_results(matches).unwrap();
            controller.set_mode(Mode::Breadcrumbs).unwrap();
            let mut len = STREAM_LEN;
            b.iter(|| {
                len += step;
                controller.set_stream_len(len).unwrap();
                controller.append_search_results(&[len - 1]).unwrap();
                black_box(controller.len());
            });
        });
    }

    group.finish();
}

fn bench_scaled_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("scaled_map");

    let filters = vec![SearchFilter::plain("a"), SearchFilter::plain("b")];
    let mut map = SearchMap::new();
    map.set_stream_len(STREAM_LEN);
    let matches: Vec<FilterMatch> = positions(7)
        .into_iter()
        .map(|index| FilterMatch {
            index,
            filters: if index % 2 == 0 { vec![0] } else { vec![0, 1] },
        })
        .collect();
    map.append(matches, &filters);

    for dataset_len in [100u16, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("full", dataset_len), &dataset_len, |b, &dataset_len| {
            b.iter(|| black_box(map.scaled(dataset_len, None)));
        });
        group.bench_with_input(BenchmarkId::new("frame", dataset_len), &dataset_len, |b, &dataset_len| {
            b.iter(|| black_box(map.scaled(dataset_len, Some(250_000..=750_000))));
        });
    }

    group.bench_function("nearest", |b| {
        let mut position = 0u64;
        b.iter(|| {
            position = (position + 7_919) % STREAM_LEN;
            black_box(map.nearest_to(position));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_breadcrumbs, bench_scaled_map);
criterion_main!(benches);
