use capture_page::{
    default_output_path, parse_number, sanitize_host, Cli, CaptureFormat, ScrollPlan,
};
use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::path::Path;
use std::time::Duration;
use url::Url;

// Fast settings for all benchmarks
fn configure_fast_group(group: &mut criterion::BenchmarkGroup<criterion::measurement::WallTime>) {
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_millis(500));
    group.sample_size(20);
}

fn benchmark_argument_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("arguments");
    configure_fast_group(&mut group);

    let args = [
        "--url",
        "https://example.com/pricing",
        "--format",
        "PDF",
        "--delay",
        "0.5",
        "--unknown",
        "--width",
        "1280",
        "--no-auto-scroll",
    ];

    group.bench_function("parse_and_validate", |b| {
        b.iter(|| {
            let request = Cli::parse_lenient(black_box(args)).and_then(|cli| cli.to_request());
            let _ = black_box(request);
        });
    });

    group.bench_function("parse_number", |b| {
        b.iter(|| {
            for raw in ["2", " 1.5 ", "0x10", "abc", ""] {
                black_box(parse_number(black_box(raw)));
            }
        });
    });

    group.finish();
}

fn benchmark_host_sanitization(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_sanitization");
    configure_fast_group(&mut group);

    let hosts = ["example.com", "[::1]", "bücher.example.de", "sub_domain-1.test"];

    group.bench_function("sanitize", |b| {
        b.iter(|| {
            for host in &hosts {
                black_box(sanitize_host(black_box(host)));
            }
        });
    });

    group.finish();
}

fn benchmark_output_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("output_path");
    configure_fast_group(&mut group);

    let url = Url::parse("https://docs.example.com/guide?page=2").unwrap();
    let now = Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 15).unwrap();

    group.bench_function("default_path", |b| {
        b.iter(|| {
            black_box(default_output_path(
                black_box(&url),
                CaptureFormat::Png,
                Path::new("captures"),
                now,
            ))
        });
    });

    group.bench_function("scroll_plan", |b| {
        b.iter(|| {
            let plan = ScrollPlan::new(black_box(2200));
            black_box(plan.step_count(black_box(48_000.0)))
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_argument_parsing,
    benchmark_host_sanitization,
    benchmark_output_path
);
criterion_main!(benches);
