//! Performance benchmarks for the bufferbloat tester
//!
//! These cover the per-chunk hot paths of the server (accounting and pacing)
//! and the client-side scoring and formatting of a finished run.

use bufferbloat_tester::{
    cli::Cli,
    config::parser::ConfigParser,
    models::{Config, DownloadMeasurement, LatencyStatistics, TestReport, UploadMeasurement},
    output::OutputFormatterFactory,
    server::{RateLimiter, StreamAccountant},
    stats::StatisticsEngine,
};
use chrono::Utc;
use clap::Parser;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

/// Latency samples with a little deterministic spread
fn sample_latencies(count: usize, base_ms: f64) -> Vec<f64> {
    (0..count).map(|i| base_ms + (i % 7) as f64 * 0.9).collect()
}

fn sample_report() -> TestReport {
    let baseline = sample_latencies(12, 20.0);
    let loaded = sample_latencies(20, 45.0);
    let analysis = StatisticsEngine::with_defaults().analyze(&baseline, &loaded).unwrap();

    TestReport {
        run_id: uuid::Uuid::new_v4(),
        server_url: "http://127.0.0.1:8080".to_string(),
        started_at: Utc::now(),
        finished_at: Utc::now(),
        upload: UploadMeasurement { speed_mbps: 8.0, bytes: 1_048_576, elapsed_secs: 1.0, completed: true },
        download: DownloadMeasurement {
            speed_mbps: 19.5,
            bytes: 31_981_568,
            elapsed_secs: 13.1,
            per_stream_bytes: vec![15_990_784, 15_990_784],
        },
        baseline: LatencyStatistics::from_millis(&baseline),
        loaded: LatencyStatistics::from_millis(&loaded),
        baseline_samples: baseline,
        loaded_samples: loaded,
        analysis,
    }
}

/// Benchmark the per-chunk accounting operations
fn benchmark_accountant(c: &mut Criterion) {
    let mut group = c.benchmark_group("accountant");

    let accountant = StreamAccountant::new();
    group.bench_function("add_download_bytes", |b| {
        b.iter(|| accountant.add_download_bytes(black_box(32 * 1024)))
    });

    group.bench_function("stream_start_end", |b| {
        b.iter(|| {
            let ticket = accountant.register_download_stream_start();
            black_box(accountant.register_download_stream_end(ticket))
        })
    });

    group.bench_function("snapshot", |b| b.iter(|| black_box(accountant.snapshot())));

    for threads in [2usize, 8].iter() {
        group.bench_with_input(BenchmarkId::new("contended_add", threads), threads, |b, &threads| {
            let shared = Arc::new(StreamAccountant::new());
            b.iter(|| {
                std::thread::scope(|scope| {
                    for _ in 0..threads {
                        let shared = Arc::clone(&shared);
                        scope.spawn(move || {
                            for _ in 0..1_000 {
                                shared.add_download_bytes(32 * 1024);
                            }
                        });
                    }
                });
            })
        });
    }

    group.finish();
}

/// Benchmark the pacing decision made after every chunk
fn benchmark_rate_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limiter");
    let limiter = RateLimiter::default();

    group.bench_function("delay_for_ahead", |b| {
        b.iter(|| limiter.delay_for(black_box(2_000_000), black_box(Duration::from_millis(500))))
    });

    group.bench_function("delay_for_behind", |b| {
        b.iter(|| limiter.delay_for(black_box(100_000), black_box(Duration::from_millis(500))))
    });

    group.finish();
}

/// Benchmark scoring for increasing sample counts
fn benchmark_statistics(c: &mut Criterion) {
    let mut group = c.benchmark_group("statistics");
    let engine = StatisticsEngine::with_defaults();

    for size in [12usize, 100, 1_000].iter() {
        let baseline = sample_latencies(*size, 20.0);
        let loaded = sample_latencies(*size, 55.0);

        group.bench_with_input(BenchmarkId::new("analyze", size), size, |b, _| {
            b.iter(|| engine.analyze(black_box(&baseline), black_box(&loaded)))
        });

        group.bench_with_input(BenchmarkId::new("latency_statistics", size), size, |b, _| {
            b.iter(|| LatencyStatistics::from_millis(black_box(&loaded)))
        });
    }

    group.finish();
}

/// Benchmark configuration parsing and validation
fn benchmark_config_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_parsing");

    group.bench_function("parse_cli_args", |b| {
        b.iter(|| {
            Cli::parse_from(black_box([
                "bbt",
                "--no-color",
                "run",
                "-s",
                "http://speed.example.com:8080",
                "--download-streams",
                "4",
            ]))
        })
    });

    let config = Config::default();
    group.bench_function("validate_config", |b| b.iter(|| black_box(&config).validate()));

    group.bench_function("parse_from_cli", |b| {
        b.iter(|| {
            let cli = Cli::parse_from(["bbt", "--no-color", "stats"]);
            ConfigParser::new(cli).parse()
        })
    });

    group.finish();
}

/// Benchmark report rendering
fn benchmark_report_formatting(c: &mut Criterion) {
    let mut group = c.benchmark_group("report_formatting");
    let report = sample_report();

    let plain = OutputFormatterFactory::create_formatter(false, false);
    group.bench_function("plain", |b| b.iter(|| plain.format_report(black_box(&report))));

    let colored = OutputFormatterFactory::create_formatter(true, true);
    group.bench_function("colored_verbose", |b| b.iter(|| colored.format_report(black_box(&report))));

    group.bench_function("json", |b| b.iter(|| black_box(&report).to_json()));

    group.finish();
}

criterion_group!(
    benches,
    benchmark_accountant,
    benchmark_rate_limiter,
    benchmark_statistics,
    benchmark_config_parsing,
    benchmark_report_formatting
);
criterion_main!(benches);
