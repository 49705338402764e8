//! Performance benchmarks for deimos output classification and supervision

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use deimos::{
    events::{HydraParser, NmapParser, OutputParser, RawParser, StreamKind},
    process::{ProcessSupervisor, SpawnRequest},
};
use std::sync::Arc;
use tokio::runtime::Runtime;

const NMAP_LINES: &[&str] = &[
    "Starting Nmap 7.94 ( https://nmap.org ) at 2024-05-01 10:00 CEST",
    "Discovered open port 22/tcp on 192.168.1.10",
    "Discovered open port 443/tcp on 192.168.1.10",
    "22/tcp   open  ssh     OpenSSH 8.9p1 Ubuntu 3ubuntu0.1",
    "53/udp   open  domain  dnsmasq 2.89",
    "Device type: general purpose",
    "Running: Linux 5.X",
    "OS details: Linux 5.0 - 5.14",
    "1   0.45 ms  gateway.lan (192.168.1.1)",
    "Nmap done: 1 IP address (1 host up) scanned in 12.34 seconds",
];

const HYDRA_LINES: &[&str] = &[
    "[STATUS] 64.00 tries/min, 64 tries in 00:01h, 14344335 to do in 3735:31h, 16 active",
    "[22][ssh] host: 192.168.1.10   login: root   password: toor",
    "[WARNING] Restorefile (you have 10 seconds to abort...)",
    "[ERROR] could not connect to ssh://192.168.1.10:22",
];

/// Benchmark per-line classification
fn bench_line_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_classification");

    group.bench_function("nmap", |b| {
        b.iter(|| {
            for line in NMAP_LINES {
                black_box(NmapParser.classify(black_box(line), StreamKind::Stdout));
            }
        })
    });

    group.bench_function("hydra", |b| {
        b.iter(|| {
            for line in HYDRA_LINES {
                black_box(HydraParser.classify(black_box(line), StreamKind::Stdout));
            }
        })
    });

    group.bench_function("raw", |b| {
        b.iter(|| {
            for line in NMAP_LINES {
                black_box(RawParser.classify(black_box(line), StreamKind::Stderr));
            }
        })
    });

    group.finish();
}

/// Benchmark a spawn-drain-reap cycle with varying output volume
fn bench_supervised_output(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("supervised_output");
    group.sample_size(20);

    for lines in [10, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("nmap_lines", lines), &lines, |b, &lines| {
            b.to_async(&rt).iter(|| async move {
                let supervisor = ProcessSupervisor::default();
                let script = format!(
                    "i=0; while [ $i -lt {} ]; do echo \"Discovered open port $i/tcp on 10.0.0.1\"; i=$((i+1)); done",
                    lines
                );
                let handle = supervisor
                    .spawn(
                        SpawnRequest::new("sh")
                            .args(["-c", script.as_str()])
                            .parser(Arc::new(NmapParser)),
                    )
                    .unwrap();
                let events = handle.events().unwrap().collect_all().await;
                black_box(events.len());
                black_box(handle.wait().await)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_line_classification, bench_supervised_output);
criterion_main!(benches);
