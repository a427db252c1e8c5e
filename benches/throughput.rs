//! Throughput Benchmark for pcbsim
//!
//! This benchmark measures the connection manager under lifecycle,
//! messaging and reclamation workloads.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use pcbsim::connection::ConnectionId;
use pcbsim::manager::ConnectionManager;
use pcbsim::protocol::LineParser;
use std::sync::Arc;
use std::time::Duration;

fn populate(manager: &ConnectionManager, count: usize) -> Vec<ConnectionId> {
    (0..count)
        .map(|i| {
            let port = 8000 + (i % 1000) as u16;
            let id = manager.create_connection(("127.0.0.1", port), ("192.168.1.1", 80));
            manager.establish_connection(id).unwrap();
            id
        })
        .collect()
}

/// Benchmark connection setup and teardown
fn bench_lifecycle(c: &mut Criterion) {
    let manager = ConnectionManager::new();

    let mut group = c.benchmark_group("lifecycle");
    group.throughput(Throughput::Elements(1));

    group.bench_function("create", |b| {
        b.iter(|| {
            black_box(manager.create_connection(("127.0.0.1", 8000), ("192.168.1.1", 80)));
        });
    });

    group.bench_function("create_establish_close", |b| {
        b.iter(|| {
            let id = manager.create_connection(("127.0.0.1", 8000), ("192.168.1.1", 80));
            manager.establish_connection(id).unwrap();
            black_box(manager.close_connection(id).unwrap());
        });
    });

    group.finish();
}

/// Benchmark outbound messages
fn bench_send(c: &mut Criterion) {
    let manager = ConnectionManager::new();
    let ids = populate(&manager, 1_000);

    let mut group = c.benchmark_group("send");
    group.throughput(Throughput::Elements(1));

    group.bench_function("send_small", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let id = ids[i % ids.len()];
            black_box(manager.send_message(id, "PING hello").unwrap());
            if i % 1_000 == 999 {
                for &id in &ids {
                    manager.drain_outbound(id).unwrap();
                }
            }
            i += 1;
        });
    });

    group.bench_function("send_large", |b| {
        let payload = format!("DATA {}", "x".repeat(16 * 1024)); // 16KB frame
        let mut i = 0usize;
        b.iter(|| {
            let id = ids[i % ids.len()];
            black_box(manager.send_message(id, &payload).unwrap());
            manager.drain_outbound(id).unwrap();
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark inbound parsing and dispatch
fn bench_receive(c: &mut Criterion) {
    let manager = ConnectionManager::new();
    let id = populate(&manager, 1)[0];

    let mut group = c.benchmark_group("receive");

    let pipelined = b"PING hello\nECHO test message\nDATA sample_data_payload\n".repeat(10);
    group.throughput(Throughput::Bytes(pipelined.len() as u64));

    group.bench_function("pipelined_30_frames", |b| {
        b.iter(|| {
            black_box(manager.deliver_inbound(id, &pipelined));
            manager.drain_outbound(id).unwrap();
            manager.drain_inbound(id).unwrap();
        });
    });

    group.bench_function("byte_at_a_time", |b| {
        let frame = b"ECHO test message\n";
        b.iter(|| {
            for byte in frame.chunks(1) {
                manager.deliver_inbound(id, byte);
            }
            manager.drain_outbound(id).unwrap();
            manager.drain_inbound(id).unwrap();
        });
    });

    group.bench_function("parse_only", |b| {
        let parser = LineParser::default();
        b.iter(|| {
            black_box(parser.parse(b"DATA sample_data_payload\n").unwrap());
        });
    });

    group.finish();
}

/// Benchmark statistics and reclamation over many connections
fn bench_scan(c: &mut Criterion) {
    let manager = ConnectionManager::new();
    populate(&manager, 10_000);

    let mut group = c.benchmark_group("scan");

    group.bench_function("statistics_10k", |b| {
        b.iter(|| {
            black_box(manager.statistics());
        });
    });

    group.bench_function("reclaim_idle_none_due", |b| {
        b.iter(|| {
            black_box(manager.reclaim_idle(Duration::from_secs(3600)));
        });
    });

    group.finish();
}

/// Benchmark concurrent access
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_lifecycle", |b| {
        b.iter(|| {
            let manager = Arc::new(ConnectionManager::new());
            let handles: Vec<_> = (0..4u16)
                .map(|t| {
                    let manager = Arc::clone(&manager);
                    thread::spawn(move || {
                        for i in 0..2_500 {
                            let id = manager
                                .create_connection(("127.0.0.1", 9000 + t), ("192.168.1.1", 80));
                            manager.establish_connection(id).unwrap();
                            manager.send_message(id, "PING hello").unwrap();
                            manager.deliver_inbound(id, b"DATA payload\n");
                            if i % 2 == 0 {
                                manager.close_connection(id).unwrap();
                            }
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(manager.statistics());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_lifecycle,
    bench_send,
    bench_receive,
    bench_scan,
    bench_concurrent,
);

criterion_main!(benches);
