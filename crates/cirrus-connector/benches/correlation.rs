//! Correlation table benchmarks
//!
//! Measures register/complete throughput at different table depths, and the
//! cost of dropping replies for unknown tokens.

use std::sync::Arc;

use cirrus_connector::CorrelationTable;
use cirrus_core::{CompletionToken, Message};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn preloaded(depth: usize) -> CorrelationTable {
    let table = CorrelationTable::new();
    for _ in 0..depth {
        let _ = table.register(CompletionToken::new("bench"), Box::new(|_| {}));
    }
    table
}

fn bench_register_complete(c: &mut Criterion) {
    let mut group = c.benchmark_group("correlation_register_complete");

    for depth in [0usize, 1_000, 100_000] {
        let table = preloaded(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| {
                let token = CompletionToken::new("bench");
                let _ = table.register(token.clone(), Box::new(|outcome| {
                    black_box(outcome.is_ok());
                }));
                black_box(table.complete(&token, Ok(Message::ok(token.clone()))))
            });
        });
    }

    group.finish();
}

fn bench_unknown_reply(c: &mut Criterion) {
    let table = preloaded(10_000);
    let stray = CompletionToken::new("stray");
    c.bench_function("correlation_unknown_reply", |b| {
        b.iter(|| black_box(table.complete(&stray, Ok(Message::ok(stray.clone())))));
    });
}

fn bench_contended(c: &mut Criterion) {
    let table = Arc::new(CorrelationTable::new());
    c.bench_function("correlation_contended_4_threads", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let table = Arc::clone(&table);
                    std::thread::spawn(move || {
                        for _ in 0..256 {
                            let token = CompletionToken::new("bench");
                            let _ = table.register(token.clone(), Box::new(|_| {}));
                            table.cancel(&token);
                        }
                    })
                })
                .collect();
            for handle in handles {
                let _ = handle.join();
            }
        });
    });
}

criterion_group!(
    benches,
    bench_register_complete,
    bench_unknown_reply,
    bench_contended
);
criterion_main!(benches);
