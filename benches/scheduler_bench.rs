//! Benchmarks for the scheduling hot paths.
//!
//! Benchmarks cover:
//! - Shuffled batch splitting and adaptive sizing
//! - Admission gate acquire/release under contention
//! - Registry registration and drain
//! - End-to-end submission through the scripted runner

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;

use meeting_bot_scheduler::builders::CoordinatorBuilder;
use meeting_bot_scheduler::config::SchedulerConfig;
use meeting_bot_scheduler::core::{
    adaptive_batch_size, split, ActiveRegistry, AdmissionGate, Batcher, BotIdentity, FixedProbe,
    HmacCredentialIssuer, JoinRequest, ResourceBudget, Runner, SchedulerError,
};
use meeting_bot_scheduler::infra::runner::ScriptedRunner;

use tokio::runtime::Runtime;

fn bots(n: u64) -> Vec<BotIdentity> {
    (1..=n).map(|i| BotIdentity::new(i, format!("Bot {i}"))).collect()
}

// ============================================================================
// Batching
// ============================================================================

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("batcher_split");
    for size in [25_u64, 100, 1_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let input = bots(size);
            b.iter(|| black_box(split(input.clone(), 10)));
        });
    }
    group.finish();
}

fn bench_adaptive_size(c: &mut Criterion) {
    c.bench_function("adaptive_batch_size", |b| {
        b.iter(|| {
            for total in 0..64 {
                black_box(adaptive_batch_size(black_box(total), 10, 4));
            }
        });
    });
}

// ============================================================================
// Gate and registry
// ============================================================================

fn bench_gate(c: &mut Criterion) {
    let mut group = c.benchmark_group("gate_acquire_release");
    for tasks in [8_usize, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(tasks), &tasks, |b, &tasks| {
            b.to_async(Runtime::new().unwrap()).iter(|| async move {
                let gate = AdmissionGate::new(4);
                let handles: Vec<_> = (0..tasks)
                    .map(|_| {
                        let gate = gate.clone();
                        tokio::spawn(async move {
                            let permit = gate.acquire().await?;
                            tokio::task::yield_now().await;
                            drop(permit);
                            Ok::<_, SchedulerError>(())
                        })
                    })
                    .collect();
                for handle in handles {
                    let _ = handle.await;
                }
                black_box(gate.peak_in_use())
            });
        });
    }
    group.finish();
}

fn bench_registry_drain(c: &mut Criterion) {
    c.bench_function("registry_register_drain_32", |b| {
        b.to_async(Runtime::new().unwrap()).iter(|| async {
            let runner = ScriptedRunner::completing();
            let registry = ActiveRegistry::new();
            let request = JoinRequest::new(bots(32), "m", "p", 5.0);
            let budget = ResourceBudget {
                memory_mb: 512,
                bot_count: 1,
            };
            for batch in Batcher::new("chromium", 10).build(&request, "bench", "sig", 1) {
                let session = runner.start(batch.clone(), budget).await.unwrap();
                registry.register(&batch.id, session.handle, 1, 5).unwrap();
            }
            black_box(registry.drain_all().await)
        });
    });
}

// ============================================================================
// End to end
// ============================================================================

fn bench_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("coordinator_submit");
    group.sample_size(20);
    for size in [10_u64, 100] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(Runtime::new().unwrap()).iter(|| async move {
                let coordinator = CoordinatorBuilder::new(SchedulerConfig::default())
                    .runner(ScriptedRunner::completing())
                    .credential_issuer(HmacCredentialIssuer::new("k", "s").unwrap())
                    .host_probe(Arc::new(FixedProbe::new(0.2, 8)))
                    .build()
                    .unwrap();
                let summary = coordinator
                    .submit(JoinRequest::new(bots(size), "123", "pw", 5.0))
                    .await
                    .unwrap();
                coordinator.terminate_all().await;
                black_box(summary.succeeded)
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_split,
    bench_adaptive_size,
    bench_gate,
    bench_registry_drain,
    bench_submit
);
criterion_main!(benches);
