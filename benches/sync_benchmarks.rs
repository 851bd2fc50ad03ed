use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ledger_sync::app::{
    RateBudget, RateBudgetConfig, RetryPolicy, StatusTracker, SyncConfig, SyncService,
    WindowConfig, find_gaps,
};
use ledger_sync::domain::TransferRecord;
use ledger_sync::infra::merge;
use ledger_sync::test_utils::{MockLedgerExplorer, MockRecordStore};
use secrecy::SecretString;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::watch;

fn records(start: u64, count: u64, step: u64) -> Vec<TransferRecord> {
    (0..count)
        .map(|i| {
            let block = start + i * step;
            TransferRecord::from_raw(
                &format!("0x{:064x}", block),
                "0xsender",
                "0xreceiver",
                "1000000000000000000",
                block,
                1_700_000_000,
                18,
            )
            .unwrap()
        })
        .collect()
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    for size in [1_000_u64, 10_000, 100_000] {
        let existing = records(0, size, 2);
        // Half overlap with the existing set.
        let incoming = records(size, 10_000, 1);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| merge(black_box(existing.clone()), black_box(incoming.clone())))
        });
    }
    group.finish();
}

fn bench_find_gaps(c: &mut Criterion) {
    let blocks: Vec<u64> = (0..200_000_u64)
        .map(|i| 38_699_339 + i * 3 + if i % 5_000 == 0 { 5_000 } else { 0 })
        .collect();

    c.bench_function("find_gaps_200k_blocks", |b| {
        b.iter(|| find_gaps(black_box(blocks.iter().copied()), 38_699_339, 1_000))
    });
}

fn bench_sync_cycle(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let explorer = Arc::new(MockLedgerExplorer::new().with_cap(1_000, 0));
    explorer.add_transfers_every(0, 100_000, 7);
    explorer.set_chain_head(100_000);

    c.bench_function("sync_cycle_from_empty_store", |b| {
        b.to_async(&rt).iter(|| {
            let explorer = Arc::clone(&explorer);
            async move {
                let budget = Arc::new(
                    RateBudget::new(
                        vec![SecretString::from("bench")],
                        RateBudgetConfig::unthrottled(),
                    )
                    .unwrap(),
                );
                let status = Arc::new(StatusTracker::new(0, Arc::clone(&budget)));
                let service = SyncService::new(
                    SyncConfig {
                        origin: 0,
                        continue_delay: Duration::ZERO,
                        ..SyncConfig::default()
                    },
                    explorer,
                    Arc::new(MockRecordStore::new()),
                    budget,
                    WindowConfig {
                        default_window: 5_000,
                        min_window: 10,
                    },
                    RetryPolicy::immediate(1),
                    status,
                );
                let (_tx, mut rx) = watch::channel(false);
                black_box(service.run_cycle(&mut rx).await.unwrap())
            }
        })
    });
}

criterion_group!(benches, bench_merge, bench_find_gaps, bench_sync_cycle);
criterion_main!(benches);
