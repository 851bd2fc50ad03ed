//! End-to-end tests of the synchronization engine over a synthetic ledger
//! and a real JSON file store in a temporary directory.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tempfile::TempDir;
use tokio::sync::watch;

use ledger_sync::app::{
    CycleOutcome, RateBudget, RateBudgetConfig, RetryPolicy, StatusTracker, SyncConfig,
    SyncService, WindowConfig, find_record_gaps,
};
use ledger_sync::domain::{BlockRange, RecordStore, TransferRecord};
use ledger_sync::infra::{FileStatusReporter, JsonFileStore};
use ledger_sync::test_utils::{MockLedgerExplorer, RecordingStatusReporter};

const ORIGIN: u64 = 1_000;

fn sync_config() -> SyncConfig {
    SyncConfig {
        origin: ORIGIN,
        gap_tolerance: 100,
        caught_up_tolerance: 10,
        caught_up_sleep: Duration::ZERO,
        continue_delay: Duration::ZERO,
        error_cooldown: Duration::ZERO,
        fatal_cooldown: Duration::ZERO,
        persist_batch_threshold: 50,
    }
}

fn budget() -> Arc<RateBudget> {
    Arc::new(
        RateBudget::new(
            vec![SecretString::from("a"), SecretString::from("b")],
            RateBudgetConfig::unthrottled(),
        )
        .unwrap(),
    )
}

fn service(
    explorer: Arc<MockLedgerExplorer>,
    store: Arc<JsonFileStore>,
    recorder: Arc<RecordingStatusReporter>,
    window: WindowConfig,
) -> SyncService {
    let budget = budget();
    let status = Arc::new(StatusTracker::new(ORIGIN, Arc::clone(&budget)).with_reporter(recorder));
    SyncService::new(
        sync_config(),
        explorer,
        store,
        budget,
        window,
        RetryPolicy::immediate(2),
        status,
    )
}

fn hashes(records: &[TransferRecord]) -> HashSet<String> {
    records.iter().map(|r| r.hash.clone()).collect()
}

#[tokio::test]
async fn test_dense_ledger_is_mirrored_exactly_under_a_small_cap() {
    let dir = TempDir::new().unwrap();
    let explorer = Arc::new(MockLedgerExplorer::new().with_cap(5, 0));
    explorer.add_transfers_every(ORIGIN, 1_050, 3);
    // Several transfers in one block.
    for i in 0..3 {
        explorer.push_record(MockLedgerExplorer::transfer(&format!("0xsame{}", i), 1_020));
    }
    explorer.set_chain_head(1_050);
    let store = Arc::new(JsonFileStore::new(dir.path().join("transactions.json")));
    let recorder = Arc::new(RecordingStatusReporter::new());
    let svc = service(
        explorer.clone(),
        store.clone(),
        recorder,
        WindowConfig {
            default_window: 100,
            min_window: 1,
        },
    );
    let (_tx, mut rx) = watch::channel(false);

    let outcome = svc.run_cycle(&mut rx).await.unwrap();

    assert_eq!(outcome, CycleOutcome::CaughtUp);
    let calls = explorer.calls();
    assert_eq!(calls[0], BlockRange::new(1_000, 1_050).unwrap());
    assert!(calls[1].len() <= 50);

    let stored = store.load().await.unwrap();
    assert_eq!(stored.len(), 20);
    assert_eq!(hashes(&stored), hashes(&explorer.ledger()));
}

#[tokio::test]
async fn test_gap_coverage_after_backfill() {
    let dir = TempDir::new().unwrap();
    let explorer = Arc::new(MockLedgerExplorer::new());
    explorer.add_transfers_every(ORIGIN, 3_000, 25);
    explorer.set_chain_head(3_000);

    // Seed the store with a sparse, holey subset.
    let seeded: Vec<TransferRecord> = explorer
        .ledger()
        .into_iter()
        .filter(|r| (1_400..1_600).contains(&r.block_number) || r.block_number >= 2_500)
        .collect();
    let store = Arc::new(JsonFileStore::new(dir.path().join("transactions.json")));
    store.persist(&seeded).await.unwrap();
    assert!(!find_record_gaps(&seeded, ORIGIN, 100).is_empty());

    let recorder = Arc::new(RecordingStatusReporter::new());
    let svc = service(
        explorer.clone(),
        store.clone(),
        recorder,
        WindowConfig {
            default_window: 500,
            min_window: 10,
        },
    );
    let (_tx, mut rx) = watch::channel(false);

    svc.run_cycle(&mut rx).await.unwrap();

    let stored = store.load().await.unwrap();
    assert!(find_record_gaps(&stored, ORIGIN, 100).is_empty());
    assert_eq!(hashes(&stored), hashes(&explorer.ledger()));
}

#[tokio::test]
async fn test_repeated_cycles_are_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("transactions.json");
    let explorer = Arc::new(MockLedgerExplorer::new());
    explorer.add_transfers_every(ORIGIN, 2_000, 7);
    explorer.set_chain_head(2_000);
    let store = Arc::new(JsonFileStore::new(&path));
    let svc = service(
        explorer,
        store.clone(),
        Arc::new(RecordingStatusReporter::new()),
        WindowConfig::default(),
    );
    let (_tx, mut rx) = watch::channel(false);

    svc.run_cycle(&mut rx).await.unwrap();
    let first = std::fs::read(&path).unwrap();
    svc.run_cycle(&mut rx).await.unwrap();
    svc.run_cycle(&mut rx).await.unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), first);
    let stored = store.load().await.unwrap();
    assert_eq!(hashes(&stored).len(), stored.len());
}

#[tokio::test]
async fn test_new_blocks_are_picked_up_on_next_cycle() {
    let dir = TempDir::new().unwrap();
    let explorer = Arc::new(MockLedgerExplorer::new());
    explorer.add_transfers_every(ORIGIN, 1_500, 10);
    explorer.set_chain_head(1_500);
    let store = Arc::new(JsonFileStore::new(dir.path().join("transactions.json")));
    let svc = service(
        explorer.clone(),
        store.clone(),
        Arc::new(RecordingStatusReporter::new()),
        WindowConfig::default(),
    );
    let (_tx, mut rx) = watch::channel(false);

    svc.run_cycle(&mut rx).await.unwrap();
    assert_eq!(store.load().await.unwrap().len(), 51);

    explorer.push_record(MockLedgerExplorer::transfer("0xnew", 1_600));
    explorer.set_chain_head(1_650);
    svc.run_cycle(&mut rx).await.unwrap();

    let stored = store.load().await.unwrap();
    assert_eq!(stored.len(), 52);
    assert_eq!(stored.last().unwrap().hash, "0xnew");
    assert_eq!(
        explorer.calls().last().unwrap(),
        &BlockRange::new(1_501, 1_650).unwrap()
    );
}

#[tokio::test]
async fn test_status_file_tracks_progress() {
    let dir = TempDir::new().unwrap();
    let status_path = dir.path().join("sync_status.json");
    let explorer = Arc::new(MockLedgerExplorer::new());
    explorer.add_transfers_every(ORIGIN, 1_200, 20);
    explorer.set_chain_head(1_200);
    let store = Arc::new(JsonFileStore::new(dir.path().join("transactions.json")));

    let budget = budget();
    let status = Arc::new(
        StatusTracker::new(ORIGIN, Arc::clone(&budget))
            .with_reporter(Arc::new(FileStatusReporter::new(&status_path))),
    );
    let svc = SyncService::new(
        sync_config(),
        explorer,
        store,
        budget,
        WindowConfig::default(),
        RetryPolicy::immediate(1),
        Arc::clone(&status),
    );
    let (_tx, mut rx) = watch::channel(false);

    svc.run_cycle(&mut rx).await.unwrap();
    status.publish();

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&status_path).unwrap()).unwrap();
    assert_eq!(value["total_records"], 11);
    assert_eq!(value["checkpoint"], 1_200);
    assert_eq!(value["chain_head"], 1_200);
    assert_eq!(value["blocks_behind"], 0);
    assert_eq!(value["api_requests"], 2);
}
