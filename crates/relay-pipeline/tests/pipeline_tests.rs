//! End-to-end pipeline tests over the in-memory stores
//!
//! Exercise the producer and consumer against a real directory tree
//! (tempfile) with the Postgres stores swapped for their in-memory
//! equivalents.

#![allow(clippy::unwrap_used)]

use chrono::{TimeZone, Utc};
use relay_pipeline::consumer::{BatchConsumer, ARCHIVE_SUBDIR, FAILED_SUBDIR};
use relay_pipeline::filename::{generate_filename, meta_path, parse_filename};
use relay_pipeline::jsonl::{read_jsonl, write_jsonl, BatchMetadata};
use relay_pipeline::producer::BatchProducer;
use relay_pipeline::store::memory::{MemoryExportSource, MemoryImportTarget};
use relay_pipeline::transfer::{RequestTransfer, SettingTransfer, TransferRecord, UserTransfer};
use relay_pipeline::types::{BatchStatus, ExportOutcome};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

fn request(priority: i32) -> RequestTransfer {
    RequestTransfer {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        query_type: "match".to_string(),
        query_params: json!({"field": "title", "value": "alpha"}),
        priority,
        timestamp: Utc::now(),
    }
}

fn user(username: &str, ts_secs: u32) -> UserTransfer {
    UserTransfer {
        id: Uuid::new_v4(),
        username: username.to_string(),
        email: format!("{username}@example.org"),
        full_name: None,
        hashed_password: "$2b$12$fixedhashfortests".to_string(),
        role: "basic".to_string(),
        is_active: true,
        timestamp: Utc.with_ymd_and_hms(2025, 1, 15, 14, 30, ts_secs).unwrap(),
    }
}

fn setting(key: &str, value: i64, ts_secs: u32) -> SettingTransfer {
    SettingTransfer {
        key: key.to_string(),
        value: json!(value),
        category: Some("search".to_string()),
        timestamp: Utc.with_ymd_and_hms(2025, 1, 15, 14, 30, ts_secs).unwrap(),
    }
}

/// Write a complete batch (data file plus sidecar) into `dir`.
fn write_batch<T: TransferRecord>(dir: &Path, records: &[T]) -> String {
    let batch_id = Uuid::new_v4();
    let filename = generate_filename(T::BATCH_TYPE.as_str(), batch_id, Utc::now());
    let data_path = dir.join(&filename);
    write_jsonl(records, &data_path).unwrap();
    let meta = BatchMetadata::for_file(
        batch_id,
        T::BATCH_TYPE.as_str(),
        records.len() as u64,
        &data_path,
        Utc::now(),
    )
    .unwrap();
    meta.write(&meta_path(&data_path)).unwrap();
    filename
}

fn names_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[tokio::test]
async fn test_producer_selects_priority_then_age() {
    let dir = tempfile::tempdir().unwrap();
    let source = MemoryExportSource::<RequestTransfer>::new();
    let base = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();

    let old_low = request(5);
    let new_low = request(5);
    let high = request(8);
    source.push(Uuid::new_v4(), 5, base, old_low.clone());
    source.push(
        Uuid::new_v4(),
        5,
        base + chrono::Duration::seconds(10),
        new_low,
    );
    source.push(
        Uuid::new_v4(),
        8,
        base + chrono::Duration::seconds(20),
        high.clone(),
    );

    let producer = BatchProducer::new(source, dir.path(), 2);
    let outcome = producer.run().await.unwrap();

    let filename = match outcome {
        ExportOutcome::Exported {
            record_count,
            filename,
            ..
        } => {
            assert_eq!(record_count, 2);
            filename
        }
        ExportOutcome::Noop => panic!("expected an export"),
    };

    let records: Vec<RequestTransfer> = read_jsonl(&dir.path().join(&filename)).unwrap();
    assert_eq!(records[0].id, high.id);
    assert_eq!(records[1].id, old_low.id);
}

#[tokio::test]
async fn test_producer_noop_leaves_no_files() {
    let dir = tempfile::tempdir().unwrap();
    let source = MemoryExportSource::<RequestTransfer>::new();
    let producer = BatchProducer::new(source, dir.path(), 500);

    assert_eq!(producer.run().await.unwrap(), ExportOutcome::Noop);
    assert!(names_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_producer_writes_ledger_and_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let source = MemoryExportSource::<RequestTransfer>::new();
    source.push(Uuid::new_v4(), 1, Utc::now(), request(1));

    let producer = BatchProducer::new(source, dir.path(), 500)
        .with_networks("request", "response");
    let outcome = producer.run().await.unwrap();

    let filename = match outcome {
        ExportOutcome::Exported { filename, .. } => filename,
        ExportOutcome::Noop => panic!("expected an export"),
    };

    let meta = BatchMetadata::read(&meta_path(&dir.path().join(&filename))).unwrap();
    assert_eq!(meta.record_count, 1);
    assert_eq!(meta.batch_type, "requests");
    assert_eq!(meta.source_network.as_deref(), Some("request"));
    assert_eq!(meta.destination_network.as_deref(), Some("response"));

    let parsed = parse_filename(&filename).unwrap();
    assert_eq!(parsed.batch_id, meta.batch_id);
}

#[tokio::test]
async fn test_import_then_reimport_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let target = Arc::new(MemoryImportTarget::<UserTransfer>::new());
    let records = vec![user("alice", 0), user("bob", 1)];

    write_batch(dir.path(), &records);
    let consumer = BatchConsumer::new(Arc::clone(&target), dir.path());

    let summary = consumer.run().await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.records_applied, 2);

    // Same content re-delivered under a fresh filename: the checksum
    // matches the ledger, so nothing is written a second time.
    write_batch(dir.path(), &records);
    let summary = consumer.run().await.unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.records_applied, 0);

    assert_eq!(target.ledger_rows().len(), 1);
    assert_eq!(target.write_count(), 2);
    assert_eq!(target.applied_count(), 2);

    let archived = names_in(&dir.path().join(ARCHIVE_SUBDIR));
    assert_eq!(archived.len(), 4); // two data files + two sidecars
}

#[tokio::test]
async fn test_duplicate_users_batch_performs_zero_writes() {
    let dir = tempfile::tempdir().unwrap();
    let target = Arc::new(MemoryImportTarget::<UserTransfer>::new());
    let consumer = BatchConsumer::new(Arc::clone(&target), dir.path());
    let records = vec![user("carol", 0)];

    write_batch(dir.path(), &records);
    consumer.run().await.unwrap();
    assert_eq!(target.write_count(), 1);

    write_batch(dir.path(), &records);
    let summary = consumer.run().await.unwrap();

    assert_eq!(summary.duplicates, 1);
    assert_eq!(target.write_count(), 1);
    assert_eq!(target.ledger_rows().len(), 1);
    assert!(names_in(&dir.path().join(FAILED_SUBDIR)).is_empty());
}

#[tokio::test]
async fn test_malformed_file_quarantined_others_processed() {
    let dir = tempfile::tempdir().unwrap();
    let target = MemoryImportTarget::<SettingTransfer>::new();

    // An early (lexicographically first) malformed file.
    let bad_name = "20250101000000_settings_00000000-0000-0000-0000-000000000000.jsonl";
    let bad_path = dir.path().join(bad_name);
    fs::write(&bad_path, "{\"key\": \"broken\"\nnot json at all\n").unwrap();
    let bad_meta = BatchMetadata::for_file(Uuid::nil(), "settings", 2, &bad_path, Utc::now()).unwrap();
    bad_meta.write(&meta_path(&bad_path)).unwrap();

    write_batch(dir.path(), &[setting("page_size", 25, 0)]);

    let consumer = BatchConsumer::new(target, dir.path());
    let summary = consumer.run().await.unwrap();

    assert_eq!(summary.quarantined, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.records_applied, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].filename, bad_name);

    let failed = names_in(&dir.path().join(FAILED_SUBDIR));
    assert!(failed.contains(&bad_name.to_string()));
}

#[tokio::test]
async fn test_checksum_mismatch_quarantined() {
    let dir = tempfile::tempdir().unwrap();
    let filename = write_batch(dir.path(), &[setting("page_size", 25, 0)]);

    // Tamper with the data file after the sidecar was written.
    let data_path = dir.path().join(&filename);
    let mut content = fs::read_to_string(&data_path).unwrap();
    content.push_str("{\"key\":\"injected\",\"value\":1,\"timestamp\":\"2025-01-15T00:00:00Z\"}\n");
    fs::write(&data_path, content).unwrap();

    let consumer = BatchConsumer::new(MemoryImportTarget::<SettingTransfer>::new(), dir.path());
    let summary = consumer.run().await.unwrap();

    assert_eq!(summary.quarantined, 1);
    assert_eq!(summary.processed, 0);
    assert!(summary.failures[0].reason.contains("checksum mismatch"));
}

#[tokio::test]
async fn test_referential_gap_applies_remainder() {
    let dir = tempfile::tempdir().unwrap();
    let known: Vec<String> = (1..=4).map(|n| format!("user{n}")).collect();
    let target = MemoryImportTarget::<UserTransfer>::with_known_keys(known);

    let records: Vec<UserTransfer> = (1..=5).map(|n| user(&format!("user{n}"), n)).collect();
    write_batch(dir.path(), &records);

    let consumer = BatchConsumer::new(target, dir.path());
    let summary = consumer.run().await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.records_applied, 4);
    assert_eq!(summary.records_skipped, 1);
    assert_eq!(summary.quarantined, 0);
}

#[tokio::test]
async fn test_stale_record_skipped_by_last_write_wins() {
    let dir = tempfile::tempdir().unwrap();
    let target = Arc::new(MemoryImportTarget::<SettingTransfer>::new());
    let consumer = BatchConsumer::new(Arc::clone(&target), dir.path());

    write_batch(dir.path(), &[setting("page_size", 50, 30)]);
    consumer.run().await.unwrap();

    // An older value arriving later must not clobber the newer one.
    write_batch(dir.path(), &[setting("page_size", 25, 10)]);
    let summary = consumer.run().await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.records_applied, 0);
    assert_eq!(summary.records_skipped, 1);
    assert_eq!(target.applied_record("page_size").unwrap().value, json!(50));
}

#[tokio::test]
async fn test_empty_batch_archived() {
    let dir = tempfile::tempdir().unwrap();
    let filename = write_batch::<SettingTransfer>(dir.path(), &[]);

    let consumer = BatchConsumer::new(MemoryImportTarget::<SettingTransfer>::new(), dir.path());
    let summary = consumer.run().await.unwrap();

    assert_eq!(summary.empty, 1);
    assert_eq!(summary.processed, 0);
    assert!(names_in(&dir.path().join(ARCHIVE_SUBDIR)).contains(&filename));
}

#[tokio::test]
async fn test_sidecarless_file_deferred_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let filename = generate_filename("settings", Uuid::new_v4(), Utc::now());
    write_jsonl(&[setting("page_size", 25, 0)], &dir.path().join(&filename)).unwrap();

    let consumer = BatchConsumer::new(MemoryImportTarget::<SettingTransfer>::new(), dir.path());
    let summary = consumer.run().await.unwrap();

    assert_eq!(summary.deferred, 1);
    assert_eq!(summary.processed, 0);
    assert!(names_in(dir.path()).contains(&filename));
}

#[tokio::test]
async fn test_producer_to_consumer_round_trip_preserves_unicode() {
    let dir = tempfile::tempdir().unwrap();
    let source = MemoryExportSource::<SettingTransfer>::new();
    let original = SettingTransfer {
        key: "banner.message".to_string(),
        value: json!("مرحبا — système prêt 🚀"),
        category: Some("ui".to_string()),
        timestamp: Utc::now(),
    };
    source.push(Uuid::new_v4(), 0, Utc::now(), original.clone());

    let producer = BatchProducer::new(source, dir.path(), 500);
    assert!(matches!(
        producer.run().await.unwrap(),
        ExportOutcome::Exported { record_count: 1, .. }
    ));

    let target = Arc::new(MemoryImportTarget::<SettingTransfer>::new());
    let consumer = BatchConsumer::new(Arc::clone(&target), dir.path());
    let summary = consumer.run().await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.records_applied, 1);
    assert_eq!(target.applied_record("banner.message").unwrap(), original);
}

#[tokio::test]
async fn test_failed_apply_records_ledger_row_and_allows_retry() {
    let dir = tempfile::tempdir().unwrap();
    let target = Arc::new(MemoryImportTarget::<SettingTransfer>::new());
    let consumer = BatchConsumer::new(Arc::clone(&target), dir.path());
    let records = vec![setting("page_size", 25, 0)];

    write_batch(dir.path(), &records);
    target.fail_next_apply("connection reset");
    let summary = consumer.run().await.unwrap();

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.quarantined, 1);

    // The rolled-back attempt still leaves an auditable ledger row.
    let ledger = target.ledger_rows();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].status, BatchStatus::Failed);
    assert!(ledger[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("connection reset"));

    // Same content re-delivered: the failed row must not trip the
    // duplicate-checksum guard.
    write_batch(dir.path(), &records);
    let summary = consumer.run().await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.duplicates, 0);
    assert_eq!(summary.records_applied, 1);
    assert_eq!(target.applied_record("page_size").unwrap().value, json!(25));
}

#[tokio::test]
async fn test_import_ledger_row_links_source_batch() {
    let dir = tempfile::tempdir().unwrap();
    let records = vec![setting("page_size", 25, 0)];
    let filename = write_batch(dir.path(), &records);
    let source_batch_id = parse_filename(&filename).unwrap().batch_id;

    let target = Arc::new(MemoryImportTarget::<SettingTransfer>::new());
    let consumer = BatchConsumer::new(Arc::clone(&target), dir.path());
    consumer.run().await.unwrap();

    let ledger = target.ledger_rows();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].source_batch_id, Some(source_batch_id));
    assert_eq!(ledger[0].status, BatchStatus::Completed);
    assert_eq!(ledger[0].filename, filename);

    assert!(names_in(&dir.path().join(ARCHIVE_SUBDIR)).contains(&filename));
}
