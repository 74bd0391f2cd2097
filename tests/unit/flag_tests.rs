//! Unit tests for `CrashSafeFlag`.
//!
//! Covers atomic writes, single consumption, stale and corrupt record
//! handling, and concurrent readers racing for one record.

use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use consent_lifecycle::models::flag::{unix_now, CrashSafeFlagRecord, RestartReason};
use consent_lifecycle::models::permission::PermissionId;
use consent_lifecycle::persistence::CrashSafeFlag;

const MAX_AGE: Duration = Duration::from_secs(60);

fn id(raw: &str) -> PermissionId {
    PermissionId::new(raw).expect("valid id")
}

fn flag_in(dir: &tempfile::TempDir) -> CrashSafeFlag {
    CrashSafeFlag::new(dir.path().join("restart_flag.json"), MAX_AGE)
}

// ── write / consume ─────────────────────────────────────

#[test]
fn write_then_consume_returns_record_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let flag = flag_in(&temp);

    assert!(flag.write(RestartReason::PermissionsGranted, &[id("screen_capture")]));
    assert!(flag.exists());

    let record = flag.read_and_remove().expect("record present");
    assert_eq!(record.reason, RestartReason::PermissionsGranted);
    assert_eq!(record.permissions, vec![id("screen_capture")]);
    assert_eq!(record.pid, std::process::id());

    assert!(!flag.exists(), "consumed flag must be deleted");
    assert!(flag.read_and_remove().is_none());
}

#[test]
fn write_creates_missing_parent_directory() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("nested").join("state").join("restart_flag.json");
    let flag = CrashSafeFlag::new(path.clone(), MAX_AGE);

    assert!(flag.write(RestartReason::Manual, &[]));
    assert!(path.exists());
}

#[test]
fn written_file_is_complete_json() {
    let temp = tempfile::tempdir().expect("tempdir");
    let flag = flag_in(&temp);
    flag.write(RestartReason::Manual, &[id("microphone"), id("camera")]);

    let raw = fs::read_to_string(flag.path()).expect("read");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(value["reason"], "manual");
    assert_eq!(value["permissions"].as_array().map(Vec::len), Some(2));
    assert!(value["timestamp"].as_f64().is_some());
}

#[test]
fn rewrite_replaces_previous_record() {
    let temp = tempfile::tempdir().expect("tempdir");
    let flag = flag_in(&temp);
    flag.write(RestartReason::Manual, &[]);
    flag.write(RestartReason::PermissionsGranted, &[id("camera")]);

    let record = flag.read_and_remove().expect("record");
    assert_eq!(record.reason, RestartReason::PermissionsGranted);
}

#[test]
fn missing_file_reads_as_none() {
    let temp = tempfile::tempdir().expect("tempdir");
    let flag = flag_in(&temp);
    assert!(flag.read_and_remove().is_none());
    assert!(flag.peek().is_none());
    assert!(!flag.remove());
}

// ── invalid records ─────────────────────────────────────

#[test]
fn corrupt_record_is_ignored_and_cleared() {
    let temp = tempfile::tempdir().expect("tempdir");
    let flag = flag_in(&temp);
    fs::write(flag.path(), "{ not json").expect("write");

    assert!(flag.read_and_remove().is_none());
    assert!(!flag.exists());
}

#[test]
fn empty_record_is_ignored_and_cleared() {
    let temp = tempfile::tempdir().expect("tempdir");
    let flag = flag_in(&temp);
    fs::write(flag.path(), "").expect("write");

    assert!(flag.read_and_remove().is_none());
    assert!(!flag.exists());
}

#[test]
fn expired_record_is_ignored_and_cleared() {
    let temp = tempfile::tempdir().expect("tempdir");
    let flag = flag_in(&temp);
    let record = CrashSafeFlagRecord {
        timestamp: unix_now() - 120.0,
        pid: 1,
        reason: RestartReason::PermissionsGranted,
        permissions: vec![id("screen_capture")],
    };
    assert!(flag.write_record(&record));

    assert!(flag.read_and_remove().is_none());
    assert!(!flag.exists());
}

#[test]
fn future_dated_record_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let flag = flag_in(&temp);
    let record = CrashSafeFlagRecord {
        timestamp: unix_now() + 3_600.0,
        pid: 1,
        reason: RestartReason::Manual,
        permissions: Vec::new(),
    };
    flag.write_record(&record);

    assert!(flag.read_and_remove().is_none());
}

// ── peek / discard ──────────────────────────────────────

#[test]
fn peek_does_not_consume() {
    let temp = tempfile::tempdir().expect("tempdir");
    let flag = flag_in(&temp);
    flag.write(RestartReason::Manual, &[]);

    assert!(flag.peek().is_some());
    assert!(flag.peek().is_some());
    assert!(flag.exists());
    assert!(flag.read_and_remove().is_some());
}

#[test]
fn discard_if_invalid_keeps_fresh_records() {
    let temp = tempfile::tempdir().expect("tempdir");
    let flag = flag_in(&temp);
    flag.write(RestartReason::Manual, &[]);

    assert!(!flag.discard_if_invalid());
    assert!(flag.exists());
}

#[test]
fn discard_if_invalid_removes_stale_records() {
    let temp = tempfile::tempdir().expect("tempdir");
    let flag = flag_in(&temp);
    let record = CrashSafeFlagRecord {
        timestamp: unix_now() - 600.0,
        pid: 1,
        reason: RestartReason::Manual,
        permissions: Vec::new(),
    };
    flag.write_record(&record);

    assert!(flag.discard_if_invalid());
    assert!(!flag.exists());
}

// ── concurrency ─────────────────────────────────────────

#[test]
fn concurrent_readers_consume_record_exactly_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("restart_flag.json");
    CrashSafeFlag::new(path.clone(), MAX_AGE).write(RestartReason::Manual, &[id("camera")]);

    let readers = 4;
    let barrier = Arc::new(Barrier::new(readers));
    let handles: Vec<_> = (0..readers)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let flag = CrashSafeFlag::new(path.clone(), MAX_AGE);
            thread::spawn(move || {
                barrier.wait();
                flag.read_and_remove().is_some()
            })
        })
        .collect();

    let consumed = handles
        .into_iter()
        .map(|h| h.join().expect("reader thread"))
        .filter(|got| *got)
        .count();
    assert_eq!(consumed, 1);
    assert!(!path.exists());
}

#[test]
fn reader_never_observes_partial_write() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("restart_flag.json");
    let writer = CrashSafeFlag::new(path.clone(), MAX_AGE);
    let reader = CrashSafeFlag::new(path.clone(), MAX_AGE);

    let many: Vec<PermissionId> = (0..200).map(|i| id(&format!("perm_{i}"))).collect();
    let write_handle = thread::spawn(move || {
        for _ in 0..20 {
            writer.write(RestartReason::PermissionsGranted, &many);
        }
    });

    for _ in 0..50 {
        if let Some(record) = reader.peek() {
            assert_eq!(record.permissions.len(), 200);
        }
    }
    write_handle.join().expect("writer thread");
}
