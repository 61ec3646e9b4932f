use super::*;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_append_and_read_back() {
    let temp_dir = TempDir::new().unwrap();
    let log = AuditLog::open(temp_dir.path().join("audit.log")).unwrap();

    let seq = log
        .append(7, FileEvent::Created { name: "a.txt".to_string() })
        .unwrap();
    assert_eq!(seq, 0);
    log.append(7, FileEvent::VersionCreated { version: 1 }).unwrap();
    log.append(8, FileEvent::AccessedOriginal).unwrap();

    let entries = log.entries().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].event, FileEvent::Created { name: "a.txt".to_string() });
    assert_eq!(entries[1].sequence, 1);
    assert!(entries[2].time().is_some());

    let for_seven = log.entries_for_file(7).unwrap();
    assert_eq!(for_seven.len(), 2);
    assert_eq!(for_seven[1].event.describe(), "version 1 created");
}

#[test]
fn test_sequence_continues_after_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("audit.log");
    {
        let log = AuditLog::open(&path).unwrap();
        for version in 1..=3 {
            log.append(1, FileEvent::AccessedVersion { version }).unwrap();
        }
    }

    let log = AuditLog::open(&path).unwrap();
    assert_eq!(log.append(1, FileEvent::Deleted).unwrap(), 3);
    assert_eq!(log.entries().unwrap().len(), 4);
}

#[test]
fn test_purge_file_rewrites_log() {
    let temp_dir = TempDir::new().unwrap();
    let log = AuditLog::open(temp_dir.path().join("audit.log")).unwrap();
    for file_id in [1, 2, 1, 3, 1] {
        log.append(file_id, FileEvent::AccessedOriginal).unwrap();
    }

    assert_eq!(log.purge_file(1).unwrap(), 3);
    assert_eq!(log.purge_file(1).unwrap(), 0);
    let remaining: Vec<_> = log.entries().unwrap().iter().map(|e| e.file_id).collect();
    assert_eq!(remaining, vec![2, 3]);

    // appends land in the rewritten file
    log.append(4, FileEvent::Renamed { name: "b".to_string() }).unwrap();
    assert_eq!(log.entries().unwrap().len(), 3);

    assert_eq!(log.purge_all().unwrap(), 3);
    assert!(log.entries().unwrap().is_empty());
}

#[test]
fn test_truncated_tail_is_ignored() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("audit.log");
    {
        let log = AuditLog::open(&path).unwrap();
        log.append(1, FileEvent::Created { name: "x".to_string() }).unwrap();
        log.append(1, FileEvent::Deleted).unwrap();
    }

    // Chop the last entry in half
    let len = std::fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 5).unwrap();

    let log = AuditLog::open(&path).unwrap();
    let entries = log.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event, FileEvent::Created { name: "x".to_string() });
}

#[test]
fn test_bad_magic() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("audit.log");
    std::fs::write(&path, b"NOTALOG!and more").unwrap();

    assert!(matches!(AuditLog::open(&path), Err(Error::StorageCorrupted(_))));
}

#[test]
fn test_concurrent_appends() {
    let temp_dir = TempDir::new().unwrap();
    let log = Arc::new(AuditLog::open(temp_dir.path().join("audit.log")).unwrap());

    let handles: Vec<_> = (0..8u64)
        .map(|i| {
            let log = log.clone();
            std::thread::spawn(move || {
                for _ in 0..10 {
                    log.append(i + 1, FileEvent::AccessedOriginal).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let entries = log.entries().unwrap();
    assert_eq!(entries.len(), 80);
    let mut sequences: Vec<_> = entries.iter().map(|e| e.sequence).collect();
    sequences.sort_unstable();
    assert_eq!(sequences, (0..80).collect::<Vec<_>>());
}
