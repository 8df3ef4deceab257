//! Crash recovery for the shared environment.
//!
//! Recovery scans the log segments of an environment home and collects the
//! table operations that must be redone after a crash.
//!
//! # Recovery Process
//!
//! 1. Read the environment checkpoint LSN from its meta file
//! 2. Scan every segment in LSN order, stopping at the first torn frame
//! 3. Group table operations by transaction
//! 4. Keep operations of committed transactions, in commit order, and drop
//!    everything at or below the checkpoint
//! 5. Hand the surviving operations to each table when it is attached
//!
//! Uncommitted and aborted transactions are discarded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::storage::wal::{self, LogRecordPayload, Lsn, TableOp, TxnId, WalError};

/// An operation to redo against a table, with the LSN it was logged at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedoOp {
    pub lsn: Lsn,
    pub op: TableOp,
}

/// Result of a recovery scan.
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Number of log records scanned.
    pub records_scanned: usize,

    /// Number of committed transactions with operations to redo.
    pub transactions_replayed: usize,

    /// Number of uncommitted or aborted transactions discarded.
    pub transactions_discarded: usize,

    /// LSN of the last checkpoint before recovery.
    pub checkpoint_lsn: Lsn,

    /// Highest LSN seen during recovery.
    pub recovered_lsn: Lsn,

    /// Highest transaction id seen during recovery.
    pub max_txn_id: TxnId,

    /// Segment holding the torn or corrupt record that stopped the scan.
    pub torn: Option<TornSegment>,

    /// Segments after the torn one, which were not read.
    pub unread_segments: Vec<PathBuf>,

    /// Operations to redo, keyed by table file id.
    pub redo: HashMap<String, Vec<RedoOp>>,
}

impl RecoveryResult {
    /// Number of operations waiting to be redone.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.redo.values().map(Vec::len).sum()
    }
}

/// Where the intact part of the log ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TornSegment {
    pub path: PathBuf,
    pub valid_len: u64,
}

#[derive(Debug, Default)]
struct PendingTransaction {
    ops: Vec<(String, RedoOp)>,
}

/// Scan the log in `home` and collect committed work above `checkpoint_lsn`.
pub fn recover(home: &Path, checkpoint_lsn: Lsn) -> Result<RecoveryResult, RecoveryError> {
    let mut result = RecoveryResult {
        checkpoint_lsn,
        recovered_lsn: checkpoint_lsn,
        ..RecoveryResult::default()
    };
    let mut pending: HashMap<TxnId, PendingTransaction> = HashMap::new();

    let mut segments = wal::list_segments(home)?.into_iter();
    while let Some(segment) = segments.next() {
        let scan = wal::read_segment(&segment)?;

        for record in scan.records {
            result.records_scanned += 1;
            result.recovered_lsn = result.recovered_lsn.max(record.lsn);
            result.max_txn_id = result.max_txn_id.max(record.txn_id);

            match record.payload {
                LogRecordPayload::Table { file, op } => {
                    if record.lsn <= checkpoint_lsn {
                        continue;
                    }
                    pending.entry(record.txn_id).or_default().ops.push((
                        file,
                        RedoOp {
                            lsn: record.lsn,
                            op,
                        },
                    ));
                }
                LogRecordPayload::Commit => {
                    if let Some(txn) = pending.remove(&record.txn_id) {
                        result.transactions_replayed += 1;
                        for (file, op) in txn.ops {
                            result.redo.entry(file).or_default().push(op);
                        }
                    }
                }
                LogRecordPayload::Abort => {
                    if pending.remove(&record.txn_id).is_some() {
                        result.transactions_discarded += 1;
                    }
                }
                LogRecordPayload::Checkpoint { .. } => {}
            }
        }

        if scan.torn {
            tracing::warn!(
                segment = %segment.path.display(),
                "log ends in a torn record; ignoring everything after it"
            );
            result.torn = Some(TornSegment {
                path: segment.path,
                valid_len: scan.valid_len,
            });
            result.unread_segments = segments.map(|s| s.path).collect();
            break;
        }
    }

    result.transactions_discarded += pending.len();
    if result.records_scanned > 0 {
        tracing::info!(
            records = result.records_scanned,
            replayed = result.transactions_replayed,
            discarded = result.transactions_discarded,
            recovered_lsn = result.recovered_lsn,
            "scanned environment log"
        );
    }
    Ok(result)
}

/// Errors that can occur during recovery.
#[derive(Debug)]
pub enum RecoveryError {
    /// Log error.
    Wal(WalError),
}

impl std::fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wal(e) => write!(f, "recovery failed reading the log: {e}"),
        }
    }
}

impl std::error::Error for RecoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Wal(e) => Some(e),
        }
    }
}

impl From<WalError> for RecoveryError {
    fn from(e: WalError) -> Self {
        Self::Wal(e)
    }
}

impl From<std::io::Error> for RecoveryError {
    fn from(e: std::io::Error) -> Self {
        Self::Wal(WalError::Io(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::wal::LogWriter;
    use std::fs::OpenOptions;
    use tempfile::tempdir;

    fn put(file: &str, key: &str, value: &str) -> LogRecordPayload {
        LogRecordPayload::Table {
            file: file.to_string(),
            op: TableOp::Put {
                key: key.as_bytes().to_vec(),
                value: value.as_bytes().to_vec(),
            },
        }
    }

    #[test]
    fn test_recover_empty_log() {
        let dir = tempdir().expect("create temp dir");
        let result = recover(dir.path(), 0).unwrap();

        assert_eq!(result.records_scanned, 0);
        assert_eq!(result.recovered_lsn, 0);
        assert!(result.redo.is_empty());
    }

    #[test]
    fn test_recover_committed_transaction() {
        let dir = tempdir().expect("create temp dir");
        let mut log = LogWriter::create(dir.path(), 1, 1 << 20).unwrap();
        log.append(1, put("a.tdb", "k", "v")).unwrap();
        log.append(1, LogRecordPayload::Commit).unwrap();
        log.sync().unwrap();

        let result = recover(dir.path(), 0).unwrap();
        assert_eq!(result.transactions_replayed, 1);
        assert_eq!(result.recovered_lsn, 2);
        assert_eq!(result.max_txn_id, 1);
        assert_eq!(result.redo["a.tdb"].len(), 1);
        assert_eq!(result.redo["a.tdb"][0].lsn, 1);
    }

    #[test]
    fn test_recover_uncommitted_and_aborted_transactions() {
        let dir = tempdir().expect("create temp dir");
        let mut log = LogWriter::create(dir.path(), 1, 1 << 20).unwrap();
        log.append(1, put("a.tdb", "k1", "v1")).unwrap();
        log.append(2, put("a.tdb", "k2", "v2")).unwrap();
        log.append(2, LogRecordPayload::Abort).unwrap();
        log.sync().unwrap();

        let result = recover(dir.path(), 0).unwrap();
        assert_eq!(result.transactions_replayed, 0);
        assert_eq!(result.transactions_discarded, 2);
        assert_eq!(result.pending_operations(), 0);
    }

    #[test]
    fn test_recover_interleaved_transactions_in_commit_order() {
        let dir = tempdir().expect("create temp dir");
        let mut log = LogWriter::create(dir.path(), 1, 1 << 20).unwrap();
        log.append(1, put("a.tdb", "k", "first")).unwrap();
        log.append(2, put("a.tdb", "k", "second")).unwrap();
        log.append(2, LogRecordPayload::Commit).unwrap();
        log.append(1, LogRecordPayload::Commit).unwrap();
        log.sync().unwrap();

        let result = recover(dir.path(), 0).unwrap();
        let ops = &result.redo["a.tdb"];
        assert_eq!(ops.len(), 2);
        // txn 2 committed first, so it is redone first
        assert_eq!(ops[0].lsn, 2);
        assert_eq!(ops[1].lsn, 1);
    }

    #[test]
    fn test_recover_skips_records_at_or_below_checkpoint() {
        let dir = tempdir().expect("create temp dir");
        let mut log = LogWriter::create(dir.path(), 1, 1 << 20).unwrap();
        log.append(1, put("a.tdb", "old", "v")).unwrap();
        log.append(1, LogRecordPayload::Commit).unwrap();
        log.append(2, put("b.tdb", "new", "v")).unwrap();
        log.append(2, LogRecordPayload::Commit).unwrap();
        log.sync().unwrap();

        let result = recover(dir.path(), 2).unwrap();
        assert!(!result.redo.contains_key("a.tdb"));
        assert_eq!(result.redo["b.tdb"].len(), 1);
        assert_eq!(result.recovered_lsn, 4);
    }

    #[test]
    fn test_recover_stops_at_torn_commit() {
        let dir = tempdir().expect("create temp dir");
        let mut log = LogWriter::create(dir.path(), 1, 1 << 20).unwrap();
        log.append(1, put("a.tdb", "k1", "v1")).unwrap();
        log.append(1, LogRecordPayload::Commit).unwrap();
        log.append(2, put("a.tdb", "k2", "v2")).unwrap();
        log.append(2, LogRecordPayload::Commit).unwrap();
        log.sync().unwrap();
        let path = log.segment().path.clone();
        drop(log);

        // Tear the final commit record.
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 2).unwrap();

        let result = recover(dir.path(), 0).unwrap();
        assert_eq!(result.torn.map(|t| t.path), Some(path));
        assert_eq!(result.transactions_replayed, 1);
        assert_eq!(result.redo["a.tdb"].len(), 1);
    }

    #[test]
    fn test_recover_across_segments() {
        let dir = tempdir().expect("create temp dir");
        let mut log = LogWriter::create(dir.path(), 1, 32).unwrap();
        for txn in 1..=4 {
            log.append(txn, put("a.tdb", &format!("k{txn}"), "v")).unwrap();
            log.append(txn, LogRecordPayload::Commit).unwrap();
        }
        log.sync().unwrap();

        assert!(wal::list_segments(dir.path()).unwrap().len() > 1);
        let result = recover(dir.path(), 0).unwrap();
        assert_eq!(result.transactions_replayed, 4);
        assert_eq!(result.max_txn_id, 4);
        assert_eq!(result.redo["a.tdb"].len(), 4);
    }
}
