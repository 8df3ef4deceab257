//! Checkpoint bookkeeping for tree tables and the shared log.
//!
//! Tree tables keep their committed state in memory and in the environment's
//! log. A table checkpoint rewrites the table file and records the LSN it
//! covers; after that the log records for the table are no longer needed.
//!
//! # Checkpoint Triggers
//!
//! A table checkpoint happens when:
//! - The write count threshold is reached (default: 1000 writes)
//! - The logged-bytes threshold is reached (default: 4MB)
//! - The table is flushed or closed explicitly
//!
//! The environment checkpoint LSN is the highest LSN below which every table
//! is durable; log segments entirely below it can be archived.

use std::collections::HashMap;

use crate::storage::wal::{LogSegment, Lsn};

/// Default number of writes between automatic table checkpoints.
pub const DEFAULT_WRITES_THRESHOLD: u64 = 1000;

/// Default number of logged bytes between automatic table checkpoints (4MB).
pub const DEFAULT_BYTES_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Checkpoint configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CheckpointConfig {
    /// Number of writes between automatic checkpoints.
    /// Set to 0 to disable write-based checkpoints.
    pub writes_threshold: u64,

    /// Number of bytes logged between automatic checkpoints.
    /// Set to 0 to disable byte-based checkpoints.
    pub bytes_threshold: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            writes_threshold: DEFAULT_WRITES_THRESHOLD,
            bytes_threshold: DEFAULT_BYTES_THRESHOLD,
        }
    }
}

impl CheckpointConfig {
    #[must_use]
    pub const fn new(writes_threshold: u64, bytes_threshold: u64) -> Self {
        Self {
            writes_threshold,
            bytes_threshold,
        }
    }

    /// Disable automatic checkpoints (explicit flush only).
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            writes_threshold: 0,
            bytes_threshold: 0,
        }
    }
}

/// Tracks the writes a table has accumulated since its last checkpoint.
#[derive(Debug)]
pub struct CheckpointState {
    config: CheckpointConfig,
    last_checkpoint_lsn: Lsn,
    writes_since_checkpoint: u64,
    bytes_since_checkpoint: u64,
}

impl CheckpointState {
    #[must_use]
    pub const fn new(config: CheckpointConfig, last_checkpoint_lsn: Lsn) -> Self {
        Self {
            config,
            last_checkpoint_lsn,
            writes_since_checkpoint: 0,
            bytes_since_checkpoint: 0,
        }
    }

    #[must_use]
    pub const fn last_checkpoint_lsn(&self) -> Lsn {
        self.last_checkpoint_lsn
    }

    #[must_use]
    pub const fn writes_since_checkpoint(&self) -> u64 {
        self.writes_since_checkpoint
    }

    /// Whether the table holds changes that are not in its file yet.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.writes_since_checkpoint > 0
    }

    /// Record a committed write of `bytes` logged bytes.
    pub const fn record_write(&mut self, bytes: u64) {
        self.writes_since_checkpoint += 1;
        self.bytes_since_checkpoint += bytes;
    }

    #[must_use]
    pub const fn should_checkpoint(&self) -> bool {
        if self.config.writes_threshold > 0
            && self.writes_since_checkpoint >= self.config.writes_threshold
        {
            return true;
        }

        self.config.bytes_threshold > 0
            && self.bytes_since_checkpoint >= self.config.bytes_threshold
    }

    /// Reset counters after the table file has been rewritten at `lsn`.
    pub const fn reset(&mut self, lsn: Lsn) {
        self.last_checkpoint_lsn = lsn;
        self.writes_since_checkpoint = 0;
        self.bytes_since_checkpoint = 0;
    }
}

/// Durability state of one table as seen by the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDurability {
    /// Every log record for the table at or below this LSN is in its file.
    pub durable_lsn: Lsn,
    /// Whether committed records above `durable_lsn` exist.
    pub dirty: bool,
}

/// Compute the environment checkpoint LSN.
///
/// This is the current LSN, lowered to the durable LSN of every dirty
/// attached table and to just below the first pending redo record of every
/// table that has not been attached yet.
#[must_use]
pub fn checkpoint_lsn<'a>(
    current_lsn: Lsn,
    attached: impl IntoIterator<Item = &'a TableDurability>,
    pending_redo: &HashMap<String, Lsn>,
) -> Lsn {
    let attached_floor = attached
        .into_iter()
        .filter(|table| table.dirty)
        .map(|table| table.durable_lsn)
        .min()
        .unwrap_or(current_lsn);
    let redo_floor = pending_redo
        .values()
        .map(|first| first.saturating_sub(1))
        .min()
        .unwrap_or(current_lsn);
    current_lsn.min(attached_floor).min(redo_floor)
}

/// Select the log segments whose records are all at or below `checkpoint_lsn`.
///
/// `segments` must be sorted by first LSN. The last segment is the one being
/// written and is never archivable.
#[must_use]
pub fn archivable_segments(segments: &[LogSegment], checkpoint_lsn: Lsn) -> Vec<&LogSegment> {
    segments
        .windows(2)
        .filter(|pair| pair[1].first_lsn <= checkpoint_lsn.saturating_add(1))
        .map(|pair| &pair[0])
        .collect()
}
