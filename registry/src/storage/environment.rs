//! Shared transactional environment for tree tables.
//!
//! One `Environment` owns the transaction log that every `TreeEngine` in the
//! process writes through. It is created by the top-level coordinator and
//! handed to each tree engine as an `Arc<Environment>`.
//!
//! # Home Directory
//!
//! ```text
//! <home>/ENV                          meta frame (id, segment size, checkpoint)
//! <home>/log.00000000000000000001     log segments
//! ```
//!
//! On open the log is scanned and the committed work of every table that was
//! not checkpointed is kept aside until that table attaches. A clean close
//! removes the home; a close with work still in flight keeps it so the next
//! open can recover.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::storage::checkpoint::{self, TableDurability};
use crate::storage::frame::{self, FrameError, PayloadReader, PayloadWriter};
use crate::storage::recovery::{self, RecoveryError, RecoveryResult, RedoOp};
use crate::storage::wal::{self, LogRecordPayload, LogWriter, Lsn, TableOp, TxnId, WalError};

/// Name of the meta file inside the home directory.
pub const META_FILE: &str = "ENV";

/// Log segment size used when none is configured (10MB).
pub const DEFAULT_LOG_SEGMENT_SIZE: u64 = 10 * 1024 * 1024;

/// Smallest accepted custom segment size (64KB).
pub const MIN_LOG_SEGMENT_SIZE: u64 = 64 * 1024;

/// Largest accepted custom segment size (1GB).
pub const MAX_LOG_SEGMENT_SIZE: u64 = 1024 * 1024 * 1024;

const META_MAGIC: &[u8; 6] = b"RGENV\0";
const META_VERSION: u32 = 1;

/// Options for opening an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentOptions {
    /// Custom log segment size. Dropped on the reduced retry.
    pub log_segment_size: Option<u64>,
    /// Fsync the log on every commit.
    pub sync_on_commit: bool,
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            log_segment_size: None,
            sync_on_commit: true,
        }
    }
}

impl EnvironmentOptions {
    /// The options used for the retry after a failed open.
    #[must_use]
    pub const fn reduced(self) -> Self {
        Self {
            log_segment_size: None,
            sync_on_commit: self.sync_on_commit,
        }
    }
}

/// Outcome of [`Environment::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Nothing was in flight; the home directory was removed.
    Removed,
    /// Work was in flight; the home directory was kept for recovery.
    Preserved {
        active_transactions: usize,
        dirty_files: usize,
        pending_redo_files: usize,
    },
    /// The environment had already been closed.
    AlreadyClosed,
}

/// Diagnostic counters of an open environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentStats {
    pub home: PathBuf,
    pub environment_id: u64,
    pub current_lsn: Lsn,
    pub checkpoint_lsn: Lsn,
    pub active_transactions: usize,
    pub committed_transactions: u64,
    pub aborted_transactions: u64,
    pub attached_files: usize,
    pub dirty_files: usize,
    pub pending_redo_files: usize,
    pub log_segments: usize,
    pub log_bytes: u64,
    pub log_segment_size: u64,
    pub checkpoints: u64,
    pub archived_segments: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EnvMeta {
    environment_id: u64,
    segment_size: u64,
    checkpoint_lsn: Lsn,
}

impl EnvMeta {
    fn read(path: &Path) -> Result<Self, EnvironmentError> {
        let mut file = File::open(path)?;
        let bytes = match frame::read_frame(&mut file) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(EnvironmentError::CorruptMeta("empty meta file")),
            Err(FrameError::Io(e)) => return Err(EnvironmentError::Io(e)),
            Err(_) => return Err(EnvironmentError::CorruptMeta("torn meta frame")),
        };

        let mut reader = PayloadReader::new(&bytes);
        let corrupt = |_| EnvironmentError::CorruptMeta("truncated meta");
        if reader.get_raw(META_MAGIC.len(), "magic").map_err(corrupt)? != META_MAGIC {
            return Err(EnvironmentError::CorruptMeta("bad magic"));
        }
        let version = reader.get_u32("version").map_err(corrupt)?;
        if version != META_VERSION {
            return Err(EnvironmentError::UnsupportedVersion(version));
        }
        Ok(Self {
            environment_id: reader.get_u64("environment id").map_err(corrupt)?,
            segment_size: reader.get_u64("segment size").map_err(corrupt)?,
            checkpoint_lsn: reader.get_u64("checkpoint lsn").map_err(corrupt)?,
        })
    }

    fn write(&self, path: &Path) -> Result<(), EnvironmentError> {
        let mut payload = PayloadWriter::new();
        payload
            .put_raw(META_MAGIC)
            .put_u32(META_VERSION)
            .put_u64(self.environment_id)
            .put_u64(self.segment_size)
            .put_u64(self.checkpoint_lsn);
        let payload = payload.finish();

        frame::write_file_atomically(path, |out| {
            frame::write_frame(out, &payload)?;
            Ok(())
        })
    }
}

#[derive(Debug)]
struct EnvState {
    /// `None` once the environment is closed.
    log: Option<LogWriter>,
    closed_lsn: Lsn,
    next_txn_id: TxnId,
    active: HashSet<TxnId>,
    attached: HashMap<String, TableDurability>,
    /// Attached tables whose engine went away with unflushed changes.
    abandoned: HashSet<String>,
    pending_redo: HashMap<String, Vec<RedoOp>>,
    checkpoint_lsn: Lsn,
    committed: u64,
    aborted: u64,
    checkpoints: u64,
    archived_segments: u64,
}

/// The shared transactional environment.
#[derive(Debug)]
pub struct Environment {
    home: PathBuf,
    environment_id: u64,
    segment_size: u64,
    sync_on_commit: bool,
    state: Mutex<EnvState>,
}

impl Environment {
    /// Open the environment in `home`, creating it if needed.
    ///
    /// If the open fails while a custom log segment size is set, it is retried
    /// once without it before the error is returned.
    pub fn open_or_create(
        home: &Path,
        options: EnvironmentOptions,
    ) -> Result<Arc<Self>, EnvironmentError> {
        match Self::open_with(home, options) {
            Ok(env) => Ok(env),
            Err(e) if options.log_segment_size.is_some() => {
                tracing::warn!(
                    home = %home.display(),
                    "environment open failed ({e}); retrying without the custom log size"
                );
                Self::open_with(home, options.reduced())
            }
            Err(e) => Err(e),
        }
    }

    fn open_with(home: &Path, options: EnvironmentOptions) -> Result<Arc<Self>, EnvironmentError> {
        if let Some(size) = options.log_segment_size {
            if !(MIN_LOG_SEGMENT_SIZE..=MAX_LOG_SEGMENT_SIZE).contains(&size) {
                return Err(EnvironmentError::InvalidLogSize(size));
            }
        }

        std::fs::create_dir_all(home)?;
        let meta_path = home.join(META_FILE);
        let meta = if meta_path.exists() {
            let meta = EnvMeta::read(&meta_path)?;
            if let Some(requested) = options.log_segment_size {
                if requested != meta.segment_size {
                    return Err(EnvironmentError::LogSizeMismatch {
                        requested,
                        existing: meta.segment_size,
                    });
                }
            }
            meta
        } else {
            let meta = EnvMeta {
                environment_id: rand::random(),
                segment_size: options.log_segment_size.unwrap_or(DEFAULT_LOG_SEGMENT_SIZE),
                checkpoint_lsn: 0,
            };
            meta.write(&meta_path)?;
            meta
        };

        let mut recovered = recovery::recover(home, meta.checkpoint_lsn)?;
        repair_log(&recovered)?;
        let pending_redo = take_live_redo(&mut recovered);

        let last_lsn = recovered.recovered_lsn.max(meta.checkpoint_lsn);
        let log = LogWriter::create(home, last_lsn + 1, meta.segment_size)?;

        tracing::info!(
            home = %home.display(),
            environment_id = meta.environment_id,
            lsn = last_lsn,
            pending_redo_files = pending_redo.len(),
            "opened environment"
        );

        Ok(Arc::new(Self {
            home: home.to_path_buf(),
            environment_id: meta.environment_id,
            segment_size: meta.segment_size,
            sync_on_commit: options.sync_on_commit,
            state: Mutex::new(EnvState {
                log: Some(log),
                closed_lsn: last_lsn,
                next_txn_id: recovered.max_txn_id + 1,
                active: HashSet::new(),
                attached: HashMap::new(),
                abandoned: HashSet::new(),
                pending_redo,
                checkpoint_lsn: meta.checkpoint_lsn,
                committed: 0,
                aborted: 0,
                checkpoints: 0,
                archived_segments: 0,
            }),
        }))
    }

    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Random id chosen when the home was created. Tree snapshots record it
    /// so that LSNs from a previous environment are never trusted.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.environment_id
    }

    fn lock(&self) -> Result<MutexGuard<'_, EnvState>, EnvironmentError> {
        self.state.lock().map_err(|_| EnvironmentError::LockPoisoned)
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().map_or(true, |state| state.log.is_none())
    }

    /// Last LSN handed out. Still answers after close.
    pub fn current_lsn(&self) -> Result<Lsn, EnvironmentError> {
        let state = self.lock()?;
        Ok(state
            .log
            .as_ref()
            .map_or(state.closed_lsn, LogWriter::last_lsn))
    }

    /// Begin a transaction.
    pub fn begin(&self) -> Result<Transaction<'_>, EnvironmentError> {
        let mut state = self.lock()?;
        if state.log.is_none() {
            return Err(EnvironmentError::Closed);
        }
        let id = state.next_txn_id;
        state.next_txn_id += 1;
        state.active.insert(id);
        Ok(Transaction {
            env: self,
            id,
            first_lsn: None,
            touched: HashSet::new(),
            logged_bytes: 0,
            finished: false,
        })
    }

    #[must_use]
    pub fn has_active_transactions(&self) -> bool {
        self.lock().is_ok_and(|state| !state.active.is_empty())
    }

    /// Attach a table file, returning the committed operations it is missing.
    ///
    /// `snapshot_id` and `snapshot_lsn` come from the table's file header.
    pub(crate) fn attach(
        &self,
        file: &str,
        snapshot_id: u64,
        snapshot_lsn: Lsn,
    ) -> Result<Vec<RedoOp>, EnvironmentError> {
        let mut state = self.lock()?;
        if state.log.is_none() {
            return Err(EnvironmentError::Closed);
        }
        let abandoned = state.abandoned.remove(file);
        if state.attached.contains_key(file) && !abandoned {
            return Err(EnvironmentError::AlreadyAttached(file.to_string()));
        }

        let base = if snapshot_id == self.environment_id {
            snapshot_lsn
        } else {
            0
        };
        let candidates = if abandoned {
            // The file misses committed records that only the log holds.
            let floor = state
                .attached
                .get(file)
                .map_or(base, |table| table.durable_lsn.min(base));
            if let Some(log) = state.log.as_mut() {
                log.flush()?;
            }
            tracing::warn!(file, floor, "re-reading log records of a table closed unflushed");
            recovery::recover(&self.home, floor)?
                .redo
                .remove(file)
                .unwrap_or_default()
        } else {
            state.pending_redo.remove(file).unwrap_or_default()
        };
        let redo: Vec<RedoOp> = candidates.into_iter().filter(|op| op.lsn > base).collect();

        state.attached.insert(
            file.to_string(),
            TableDurability {
                durable_lsn: base,
                dirty: !redo.is_empty(),
            },
        );
        if !redo.is_empty() {
            tracing::info!(file, operations = redo.len(), "redoing committed operations");
        }
        Ok(redo)
    }

    /// Drop pending redo for a file that is being created from scratch.
    pub(crate) fn forget(&self, file: &str) -> Result<(), EnvironmentError> {
        let mut state = self.lock()?;
        let pending = state.pending_redo.remove(file).is_some();
        let abandoned = state.abandoned.remove(file) && state.attached.remove(file).is_some();
        if pending || abandoned {
            tracing::warn!(file, "discarding log records of a table that no longer exists");
        }
        Ok(())
    }

    /// Record that `file` holds every committed change up to `lsn`.
    pub(crate) fn mark_durable(&self, file: &str, lsn: Lsn) -> Result<(), EnvironmentError> {
        let mut state = self.lock()?;
        if let Some(table) = state.attached.get_mut(file) {
            table.durable_lsn = lsn;
            table.dirty = false;
        }
        Ok(())
    }

    /// Release a table. A table with unflushed changes stays registered as
    /// dirty, so the log that holds them outlives it; the next attach of the
    /// same file re-reads them from the log.
    pub(crate) fn detach(&self, file: &str) -> Result<(), EnvironmentError> {
        let mut state = self.lock()?;
        match state.attached.get(file) {
            Some(table) if table.dirty => {
                tracing::warn!(
                    file,
                    durable_lsn = table.durable_lsn,
                    "table released with unflushed changes; keeping its log records"
                );
                state.abandoned.insert(file.to_string());
            }
            Some(_) => {
                state.attached.remove(file);
            }
            None => {}
        }
        Ok(())
    }

    fn append(
        &self,
        txn: TxnId,
        payload: LogRecordPayload,
    ) -> Result<(Lsn, u64), EnvironmentError> {
        let mut state = self.lock()?;
        let log = state.log.as_mut().ok_or(EnvironmentError::Closed)?;
        Ok(log.append(txn, payload)?)
    }

    fn finish(&self, txn: &mut Transaction<'_>, commit: bool) -> Result<Lsn, EnvironmentError> {
        let mut state = self.lock()?;
        state.active.remove(&txn.id);
        let log = state.log.as_mut().ok_or(EnvironmentError::Closed)?;

        if !commit {
            let (lsn, _) = log.append(txn.id, LogRecordPayload::Abort)?;
            log.flush()?;
            state.aborted += 1;
            return Ok(lsn);
        }

        let (lsn, _) = log.append(txn.id, LogRecordPayload::Commit)?;
        if self.sync_on_commit {
            log.sync()?;
        } else {
            log.flush()?;
        }
        state.committed += 1;

        let floor = txn.first_lsn.unwrap_or(lsn).saturating_sub(1);
        for file in &txn.touched {
            if let Some(table) = state.attached.get_mut(file) {
                if !table.dirty {
                    // Everything of a clean table up to its first new record
                    // is already in its file.
                    table.durable_lsn = table.durable_lsn.max(floor);
                    table.dirty = true;
                }
            }
        }
        Ok(lsn)
    }

    /// Write a checkpoint record and persist the checkpoint LSN.
    pub fn checkpoint(&self) -> Result<Lsn, EnvironmentError> {
        let mut state = self.lock()?;
        let current = state
            .log
            .as_ref()
            .map(LogWriter::last_lsn)
            .ok_or(EnvironmentError::Closed)?;

        let first_redo: HashMap<String, Lsn> = state
            .pending_redo
            .iter()
            .filter_map(|(file, ops)| ops.first().map(|op| (file.clone(), op.lsn)))
            .collect();
        let lsn = checkpoint::checkpoint_lsn(current, state.attached.values(), &first_redo)
            .max(state.checkpoint_lsn);

        if let Some(log) = state.log.as_mut() {
            log.append(0, LogRecordPayload::Checkpoint {
                checkpoint_lsn: lsn,
            })?;
            log.sync()?;
        }
        EnvMeta {
            environment_id: self.environment_id,
            segment_size: self.segment_size,
            checkpoint_lsn: lsn,
        }
        .write(&self.home.join(META_FILE))?;

        state.checkpoint_lsn = lsn;
        state.checkpoints += 1;
        tracing::debug!(checkpoint_lsn = lsn, "environment checkpoint");
        Ok(lsn)
    }

    /// Delete log segments whose records are all covered by the checkpoint.
    pub fn archive_and_delete_logs(&self) -> Result<Vec<PathBuf>, EnvironmentError> {
        let mut state = self.lock()?;
        state
            .log
            .as_mut()
            .ok_or(EnvironmentError::Closed)?
            .flush()?;

        let segments = wal::list_segments(&self.home)?;
        let mut removed = Vec::new();
        for segment in checkpoint::archivable_segments(&segments, state.checkpoint_lsn) {
            std::fs::remove_file(&segment.path)?;
            removed.push(segment.path.clone());
        }
        state.archived_segments += removed.len() as u64;

        if !removed.is_empty() {
            tracing::info!(segments = removed.len(), "archived log segments");
        }
        Ok(removed)
    }

    /// Environment statistics. Failures are logged and yield `None`.
    #[must_use]
    pub fn stats(&self) -> Option<EnvironmentStats> {
        match self.collect_stats() {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::warn!("failed to collect environment statistics: {e}");
                None
            }
        }
    }

    fn collect_stats(&self) -> Result<EnvironmentStats, EnvironmentError> {
        let state = self.lock()?;
        let log = state.log.as_ref().ok_or(EnvironmentError::Closed)?;

        let segments = wal::list_segments(&self.home)?;
        let mut log_bytes = 0;
        for segment in &segments {
            log_bytes += std::fs::metadata(&segment.path)?.len();
        }

        Ok(EnvironmentStats {
            home: self.home.clone(),
            environment_id: self.environment_id,
            current_lsn: log.last_lsn(),
            checkpoint_lsn: state.checkpoint_lsn,
            active_transactions: state.active.len(),
            committed_transactions: state.committed,
            aborted_transactions: state.aborted,
            attached_files: state.attached.len(),
            dirty_files: state.attached.values().filter(|t| t.dirty).count(),
            pending_redo_files: state.pending_redo.len(),
            log_segments: segments.len(),
            log_bytes,
            log_segment_size: self.segment_size,
            checkpoints: state.checkpoints,
            archived_segments: state.archived_segments,
        })
    }

    /// Close the environment.
    ///
    /// The home directory is removed only when no transaction is active, no
    /// attached table has unflushed changes and no redo is pending.
    /// Otherwise it is kept, with a warning, for the next open to recover.
    pub fn close(&self) -> Result<CloseOutcome, EnvironmentError> {
        let mut state = self.lock()?;
        let Some(mut log) = state.log.take() else {
            return Ok(CloseOutcome::AlreadyClosed);
        };
        state.closed_lsn = log.last_lsn();
        let synced = log.sync();
        drop(log);

        let active_transactions = state.active.len();
        let dirty_files = state.attached.values().filter(|t| t.dirty).count();
        let pending_redo_files = state.pending_redo.len();
        synced?;

        if active_transactions > 0 || dirty_files > 0 || pending_redo_files > 0 {
            tracing::warn!(
                home = %self.home.display(),
                active_transactions,
                dirty_files,
                pending_redo_files,
                "environment closed with work in flight; keeping its files for recovery"
            );
            return Ok(CloseOutcome::Preserved {
                active_transactions,
                dirty_files,
                pending_redo_files,
            });
        }

        std::fs::remove_dir_all(&self.home)?;
        tracing::info!(home = %self.home.display(), "closed environment");
        Ok(CloseOutcome::Removed)
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        let Ok(state) = self.state.get_mut() else {
            return;
        };
        if let Some(log) = state.log.as_mut() {
            tracing::warn!(
                home = %self.home.display(),
                "environment dropped without close; keeping its files"
            );
            if let Err(e) = log.sync() {
                tracing::warn!(home = %self.home.display(), "failed to sync log on drop: {e}");
            }
        }
    }
}

/// Cut the log back to its intact prefix after a torn record.
fn repair_log(recovered: &RecoveryResult) -> Result<(), EnvironmentError> {
    let Some(torn) = &recovered.torn else {
        return Ok(());
    };
    OpenOptions::new()
        .write(true)
        .open(&torn.path)?
        .set_len(torn.valid_len)?;

    for path in &recovered.unread_segments {
        let mut aside = path.as_os_str().to_owned();
        aside.push(".discarded");
        std::fs::rename(path, &aside)?;
        tracing::warn!(segment = %path.display(), "set aside log segment after a torn record");
    }
    Ok(())
}

/// Take the redo of tables that still exist on disk.
fn take_live_redo(recovered: &mut RecoveryResult) -> HashMap<String, Vec<RedoOp>> {
    let mut redo = std::mem::take(&mut recovered.redo);
    redo.retain(|file, ops| {
        let exists = Path::new(file).exists();
        if !exists {
            tracing::warn!(
                file,
                operations = ops.len(),
                "dropping log records of a missing table"
            );
        }
        exists
    });
    redo
}

/// A transaction in the environment log.
///
/// Dropping a transaction that was neither committed nor aborted aborts it.
#[derive(Debug)]
pub struct Transaction<'env> {
    env: &'env Environment,
    id: TxnId,
    first_lsn: Option<Lsn>,
    touched: HashSet<String>,
    logged_bytes: u64,
    finished: bool,
}

impl Transaction<'_> {
    #[must_use]
    pub const fn id(&self) -> TxnId {
        self.id
    }

    /// Bytes logged by this transaction so far.
    #[must_use]
    pub const fn logged_bytes(&self) -> u64 {
        self.logged_bytes
    }

    /// Log an operation against `file`.
    pub fn log(&mut self, file: &str, op: TableOp) -> Result<Lsn, EnvironmentError> {
        let (lsn, written) = self.env.append(
            self.id,
            LogRecordPayload::Table {
                file: file.to_string(),
                op,
            },
        )?;
        self.first_lsn.get_or_insert(lsn);
        if !self.touched.contains(file) {
            self.touched.insert(file.to_string());
        }
        self.logged_bytes += written;
        Ok(lsn)
    }

    pub fn put(&mut self, file: &str, key: &[u8], value: &[u8]) -> Result<Lsn, EnvironmentError> {
        self.log(
            file,
            TableOp::Put {
                key: key.to_vec(),
                value: value.to_vec(),
            },
        )
    }

    pub fn append(
        &mut self,
        file: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<Lsn, EnvironmentError> {
        self.log(
            file,
            TableOp::Append {
                key: key.to_vec(),
                value: value.to_vec(),
            },
        )
    }

    pub fn delete(&mut self, file: &str, key: &[u8]) -> Result<Lsn, EnvironmentError> {
        self.log(file, TableOp::Delete { key: key.to_vec() })
    }

    pub fn clear(&mut self, file: &str) -> Result<Lsn, EnvironmentError> {
        self.log(file, TableOp::Clear)
    }

    /// Commit, returning the LSN of the commit record.
    pub fn commit(mut self) -> Result<Lsn, EnvironmentError> {
        self.finished = true;
        let env = self.env;
        env.finish(&mut self, true)
    }

    pub fn abort(mut self) -> Result<(), EnvironmentError> {
        self.finished = true;
        let env = self.env;
        env.finish(&mut self, false).map(|_| ())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let env = self.env;
        match env.finish(self, false) {
            Ok(_) | Err(EnvironmentError::Closed) => {}
            Err(e) => tracing::warn!(txn = self.id, "failed to abort dropped transaction: {e}"),
        }
    }
}

/// Errors that can occur in the environment.
#[derive(Debug)]
pub enum EnvironmentError {
    /// I/O error.
    Io(std::io::Error),
    /// Log error.
    Wal(WalError),
    /// Recovery error.
    Recovery(RecoveryError),
    /// The meta file cannot be decoded.
    CorruptMeta(&'static str),
    /// The home was written by an unknown environment version.
    UnsupportedVersion(u32),
    /// Custom log segment size outside the accepted range.
    InvalidLogSize(u64),
    /// Custom log segment size differs from the one the home was created with.
    LogSizeMismatch { requested: u64, existing: u64 },
    /// The table file is already attached.
    AlreadyAttached(String),
    /// The environment has been closed.
    Closed,
    /// A thread panicked while holding the environment lock.
    LockPoisoned,
}

impl EnvironmentError {
    /// Whether the environment cannot be used after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Recovery(_)
                | Self::CorruptMeta(_)
                | Self::UnsupportedVersion(_)
                | Self::InvalidLogSize(_)
                | Self::LogSizeMismatch { .. }
                | Self::LockPoisoned
        )
    }
}

impl std::fmt::Display for EnvironmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "environment I/O error: {e}"),
            Self::Wal(e) => write!(f, "environment log error: {e}"),
            Self::Recovery(e) => write!(f, "environment recovery error: {e}"),
            Self::CorruptMeta(what) => write!(f, "corrupt environment meta file: {what}"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported environment version {v}"),
            Self::InvalidLogSize(size) => write!(
                f,
                "log segment size {size} outside {MIN_LOG_SEGMENT_SIZE}..={MAX_LOG_SEGMENT_SIZE}"
            ),
            Self::LogSizeMismatch {
                requested,
                existing,
            } => write!(
                f,
                "log segment size {requested} differs from existing environment ({existing})"
            ),
            Self::AlreadyAttached(file) => write!(f, "table {file} is already attached"),
            Self::Closed => write!(f, "environment is closed"),
            Self::LockPoisoned => write!(f, "environment lock poisoned"),
        }
    }
}

impl std::error::Error for EnvironmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Wal(e) => Some(e),
            Self::Recovery(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EnvironmentError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<WalError> for EnvironmentError {
    fn from(e: WalError) -> Self {
        match e {
            WalError::Io(e) => Self::Io(e),
            other => Self::Wal(other),
        }
    }
}

impl From<RecoveryError> for EnvironmentError {
    fn from(e: RecoveryError) -> Self {
        Self::Recovery(e)
    }
}

impl From<FrameError> for EnvironmentError {
    fn from(e: FrameError) -> Self {
        Self::Wal(e.into())
    }
}
