//! Ordered tree engine.
//!
//! Entries live in a `BTreeMap` ordered by the case-insensitive comparator,
//! each key holding an ordered list of values. Every write is logged and
//! committed through the shared [`Environment`] before it is applied in
//! memory; the table file is a snapshot that is rewritten atomically at
//! table checkpoints (threshold reached, flush, close).
//!
//! # File Format
//!
//! ```text
//! header frame:  "RGTREE" | version u32 | environment id u64
//!                | snapshot lsn u64 | record count u64
//! record frames: in comparator order
//!   version 1 (legacy):  key | value               one frame per value
//!   version 2 (current): key | count u32 | values  one frame per key
//! ```
//!
//! All byte strings are length prefixed. On open the snapshot is loaded and
//! the environment hands back any committed operation newer than the
//! snapshot LSN, which is applied and checkpointed straight away.

// record counts and list lengths are bounded by MAX_PAYLOAD_LEN
#![allow(clippy::cast_possible_truncation)]

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::storage::checkpoint::{CheckpointConfig, CheckpointState};
use crate::storage::comparator::{self, CaseInsensitiveKey};
use crate::storage::engine::{EngineError, EngineKind, EntryIter, StorageEngine};
use crate::storage::environment::Environment;
use crate::storage::frame::{self, PayloadReader, PayloadWriter};
use crate::storage::recovery::RedoOp;
use crate::storage::wal::{Lsn, TableOp};

const TREE_MAGIC: &[u8; 6] = b"RGTREE";

/// On-disk layout of a tree file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TreeFormat {
    /// One record per value; duplicate keys repeat.
    Legacy = 1,
    /// One record per key with its value list.
    Current = 2,
}

impl TreeFormat {
    const fn from_version(version: u32) -> Option<Self> {
        match version {
            1 => Some(Self::Legacy),
            2 => Some(Self::Current),
            _ => None,
        }
    }

    #[must_use]
    pub const fn kind(self) -> EngineKind {
        match self {
            Self::Legacy => EngineKind::LegacyTree,
            Self::Current => EngineKind::Tree,
        }
    }
}

type Entries = BTreeMap<CaseInsensitiveKey, Vec<Vec<u8>>>;

struct Snapshot {
    format: TreeFormat,
    environment_id: u64,
    lsn: Lsn,
    entries: Entries,
}

/// Ordered engine with duplicate values per key.
#[derive(Debug)]
pub struct TreeEngine {
    path: PathBuf,
    file_id: String,
    format: TreeFormat,
    env: Arc<Environment>,
    entries: Entries,
    checkpoint: CheckpointState,
    closed: bool,
}

impl TreeEngine {
    /// Create an empty tree file. Fails if `path` already exists.
    pub fn create(
        path: &Path,
        format: TreeFormat,
        env: Arc<Environment>,
        config: CheckpointConfig,
    ) -> Result<Self, EngineError> {
        if path.exists() {
            return Err(EngineError::AlreadyExists(path.to_path_buf()));
        }
        let file_id = file_id(path);
        env.forget(&file_id)?;

        let lsn = env.current_lsn()?;
        let entries = Entries::new();
        write_snapshot(path, format, env.id(), lsn, &entries)?;
        env.attach(&file_id, env.id(), lsn)?;

        tracing::debug!(path = %path.display(), ?format, "created tree file");
        Ok(Self {
            path: path.to_path_buf(),
            file_id,
            format,
            env,
            entries,
            checkpoint: CheckpointState::new(config, lsn),
            closed: false,
        })
    }

    /// Open an existing tree file, redoing committed work it is missing.
    pub fn open(
        path: &Path,
        env: Arc<Environment>,
        config: CheckpointConfig,
    ) -> Result<Self, EngineError> {
        if !path.exists() {
            return Err(EngineError::NotFound(path.to_path_buf()));
        }
        let snapshot = read_snapshot(path)?;
        let file_id = file_id(path);
        let redo = env.attach(&file_id, snapshot.environment_id, snapshot.lsn)?;

        let mut engine = Self {
            path: path.to_path_buf(),
            file_id,
            format: snapshot.format,
            env,
            entries: snapshot.entries,
            checkpoint: CheckpointState::new(config, snapshot.lsn),
            closed: false,
        };

        if !redo.is_empty() {
            for RedoOp { op, .. } in redo {
                apply(&mut engine.entries, op);
            }
            engine.checkpoint.record_write(0);
            if let Err(e) = engine.flush() {
                // The environment keeps the redo until this table is flushed.
                engine.closed = true;
                engine.env.detach(&engine.file_id)?;
                return Err(e);
            }
        }
        Ok(engine)
    }

    #[must_use]
    pub const fn format(&self) -> TreeFormat {
        self.format
    }

    /// LSN of the last table checkpoint.
    #[must_use]
    pub const fn snapshot_lsn(&self) -> Lsn {
        self.checkpoint.last_checkpoint_lsn()
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }

    /// Log `ops` as one transaction, then apply them.
    fn commit(&mut self, ops: Vec<TableOp>) -> Result<(), EngineError> {
        self.ensure_open()?;
        let mut txn = self.env.begin()?;
        for op in &ops {
            txn.log(&self.file_id, op.clone())?;
        }
        let logged = txn.logged_bytes();
        txn.commit()?;

        for op in ops {
            apply(&mut self.entries, op);
        }
        self.checkpoint.record_write(logged);
        if self.checkpoint.should_checkpoint() {
            self.flush()?;
        }
        Ok(())
    }

    /// All values of `key`, in insertion order.
    pub fn getlist(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, EngineError> {
        self.ensure_open()?;
        Ok(self
            .entries
            .get(&CaseInsensitiveKey::new(key))
            .cloned()
            .unwrap_or_default())
    }

    /// Replace the values of `key`. An empty list removes the key.
    pub fn putlist(&mut self, key: &[u8], values: &[Vec<u8>]) -> Result<(), EngineError> {
        self.commit(list_ops(key, values))
    }

    /// Append a duplicate value to `key`.
    pub fn put_dup(&mut self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.commit(vec![TableOp::Append {
            key: key.to_vec(),
            value: value.to_vec(),
        }])
    }

    /// Replace the value lists of many keys in one transaction.
    pub fn put_lists<I>(&mut self, lists: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<Vec<u8>>)>,
    {
        let ops: Vec<TableOp> = lists
            .into_iter()
            .flat_map(|(key, values)| list_ops(&key, &values))
            .collect();
        if ops.is_empty() {
            return Ok(());
        }
        self.commit(ops)
    }

    /// Distinct keys with all of their values, in comparator order.
    pub fn lists(&self) -> Result<impl Iterator<Item = (&[u8], &[Vec<u8>])>, EngineError> {
        self.ensure_open()?;
        Ok(self
            .entries
            .iter()
            .map(|(key, values)| (key.as_bytes(), values.as_slice())))
    }
}

impl StorageEngine for TreeEngine {
    fn kind(&self) -> EngineKind {
        self.format.kind()
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        self.ensure_open()?;
        Ok(self
            .entries
            .get(&CaseInsensitiveKey::new(key))
            .and_then(|values| values.first().cloned()))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.commit(vec![TableOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        }])
    }

    fn delete(&mut self, key: &[u8]) -> Result<bool, EngineError> {
        self.ensure_open()?;
        if !self.entries.contains_key(&CaseInsensitiveKey::new(key)) {
            return Ok(false);
        }
        self.commit(vec![TableOp::Delete { key: key.to_vec() }])?;
        Ok(true)
    }

    fn has_key(&self, key: &[u8]) -> Result<bool, EngineError> {
        self.ensure_open()?;
        Ok(self.entries.contains_key(&CaseInsensitiveKey::new(key)))
    }

    fn has_pair(&self, key: &[u8], value: &[u8]) -> Result<bool, EngineError> {
        self.ensure_open()?;
        Ok(self
            .entries
            .get(&CaseInsensitiveKey::new(key))
            .is_some_and(|values| values.iter().any(|v| v == value)))
    }

    fn keys(&self) -> Result<Vec<Vec<u8>>, EngineError> {
        self.ensure_open()?;
        Ok(self.entries.keys().map(|k| k.as_bytes().to_vec()).collect())
    }

    /// One pair per stored value, duplicates included, in comparator order.
    /// The prefix is matched case-insensitively.
    fn each(&self, prefix: Option<&[u8]>) -> Result<EntryIter<'_>, EngineError> {
        self.ensure_open()?;
        let prefix = prefix.map(<[u8]>::to_vec);
        let start = prefix
            .as_deref()
            .map_or(Bound::Unbounded, |p| Bound::Included(CaseInsensitiveKey::new(p)));

        Ok(Box::new(
            self.entries
                .range((start, Bound::Unbounded))
                .take_while(move |(key, _)| {
                    prefix
                        .as_deref()
                        .is_none_or(|p| comparator::has_prefix(key.as_bytes(), p))
                })
                .flat_map(|(key, values)| {
                    values.iter().map(move |v| (key.as_bytes(), v.as_slice()))
                }),
        ))
    }

    fn len(&self) -> Result<usize, EngineError> {
        self.ensure_open()?;
        Ok(self.entries.len())
    }

    fn clear(&mut self) -> Result<(), EngineError> {
        self.commit(vec![TableOp::Clear])
    }

    /// Rewrite the table file if it has changes the file does not hold.
    fn flush(&mut self) -> Result<(), EngineError> {
        self.ensure_open()?;
        if !self.checkpoint.is_dirty() {
            return Ok(());
        }
        let lsn = self.env.current_lsn()?;
        write_snapshot(&self.path, self.format, self.env.id(), lsn, &self.entries)?;
        self.env.mark_durable(&self.file_id, lsn)?;
        self.checkpoint.reset(lsn);
        tracing::debug!(path = %self.path.display(), lsn, "checkpointed tree file");
        Ok(())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        let flushed = self.flush();
        self.closed = true;
        self.env.detach(&self.file_id)?;
        flushed
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for TreeEngine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(path = %self.path.display(), "failed to close tree file: {e}");
        }
    }
}

fn file_id(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn list_ops(key: &[u8], values: &[Vec<u8>]) -> Vec<TableOp> {
    let Some((first, rest)) = values.split_first() else {
        return vec![TableOp::Delete { key: key.to_vec() }];
    };
    let mut ops = Vec::with_capacity(values.len());
    ops.push(TableOp::Put {
        key: key.to_vec(),
        value: first.clone(),
    });
    ops.extend(rest.iter().map(|value| TableOp::Append {
        key: key.to_vec(),
        value: value.clone(),
    }));
    ops
}

fn apply(entries: &mut Entries, op: TableOp) {
    match op {
        TableOp::Put { key, value } => {
            // An existing key keeps its original spelling.
            entries.insert(CaseInsensitiveKey::from(key), vec![value]);
        }
        TableOp::Append { key, value } => {
            entries
                .entry(CaseInsensitiveKey::from(key))
                .or_default()
                .push(value);
        }
        TableOp::Delete { key } => {
            entries.remove(&CaseInsensitiveKey::from(key));
        }
        TableOp::Clear => entries.clear(),
    }
}

fn write_snapshot(
    path: &Path,
    format: TreeFormat,
    environment_id: u64,
    lsn: Lsn,
    entries: &Entries,
) -> Result<(), EngineError> {
    let record_count = match format {
        TreeFormat::Legacy => entries.values().map(Vec::len).sum::<usize>(),
        TreeFormat::Current => entries.len(),
    };

    let mut header = PayloadWriter::new();
    header
        .put_raw(TREE_MAGIC)
        .put_u32(format as u32)
        .put_u64(environment_id)
        .put_u64(lsn)
        .put_u64(record_count as u64);
    let header = header.finish();

    frame::write_file_atomically(path, |out| {
        let frame_err = |e| EngineError::from_frame(path, e);
        frame::write_frame(out, &header).map_err(frame_err)?;
        for (key, values) in entries {
            match format {
                TreeFormat::Legacy => {
                    for value in values {
                        let mut record = PayloadWriter::new();
                        record.put_bytes(key.as_bytes()).put_bytes(value);
                        frame::write_frame(out, &record.finish()).map_err(frame_err)?;
                    }
                }
                TreeFormat::Current => {
                    let mut record = PayloadWriter::new();
                    record
                        .put_bytes(key.as_bytes())
                        .put_u32(values.len() as u32);
                    for value in values {
                        record.put_bytes(value);
                    }
                    frame::write_frame(out, &record.finish()).map_err(frame_err)?;
                }
            }
        }
        Ok(())
    })
}

fn read_snapshot(path: &Path) -> Result<Snapshot, EngineError> {
    let mut input = BufReader::new(File::open(path)?);
    let frame_err = |e| EngineError::from_frame(path, e);

    let header = frame::read_frame(&mut input)
        .map_err(frame_err)?
        .ok_or_else(|| EngineError::corrupt(path, "missing header"))?;
    let mut reader = PayloadReader::new(&header);
    if reader.get_raw(TREE_MAGIC.len(), "magic").map_err(frame_err)? != TREE_MAGIC {
        return Err(EngineError::corrupt(path, "not a tree file"));
    }
    let version = reader.get_u32("version").map_err(frame_err)?;
    let format =
        TreeFormat::from_version(version).ok_or_else(|| EngineError::UnsupportedVersion {
            path: path.to_path_buf(),
            version,
        })?;
    let environment_id = reader.get_u64("environment id").map_err(frame_err)?;
    let lsn = reader.get_u64("snapshot lsn").map_err(frame_err)?;
    let record_count = reader.get_u64("record count").map_err(frame_err)?;

    let mut entries = Entries::new();
    let mut records = 0u64;
    while let Some(bytes) = frame::read_frame(&mut input).map_err(frame_err)? {
        let mut reader = PayloadReader::new(&bytes);
        let key = reader.get_bytes("key").map_err(frame_err)?;
        let list = entries.entry(CaseInsensitiveKey::new(key)).or_default();
        match format {
            TreeFormat::Legacy => {
                list.push(reader.get_bytes("value").map_err(frame_err)?.to_vec());
            }
            TreeFormat::Current => {
                let count = reader.get_u32("value count").map_err(frame_err)?;
                for _ in 0..count {
                    list.push(reader.get_bytes("value").map_err(frame_err)?.to_vec());
                }
            }
        }
        reader.finish("trailing record bytes").map_err(frame_err)?;
        records += 1;
    }

    if records != record_count {
        return Err(EngineError::corrupt(
            path,
            format!("expected {record_count} records, found {records}"),
        ));
    }
    Ok(Snapshot {
        format,
        environment_id,
        lsn,
        entries,
    })
}
