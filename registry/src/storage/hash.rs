//! Unordered hash engine.
//!
//! A hash file is a header frame followed by an append-only log of `Put` and
//! `Delete` records. The whole index is rebuilt in memory on open, so reads
//! never touch the disk. A crash can leave a torn record at the end of the
//! file; it is cut off on the next open. A bad record with intact records
//! after it is corruption, not a crash, and fails the open with the file
//! left as it is.
//!
//! Overwritten and deleted records stay in the file until it is compacted,
//! which happens on open once dead records outnumber live ones, and on
//! `clear`.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, Write};
use std::path::{Path, PathBuf};

use crate::storage::engine::{EngineError, EngineKind, EntryIter, StorageEngine};
use crate::storage::frame::{self, FRAME_OVERHEAD, FrameError, PayloadReader, PayloadWriter};

const HASH_MAGIC: &[u8; 6] = b"RGHASH";
const HASH_VERSION: u32 = 1;

const RECORD_PUT: u8 = 0x01;
const RECORD_DELETE: u8 = 0x02;

/// Dead records tolerated before an open compacts the file.
const COMPACTION_MIN_DEAD: u64 = 64;

/// Unordered engine backed by an append-only file.
#[derive(Debug)]
pub struct HashEngine {
    path: PathBuf,
    /// `None` once closed.
    file: Option<File>,
    entries: HashMap<Vec<u8>, Vec<u8>>,
    dead_records: u64,
    read_only: bool,
}

impl HashEngine {
    /// Create an empty hash file. Fails if `path` already exists.
    pub fn create(path: &Path) -> Result<Self, EngineError> {
        let mut file = match OpenOptions::new().append(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(EngineError::AlreadyExists(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&frame::encode_frame(&header()))?;
        file.sync_all()?;

        tracing::debug!(path = %path.display(), "created hash file");
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            entries: HashMap::new(),
            dead_records: 0,
            read_only: false,
        })
    }

    /// Open an existing hash file and rebuild its index.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        Self::load(path, false)
    }

    /// Open an existing hash file without ever modifying it.
    ///
    /// A torn tail is skipped instead of cut off, the file is never
    /// compacted, and writes fail with [`EngineError::ReadOnly`].
    pub fn open_read_only(path: &Path) -> Result<Self, EngineError> {
        Self::load(path, true)
    }

    fn load(path: &Path, read_only: bool) -> Result<Self, EngineError> {
        let input = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let file_len = input.metadata()?.len();
        let mut input = BufReader::new(input);

        let header_bytes = frame::read_frame(&mut input)
            .map_err(|e| EngineError::from_frame(path, e))?
            .ok_or_else(|| EngineError::corrupt(path, "missing header"))?;
        check_header(path, &header_bytes)?;

        let mut entries = HashMap::new();
        let mut dead_records = 0u64;
        let mut valid_len = (header_bytes.len() + FRAME_OVERHEAD) as u64;
        let mut torn = false;

        loop {
            let bytes = match frame::read_frame(&mut input) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(e) if e.is_torn() => {
                    let frame_end = match &e {
                        FrameError::TooLarge(len) => valid_len
                            .saturating_add(*len)
                            .saturating_add(FRAME_OVERHEAD as u64),
                        _ => input.stream_position()?,
                    };
                    if frame_end < file_len {
                        return Err(EngineError::from_frame(path, e));
                    }
                    torn = true;
                    break;
                }
                Err(e) => return Err(EngineError::from_frame(path, e)),
            };

            let mut reader = PayloadReader::new(&bytes);
            let frame_err = |e| EngineError::from_frame(path, e);
            match reader.get_u8("record type").map_err(frame_err)? {
                RECORD_PUT => {
                    let key = reader.get_bytes("key").map_err(frame_err)?.to_vec();
                    let value = reader.get_bytes("value").map_err(frame_err)?.to_vec();
                    if entries.insert(key, value).is_some() {
                        dead_records += 1;
                    }
                }
                RECORD_DELETE => {
                    let key = reader.get_bytes("key").map_err(frame_err)?;
                    dead_records += 1;
                    if entries.remove(key).is_some() {
                        dead_records += 1;
                    }
                }
                other => {
                    return Err(EngineError::corrupt(
                        path,
                        format!("unknown record type 0x{other:02x}"),
                    ));
                }
            }
            reader.finish("trailing record bytes").map_err(frame_err)?;
            valid_len += (bytes.len() + FRAME_OVERHEAD) as u64;
        }
        drop(input);

        if read_only {
            if torn {
                tracing::warn!(
                    path = %path.display(),
                    valid_len,
                    "hash file ends in a torn record; ignoring it"
                );
            }
            return Ok(Self {
                path: path.to_path_buf(),
                file: Some(File::open(path)?),
                entries,
                dead_records,
                read_only,
            });
        }

        let file = OpenOptions::new().append(true).open(path)?;
        if torn {
            tracing::warn!(
                path = %path.display(),
                valid_len,
                "hash file ends in a torn record; truncating"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        let mut engine = Self {
            path: path.to_path_buf(),
            file: Some(file),
            entries,
            dead_records,
            read_only,
        };
        if engine.dead_records > COMPACTION_MIN_DEAD
            && engine.dead_records > engine.entries.len() as u64
        {
            engine.compact()?;
        }
        Ok(engine)
    }

    /// Records in the file that no longer contribute to the index.
    #[must_use]
    pub const fn dead_records(&self) -> u64 {
        self.dead_records
    }

    fn file(&mut self) -> Result<&mut File, EngineError> {
        self.file.as_mut().ok_or(EngineError::Closed)
    }

    fn ensure_writable(&self) -> Result<(), EngineError> {
        self.ensure_open()?;
        if self.read_only {
            Err(EngineError::ReadOnly(self.path.clone()))
        } else {
            Ok(())
        }
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.file.is_some() {
            Ok(())
        } else {
            Err(EngineError::Closed)
        }
    }

    fn append_record(&mut self, record: &[u8]) -> Result<(), EngineError> {
        self.ensure_writable()?;
        let bytes = frame::encode_frame(record);
        self.file()?.write_all(&bytes)?;
        Ok(())
    }

    /// Rewrite the file with only the live entries.
    pub fn compact(&mut self) -> Result<(), EngineError> {
        self.ensure_writable()?;
        let path = self.path.clone();
        frame::write_file_atomically::<EngineError, _>(&path, |out| {
            let frame_err = |e| EngineError::from_frame(&path, e);
            frame::write_frame(out, &header()).map_err(frame_err)?;
            for (key, value) in &self.entries {
                frame::write_frame(out, &put_record(key, value)).map_err(frame_err)?;
            }
            Ok(())
        })?;
        self.file = Some(OpenOptions::new().append(true).open(&self.path)?);

        tracing::debug!(
            path = %self.path.display(),
            dropped = self.dead_records,
            "compacted hash file"
        );
        self.dead_records = 0;
        Ok(())
    }
}

impl StorageEngine for HashEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Hash
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        self.ensure_open()?;
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.append_record(&put_record(key, value))?;
        if self.entries.insert(key.to_vec(), value.to_vec()).is_some() {
            self.dead_records += 1;
        }
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<bool, EngineError> {
        self.ensure_writable()?;
        if !self.entries.contains_key(key) {
            return Ok(false);
        }
        let mut record = PayloadWriter::new();
        record.put_u8(RECORD_DELETE).put_bytes(key);
        self.append_record(&record.finish())?;
        self.entries.remove(key);
        self.dead_records += 2;
        Ok(true)
    }

    fn has_key(&self, key: &[u8]) -> Result<bool, EngineError> {
        self.ensure_open()?;
        Ok(self.entries.contains_key(key))
    }

    fn keys(&self) -> Result<Vec<Vec<u8>>, EngineError> {
        self.ensure_open()?;
        Ok(self.entries.keys().cloned().collect())
    }

    /// Entries in no particular order. The prefix is matched byte for byte.
    fn each(&self, prefix: Option<&[u8]>) -> Result<EntryIter<'_>, EngineError> {
        self.ensure_open()?;
        let prefix = prefix.map(<[u8]>::to_vec);
        Ok(Box::new(
            self.entries
                .iter()
                .filter(move |(key, _)| prefix.as_deref().is_none_or(|p| key.starts_with(p)))
                .map(|(key, value)| (key.as_slice(), value.as_slice())),
        ))
    }

    fn len(&self) -> Result<usize, EngineError> {
        self.ensure_open()?;
        Ok(self.entries.len())
    }

    fn clear(&mut self) -> Result<(), EngineError> {
        self.ensure_writable()?;
        self.entries.clear();
        self.compact()
    }

    fn flush(&mut self) -> Result<(), EngineError> {
        let read_only = self.read_only;
        let file = self.file()?;
        if !read_only {
            file.sync_data()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        match self.file.take() {
            Some(file) if !self.read_only => Ok(file.sync_all()?),
            _ => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}

fn header() -> Vec<u8> {
    let mut header = PayloadWriter::new();
    header.put_raw(HASH_MAGIC).put_u32(HASH_VERSION);
    header.finish()
}

fn check_header(path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    let mut reader = PayloadReader::new(bytes);
    let frame_err = |e| EngineError::from_frame(path, e);
    if reader.get_raw(HASH_MAGIC.len(), "magic").map_err(frame_err)? != HASH_MAGIC {
        return Err(EngineError::corrupt(path, "not a hash file"));
    }
    let version = reader.get_u32("version").map_err(frame_err)?;
    if version != HASH_VERSION {
        return Err(EngineError::UnsupportedVersion {
            path: path.to_path_buf(),
            version,
        });
    }
    Ok(())
}

fn put_record(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut record = PayloadWriter::new();
    record.put_u8(RECORD_PUT).put_bytes(key).put_bytes(value);
    record.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_keys_are_case_sensitive() {
        let dir = tempdir().expect("create temp dir");
        let mut engine = HashEngine::create(&dir.path().join("h.hdb")).unwrap();

        engine.put(b"Key", b"1").unwrap();
        engine.put(b"key", b"2").unwrap();
        assert_eq!(engine.len().unwrap(), 2);
        assert_eq!(engine.get(b"KEY").unwrap(), None);
    }

    #[test]
    fn test_prefix_filter_is_exact() {
        let dir = tempdir().expect("create temp dir");
        let mut engine = HashEngine::create(&dir.path().join("h.hdb")).unwrap();
        for key in ["weather/london", "weather/paris", "Weather/oslo", "news"] {
            engine.put(key.as_bytes(), b"v").unwrap();
        }

        let mut keys: Vec<&[u8]> = engine
            .each(Some(b"weather/"))
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![&b"weather/london"[..], &b"weather/paris"[..]]);
    }

    #[test]
    fn test_reopen_replays_log() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("h.hdb");
        {
            let mut engine = HashEngine::create(&path).unwrap();
            engine.put(b"a", b"1").unwrap();
            engine.put(b"b", b"2").unwrap();
            engine.put(b"a", b"3").unwrap();
            engine.delete(b"b").unwrap();
            engine.close().unwrap();
        }

        let engine = HashEngine::open(&path).unwrap();
        assert_eq!(engine.get(b"a").unwrap(), Some(b"3".to_vec()));
        assert_eq!(engine.get(b"b").unwrap(), None);
        assert_eq!(engine.dead_records(), 3);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("h.hdb");
        {
            let mut engine = HashEngine::create(&path).unwrap();
            engine.put(b"a", b"1").unwrap();
            engine.put(b"b", b"2").unwrap();
            engine.close().unwrap();
        }
        let len = std::fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 2)
            .unwrap();

        let mut engine = HashEngine::open(&path).unwrap();
        assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(engine.get(b"b").unwrap(), None);

        // New records land after the intact prefix.
        engine.put(b"c", b"3").unwrap();
        engine.close().unwrap();
        let engine = HashEngine::open(&path).unwrap();
        assert_eq!(engine.len().unwrap(), 2);
    }

    #[test]
    fn test_corrupt_record_mid_file_fails_without_truncating() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("h.hdb");
        {
            let mut engine = HashEngine::create(&path).unwrap();
            for key in [b"a", b"b", b"c"] {
                engine.put(key, b"v").unwrap();
            }
            engine.close().unwrap();
        }

        // First record: length prefix, record type, key length, key.
        let key_at = frame::encode_frame(&header()).len() + 4 + 1 + 4;
        let mut bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes[key_at], b'a');
        bytes[key_at] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            HashEngine::open(&path),
            Err(EngineError::Corrupt { .. })
        ));
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn test_read_only_open_never_modifies_the_file() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("h.hdb");
        {
            let mut engine = HashEngine::create(&path).unwrap();
            for i in 0..200u32 {
                engine.put(b"counter", &i.to_le_bytes()).unwrap();
            }
            engine.put(b"tail", b"x").unwrap();
            engine.close().unwrap();
        }
        let len = std::fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 2)
            .unwrap();
        let before = std::fs::read(&path).unwrap();

        let mut engine = HashEngine::open_read_only(&path).unwrap();
        assert_eq!(engine.get(b"counter").unwrap(), Some(199u32.to_le_bytes().to_vec()));
        assert_eq!(engine.get(b"tail").unwrap(), None);
        assert!(matches!(
            engine.put(b"k", b"v"),
            Err(EngineError::ReadOnly(_))
        ));
        assert!(matches!(engine.clear(), Err(EngineError::ReadOnly(_))));
        engine.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_open_compacts_mostly_dead_file() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("h.hdb");
        {
            let mut engine = HashEngine::create(&path).unwrap();
            for i in 0..200u32 {
                engine.put(b"counter", &i.to_le_bytes()).unwrap();
            }
            engine.close().unwrap();
        }
        let before = std::fs::metadata(&path).unwrap().len();

        let engine = HashEngine::open(&path).unwrap();
        assert_eq!(engine.dead_records(), 0);
        assert_eq!(engine.get(b"counter").unwrap(), Some(199u32.to_le_bytes().to_vec()));
        assert!(std::fs::metadata(&path).unwrap().len() < before);
    }

    #[test]
    fn test_clear_truncates_file() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("h.hdb");
        let mut engine = HashEngine::create(&path).unwrap();
        let empty_len = std::fs::metadata(&path).unwrap().len();

        engine.put(b"a", b"1").unwrap();
        engine.clear().unwrap();
        assert!(engine.is_empty().unwrap());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), empty_len);

        engine.put(b"b", b"2").unwrap();
        engine.close().unwrap();
        assert_eq!(HashEngine::open(&path).unwrap().len().unwrap(), 1);
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("h.hdb");
        let mut header = PayloadWriter::new();
        header.put_raw(HASH_MAGIC).put_u32(7);
        std::fs::write(&path, frame::encode_frame(&header.finish())).unwrap();

        assert!(matches!(
            HashEngine::open(&path),
            Err(EngineError::UnsupportedVersion { version: 7, .. })
        ));
    }
}
