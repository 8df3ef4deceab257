//! Transaction log of the shared environment.
//!
//! The log is a sequence of segment files in the environment home, named
//! after the first LSN they hold (`log.00000000000000000001`). Each segment
//! starts with a header frame followed by one frame per log record.
//!
//! # Log Record Format
//!
//! ```text
//! +----------+--------------------------------------------------+
//! | 0        | record_type (1 byte)                             |
//! | 1-8      | lsn (8 bytes) - Log Sequence Number              |
//! | 9-16     | transaction_id (8 bytes)                         |
//! | 17-N     | payload (variable, depends on type)              |
//! +----------+--------------------------------------------------+
//! ```
//!
//! Table operations carry the table file id followed by length-prefixed key
//! and value bytes. Records are appended to the newest segment; once it
//! grows past the configured segment size the writer rolls to a new one.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::storage::frame::{self, FrameError, PayloadReader, PayloadWriter};

/// Log Sequence Number - monotonically increasing identifier for log records.
pub type Lsn = u64;

/// Transaction identifier.
pub type TxnId = u64;

/// Segment file name prefix.
pub const SEGMENT_PREFIX: &str = "log.";

const SEGMENT_MAGIC: &[u8; 6] = b"RGLOG\0";
const SEGMENT_VERSION: u32 = 1;

/// Log record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// Replace the value list of a key with a single value.
    Put = 0x01,
    /// Append a duplicate value to a key.
    Append = 0x02,
    /// Remove a key and all of its values.
    Delete = 0x03,
    /// Remove every key of a table.
    Clear = 0x04,
    /// Transaction commit marker.
    Commit = 0x05,
    /// Transaction abort marker.
    Abort = 0x06,
    /// Checkpoint marker.
    Checkpoint = 0x07,
}

impl TryFrom<u8> for LogRecordType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Put),
            0x02 => Ok(Self::Append),
            0x03 => Ok(Self::Delete),
            0x04 => Ok(Self::Clear),
            0x05 => Ok(Self::Commit),
            0x06 => Ok(Self::Abort),
            0x07 => Ok(Self::Checkpoint),
            _ => Err(value),
        }
    }
}

/// A mutation of one table, as replayed during recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Append { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
    Clear,
}

impl TableOp {
    /// Approximate number of bytes this operation adds to the log.
    #[must_use]
    pub fn logged_size(&self) -> u64 {
        let size = match self {
            Self::Put { key, value } | Self::Append { key, value } => key.len() + value.len(),
            Self::Delete { key } => key.len(),
            Self::Clear => 0,
        };
        size as u64
    }
}

/// Payload of a log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecordPayload {
    /// An operation on the table identified by `file`.
    Table { file: String, op: TableOp },
    /// Commit transaction - no additional data.
    Commit,
    /// Abort transaction - no additional data.
    Abort,
    /// Checkpoint marker.
    Checkpoint {
        /// Every table is durable up to this LSN.
        checkpoint_lsn: Lsn,
    },
}

impl LogRecordPayload {
    #[must_use]
    pub const fn record_type(&self) -> LogRecordType {
        match self {
            Self::Table { op, .. } => match op {
                TableOp::Put { .. } => LogRecordType::Put,
                TableOp::Append { .. } => LogRecordType::Append,
                TableOp::Delete { .. } => LogRecordType::Delete,
                TableOp::Clear => LogRecordType::Clear,
            },
            Self::Commit => LogRecordType::Commit,
            Self::Abort => LogRecordType::Abort,
            Self::Checkpoint { .. } => LogRecordType::Checkpoint,
        }
    }
}

/// A complete log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Log Sequence Number (position in the log).
    pub lsn: Lsn,
    /// Transaction ID that wrote this record (0 for system records).
    pub txn_id: TxnId,
    /// The record payload.
    pub payload: LogRecordPayload,
}

impl LogRecord {
    #[must_use]
    pub const fn new(lsn: Lsn, txn_id: TxnId, payload: LogRecordPayload) -> Self {
        Self {
            lsn,
            txn_id,
            payload,
        }
    }

    /// Serialize this record into a frame payload.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = PayloadWriter::new();
        writer
            .put_u8(self.payload.record_type() as u8)
            .put_u64(self.lsn)
            .put_u64(self.txn_id);

        match &self.payload {
            LogRecordPayload::Table { file, op } => {
                writer.put_bytes(file.as_bytes());
                match op {
                    TableOp::Put { key, value } | TableOp::Append { key, value } => {
                        writer.put_bytes(key).put_bytes(value);
                    }
                    TableOp::Delete { key } => {
                        writer.put_bytes(key);
                    }
                    TableOp::Clear => {}
                }
            }
            LogRecordPayload::Commit | LogRecordPayload::Abort => {}
            LogRecordPayload::Checkpoint { checkpoint_lsn } => {
                writer.put_u64(*checkpoint_lsn);
            }
        }

        writer.finish()
    }

    /// Deserialize a record from a frame payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalError> {
        let mut reader = PayloadReader::new(bytes);
        let record_type = LogRecordType::try_from(reader.get_u8("record type")?)
            .map_err(WalError::InvalidRecordType)?;
        let lsn = reader.get_u64("lsn")?;
        let txn_id = reader.get_u64("transaction id")?;

        let payload = match record_type {
            LogRecordType::Commit => LogRecordPayload::Commit,
            LogRecordType::Abort => LogRecordPayload::Abort,
            LogRecordType::Checkpoint => LogRecordPayload::Checkpoint {
                checkpoint_lsn: reader.get_u64("checkpoint lsn")?,
            },
            LogRecordType::Put
            | LogRecordType::Append
            | LogRecordType::Delete
            | LogRecordType::Clear => {
                let file = String::from_utf8(reader.get_bytes("file id")?.to_vec())
                    .map_err(|_| WalError::CorruptRecord("file id is not UTF-8"))?;
                let op = match record_type {
                    LogRecordType::Put => TableOp::Put {
                        key: reader.get_bytes("key")?.to_vec(),
                        value: reader.get_bytes("value")?.to_vec(),
                    },
                    LogRecordType::Append => TableOp::Append {
                        key: reader.get_bytes("key")?.to_vec(),
                        value: reader.get_bytes("value")?.to_vec(),
                    },
                    LogRecordType::Delete => TableOp::Delete {
                        key: reader.get_bytes("key")?.to_vec(),
                    },
                    _ => TableOp::Clear,
                };
                LogRecordPayload::Table { file, op }
            }
        };

        reader.finish("trailing bytes after log record")?;
        Ok(Self {
            lsn,
            txn_id,
            payload,
        })
    }
}

/// A log segment file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSegment {
    pub path: PathBuf,
    /// LSN of the first record the segment may hold.
    pub first_lsn: Lsn,
}

impl LogSegment {
    #[must_use]
    pub fn file_name(first_lsn: Lsn) -> String {
        format!("{SEGMENT_PREFIX}{first_lsn:020}")
    }
}

/// List the log segments in `home`, sorted by first LSN.
pub fn list_segments(home: &Path) -> Result<Vec<LogSegment>, WalError> {
    let mut segments = Vec::new();
    for entry in std::fs::read_dir(home)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(first_lsn) = name
            .strip_prefix(SEGMENT_PREFIX)
            .and_then(|digits| digits.parse::<Lsn>().ok())
        else {
            continue;
        };
        segments.push(LogSegment {
            path: entry.path(),
            first_lsn,
        });
    }
    segments.sort_by_key(|segment| segment.first_lsn);
    Ok(segments)
}

/// Records read from one segment.
#[derive(Debug, Default)]
pub struct SegmentScan {
    pub records: Vec<LogRecord>,
    /// Whether the scan stopped at a torn or corrupt frame.
    pub torn: bool,
    /// Length of the intact prefix of the segment, in bytes.
    pub valid_len: u64,
}

/// Read every intact record of a segment.
///
/// A torn frame ends the scan: it is what a crash in the middle of an append
/// leaves behind, and nothing after it can be trusted.
pub fn read_segment(segment: &LogSegment) -> Result<SegmentScan, WalError> {
    let mut reader = BufReader::new(File::open(&segment.path)?);

    let mut scan = SegmentScan::default();
    match frame::read_frame(&mut reader) {
        Ok(Some(header)) => {
            check_segment_header(&header)?;
            scan.valid_len = (header.len() + frame::FRAME_OVERHEAD) as u64;
        }
        // A segment whose header never made it to disk holds nothing.
        Ok(None) => return Ok(scan),
        Err(e) if e.is_torn() => {
            scan.torn = true;
            return Ok(scan);
        }
        Err(e) => return Err(e.into()),
    }

    loop {
        match frame::read_frame(&mut reader) {
            Ok(Some(bytes)) => match LogRecord::from_bytes(&bytes) {
                Ok(record) => {
                    scan.valid_len += (bytes.len() + frame::FRAME_OVERHEAD) as u64;
                    scan.records.push(record);
                }
                Err(e) => {
                    tracing::warn!(
                        segment = %segment.path.display(),
                        "undecodable log record, treating as end of log: {e}"
                    );
                    scan.torn = true;
                    break;
                }
            },
            Ok(None) => break,
            Err(e) if e.is_torn() => {
                scan.torn = true;
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(scan)
}

fn segment_header() -> Vec<u8> {
    let mut writer = PayloadWriter::new();
    writer.put_raw(SEGMENT_MAGIC).put_u32(SEGMENT_VERSION);
    writer.finish()
}

fn check_segment_header(bytes: &[u8]) -> Result<(), WalError> {
    let mut reader = PayloadReader::new(bytes);
    if reader.get_raw(SEGMENT_MAGIC.len(), "segment magic")? != SEGMENT_MAGIC {
        return Err(WalError::CorruptRecord("bad segment magic"));
    }
    let version = reader.get_u32("segment version")?;
    if version != SEGMENT_VERSION {
        return Err(WalError::UnsupportedSegmentVersion(version));
    }
    Ok(())
}

/// Appends records to the newest log segment.
#[derive(Debug)]
pub struct LogWriter {
    home: PathBuf,
    segment_size: u64,
    segment: LogSegment,
    out: BufWriter<File>,
    segment_bytes: u64,
    next_lsn: Lsn,
}

impl LogWriter {
    /// Start a fresh segment whose first record will get `next_lsn`.
    pub fn create(home: &Path, next_lsn: Lsn, segment_size: u64) -> Result<Self, WalError> {
        let segment = LogSegment {
            path: home.join(LogSegment::file_name(next_lsn)),
            first_lsn: next_lsn,
        };
        // A leftover segment with the same name can only hold a torn header
        // or records that recovery already rejected.
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&segment.path)?;
        let mut out = BufWriter::new(file);
        let segment_bytes = frame::write_frame(&mut out, &segment_header())? as u64;
        out.flush()?;
        out.get_ref().sync_all()?;

        Ok(Self {
            home: home.to_path_buf(),
            segment_size,
            segment,
            out,
            segment_bytes,
            next_lsn,
        })
    }

    /// The segment currently being written.
    #[must_use]
    pub const fn segment(&self) -> &LogSegment {
        &self.segment
    }

    #[must_use]
    pub const fn next_lsn(&self) -> Lsn {
        self.next_lsn
    }

    /// Last assigned LSN (0 if none assigned yet).
    #[must_use]
    pub const fn last_lsn(&self) -> Lsn {
        self.next_lsn.saturating_sub(1)
    }

    /// Append a record, returning its LSN and the number of bytes written.
    pub fn append(
        &mut self,
        txn_id: TxnId,
        payload: LogRecordPayload,
    ) -> Result<(Lsn, u64), WalError> {
        if self.segment_bytes >= self.segment_size && self.next_lsn > self.segment.first_lsn {
            self.roll()?;
        }

        let lsn = self.next_lsn;
        let record = LogRecord::new(lsn, txn_id, payload);
        let written = frame::write_frame(&mut self.out, &record.to_bytes())? as u64;
        self.segment_bytes += written;
        self.next_lsn += 1;
        Ok((lsn, written))
    }

    /// Push buffered records to the operating system.
    pub fn flush(&mut self) -> Result<(), WalError> {
        self.out.flush()?;
        Ok(())
    }

    /// Flush and fsync the current segment.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.out.flush()?;
        self.out.get_ref().sync_data()?;
        Ok(())
    }

    fn roll(&mut self) -> Result<(), WalError> {
        self.sync()?;
        let next = Self::create(&self.home, self.next_lsn, self.segment_size)?;
        tracing::debug!(
            segment = %next.segment.path.display(),
            "rolled to a new log segment"
        );
        *self = next;
        Ok(())
    }
}

/// Errors that can occur during log operations.
#[derive(Debug)]
pub enum WalError {
    /// I/O error.
    Io(std::io::Error),
    /// Frame error.
    Frame(FrameError),
    /// Corrupt log record.
    CorruptRecord(&'static str),
    /// Invalid record type byte.
    InvalidRecordType(u8),
    /// Segment written by an unknown log version.
    UnsupportedSegmentVersion(u32),
}

impl std::fmt::Display for WalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "log I/O error: {e}"),
            Self::Frame(e) => write!(f, "log frame error: {e}"),
            Self::CorruptRecord(what) => write!(f, "corrupt log record: {what}"),
            Self::InvalidRecordType(t) => write!(f, "invalid log record type: 0x{t:02x}"),
            Self::UnsupportedSegmentVersion(v) => {
                write!(f, "unsupported log segment version {v}")
            }
        }
    }
}

impl std::error::Error for WalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Frame(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for WalError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<FrameError> for WalError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(e) => Self::Io(e),
            other => Self::Frame(other),
        }
    }
}
