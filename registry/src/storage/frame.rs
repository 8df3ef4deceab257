//! Checksummed framing shared by every on-disk format.
//!
//! Each frame has the following layout:
//! ```text
//! +----------+--------------------------------------------------+
//! | 0-3      | payload_length (4 bytes, little endian)          |
//! | 4-N      | payload (variable)                               |
//! | N-N+3    | CRC32 of length + payload (4 bytes)              |
//! +----------+--------------------------------------------------+
//! ```
//!
//! A frame that ends early or fails its checksum is "torn". Readers decide
//! whether a torn frame means the end of a log (crash mid-append) or real
//! corruption (a file that is only ever replaced atomically).

// payload lengths are bounded by MAX_PAYLOAD_LEN, which fits in u32
#![allow(clippy::cast_possible_truncation)]

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Length prefix + checksum.
pub const FRAME_OVERHEAD: usize = 8;

/// Largest payload accepted by the reader. Anything bigger is treated as a
/// corrupt length prefix rather than an allocation request.
pub const MAX_PAYLOAD_LEN: usize = 256 * 1024 * 1024;

/// Encode a payload into a complete frame.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(payload);
    let checksum = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&checksum.to_le_bytes());
    bytes
}

/// Write one frame, returning the number of bytes written.
pub fn write_frame<W: Write>(out: &mut W, payload: &[u8]) -> Result<usize, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::TooLarge(payload.len() as u64));
    }
    let bytes = encode_frame(payload);
    out.write_all(&bytes)?;
    Ok(bytes.len())
}

/// Read the next frame.
///
/// Returns `Ok(None)` on a clean end of input (no bytes left before the
/// length prefix).
pub fn read_frame<R: Read>(input: &mut R) -> Result<Option<Vec<u8>>, FrameError> {
    let mut len_bytes = [0u8; 4];
    let filled = read_fully(input, &mut len_bytes)?;
    if filled == 0 {
        return Ok(None);
    }
    if filled < len_bytes.len() {
        return Err(FrameError::Truncated);
    }

    let payload_len = u32::from_le_bytes(len_bytes) as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(FrameError::TooLarge(payload_len as u64));
    }

    let mut rest = vec![0u8; payload_len + 4];
    if read_fully(input, &mut rest)? < rest.len() {
        return Err(FrameError::Truncated);
    }

    let (payload, checksum_bytes) = rest.split_at(payload_len);
    let stored = u32::from_le_bytes([
        checksum_bytes[0],
        checksum_bytes[1],
        checksum_bytes[2],
        checksum_bytes[3],
    ]);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&len_bytes);
    hasher.update(payload);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(FrameError::ChecksumMismatch {
            expected: stored,
            actual: computed,
        });
    }

    rest.truncate(payload_len);
    Ok(Some(rest))
}

/// Replace `path` with the output of `write`.
///
/// The new content goes to a sibling temp file which is fsynced and renamed
/// over `path`, so readers see either the old or the new file, never a mix.
pub fn write_file_atomically<E, F>(path: &Path, write: F) -> Result<(), E>
where
    E: From<io::Error>,
    F: FnOnce(&mut BufWriter<File>) -> Result<(), E>,
{
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut out = BufWriter::new(File::create(&tmp_path)?);
    write(&mut out)?;
    out.flush()?;
    out.get_ref().sync_all()?;
    drop(out);
    std::fs::rename(&tmp_path, path)?;

    // Persist the rename itself. Not every platform can open a directory.
    if let Some(dir) = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .and_then(|p| File::open(p).ok())
    {
        if let Err(e) = dir.sync_all() {
            tracing::warn!(path = %path.display(), "failed to sync directory after rename: {e}");
        }
    }
    Ok(())
}

/// Read until `buf` is full or the input is exhausted.
fn read_fully<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Builder for frame payloads.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    bytes: Vec<u8>,
}

impl PayloadWriter {
    #[must_use]
    pub const fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Raw bytes with no length prefix (magic numbers).
    pub fn put_raw(&mut self, value: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(value);
        self
    }

    /// Length-prefixed byte string.
    pub fn put_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.put_u32(value.len() as u32);
        self.bytes.extend_from_slice(value);
        self
    }

    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Cursor over a frame payload.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], FrameError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(FrameError::Malformed(what))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn get_u8(&mut self, what: &'static str) -> Result<u8, FrameError> {
        Ok(self.take(1, what)?[0])
    }

    pub fn get_u32(&mut self, what: &'static str) -> Result<u32, FrameError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self, what: &'static str) -> Result<u64, FrameError> {
        let b = self.take(8, what)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn get_raw(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], FrameError> {
        self.take(len, what)
    }

    pub fn get_bytes(&mut self, what: &'static str) -> Result<&'a [u8], FrameError> {
        let len = self.get_u32(what)? as usize;
        self.take(len, what)
    }

    /// Fails if any bytes are left over.
    pub const fn finish(&self, what: &'static str) -> Result<(), FrameError> {
        if self.pos == self.bytes.len() {
            Ok(())
        } else {
            Err(FrameError::Malformed(what))
        }
    }
}

/// Errors that can occur while reading or writing frames.
#[derive(Debug)]
pub enum FrameError {
    /// I/O error.
    Io(io::Error),
    /// The frame ended before its declared length.
    Truncated,
    /// The length prefix exceeds `MAX_PAYLOAD_LEN`.
    TooLarge(u64),
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// The payload does not decode as the expected structure.
    Malformed(&'static str),
}

impl FrameError {
    /// Whether this error means the frame was only partially written.
    #[must_use]
    pub const fn is_torn(&self) -> bool {
        matches!(
            self,
            Self::Truncated | Self::TooLarge(_) | Self::ChecksumMismatch { .. }
        )
    }
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "frame I/O error: {e}"),
            Self::Truncated => write!(f, "truncated frame"),
            Self::TooLarge(len) => write!(f, "frame length {len} exceeds maximum"),
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "frame checksum mismatch: expected 0x{expected:08x}, got 0x{actual:08x}"
            ),
            Self::Malformed(what) => write!(f, "malformed frame payload: {what}"),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").unwrap();
        write_frame(&mut buf, b"").unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(read_frame(&mut cursor).unwrap(), Some(Vec::new()));
        assert_eq!(read_frame(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_truncated_frame_is_torn() {
        let mut bytes = encode_frame(b"some payload");
        bytes.truncate(bytes.len() - 3);

        let err = read_frame(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, FrameError::Truncated));
        assert!(err.is_torn());
    }

    #[test]
    fn test_partial_length_prefix_is_torn() {
        let err = read_frame(&mut Cursor::new(vec![1u8, 0])).unwrap_err();
        assert!(matches!(err, FrameError::Truncated));
    }

    #[test]
    fn test_checksum_validation() {
        let mut bytes = encode_frame(b"payload");
        bytes[5] ^= 0xFF;

        let err = read_frame(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, FrameError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_corrupt_length_is_rejected_without_allocating() {
        let mut bytes = encode_frame(b"payload");
        bytes[..4].copy_from_slice(&u32::MAX.to_le_bytes());

        let err = read_frame(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, FrameError::TooLarge(_)));
    }

    #[test]
    fn test_payload_reader_and_writer() {
        let mut writer = PayloadWriter::new();
        writer
            .put_raw(b"MAGIC")
            .put_u8(7)
            .put_u32(42)
            .put_u64(u64::MAX)
            .put_bytes(b"key");
        let payload = writer.finish();

        let mut reader = PayloadReader::new(&payload);
        assert_eq!(reader.get_raw(5, "magic").unwrap(), b"MAGIC");
        assert_eq!(reader.get_u8("tag").unwrap(), 7);
        assert_eq!(reader.get_u32("count").unwrap(), 42);
        assert_eq!(reader.get_u64("lsn").unwrap(), u64::MAX);
        assert_eq!(reader.get_bytes("key").unwrap(), b"key");
        assert!(reader.finish("trailing").is_ok());
    }

    #[test]
    fn test_write_file_atomically_replaces_content() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("snapshot");
        std::fs::write(&path, b"old").unwrap();

        write_file_atomically::<FrameError, _>(&path, |out| {
            write_frame(out, b"new")?;
            Ok(())
        })
        .unwrap();

        let mut file = File::open(&path).unwrap();
        assert_eq!(read_frame(&mut file).unwrap(), Some(b"new".to_vec()));
        assert!(!dir.path().join("snapshot.tmp").exists());
    }

    #[test]
    fn test_payload_reader_rejects_short_input() {
        let mut reader = PayloadReader::new(&[1, 0, 0, 0]);
        // declares a 1-byte string but has no bytes left
        assert!(matches!(
            reader.get_bytes("key"),
            Err(FrameError::Malformed("key"))
        ));
    }
}
