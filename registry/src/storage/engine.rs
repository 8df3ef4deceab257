//! Storage engine abstraction.
//!
//! A namespace file is served by one of two engines:
//!
//! - [`HashEngine`]: unordered, self-contained append log.
//! - [`TreeEngine`]: ordered under the case-insensitive comparator, with
//!   duplicate values per key, writing through the shared [`Environment`].
//!
//! Callers pick an [`EngineKind`] and go through the [`StorageEngine`] trait;
//! [`Engine`] is the tagged variant that dispatches to the concrete engine.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::storage::checkpoint::CheckpointConfig;
use crate::storage::environment::{Environment, EnvironmentError};
use crate::storage::frame::FrameError;
use crate::storage::hash::HashEngine;
use crate::storage::tree::{TreeEngine, TreeFormat};

/// Borrowed entries produced by [`StorageEngine::each`].
pub type EntryIter<'a> = Box<dyn Iterator<Item = (&'a [u8], &'a [u8])> + 'a>;

/// The engines a namespace file can be stored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Unordered hash file.
    Hash,
    /// Ordered tree file in the pre-swap layout (one record per value).
    LegacyTree,
    /// Ordered tree file in the current layout (one record per key).
    Tree,
}

impl EngineKind {
    /// File extension of namespace files stored with this engine.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Hash => "hdb",
            Self::LegacyTree => "db",
            Self::Tree => "tdb",
        }
    }

    /// Whether `keys()` and `each()` come out in comparator order.
    #[must_use]
    pub const fn is_ordered(self) -> bool {
        !matches!(self, Self::Hash)
    }

    #[must_use]
    pub const fn needs_environment(self) -> bool {
        self.is_ordered()
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::LegacyTree => "legacy-tree",
            Self::Tree => "tree",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operations every storage engine supports.
///
/// `each` borrows the engine, so a traversal always sees a single state.
pub trait StorageEngine {
    fn kind(&self) -> EngineKind;

    fn path(&self) -> &Path;

    /// The value stored under `key`. For keys with several values, the first.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError>;

    /// Store `value` under `key`, replacing whatever was there.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), EngineError>;

    /// Remove `key`. Returns whether it was present.
    fn delete(&mut self, key: &[u8]) -> Result<bool, EngineError>;

    fn has_key(&self, key: &[u8]) -> Result<bool, EngineError> {
        Ok(self.get(key)?.is_some())
    }

    /// Linear scan over every stored value.
    fn has_value(&self, value: &[u8]) -> Result<bool, EngineError> {
        Ok(self.each(None)?.any(|(_, v)| v == value))
    }

    fn has_pair(&self, key: &[u8], value: &[u8]) -> Result<bool, EngineError> {
        Ok(self.get(key)?.is_some_and(|v| v == value))
    }

    fn keys(&self) -> Result<Vec<Vec<u8>>, EngineError>;

    /// Entries whose key starts with `prefix` (all entries for `None`).
    fn each(&self, prefix: Option<&[u8]>) -> Result<EntryIter<'_>, EngineError>;

    /// Number of distinct keys.
    fn len(&self) -> Result<usize, EngineError>;

    fn is_empty(&self) -> Result<bool, EngineError> {
        Ok(self.len()? == 0)
    }

    /// Remove every entry, keeping the file.
    fn clear(&mut self) -> Result<(), EngineError>;

    /// Make every completed write durable in the engine's file.
    fn flush(&mut self) -> Result<(), EngineError>;

    /// Flush and release the file. Closing twice is a no-op.
    fn close(&mut self) -> Result<(), EngineError>;

    fn is_closed(&self) -> bool;
}

/// A storage engine of any kind.
#[derive(Debug)]
pub enum Engine {
    Hash(HashEngine),
    Tree(TreeEngine),
}

macro_rules! dispatch {
    ($self:expr, $engine:ident => $body:expr) => {
        match $self {
            Engine::Hash($engine) => $body,
            Engine::Tree($engine) => $body,
        }
    };
}

impl Engine {
    /// Create a new engine file. Fails if `path` already exists.
    pub fn create(
        kind: EngineKind,
        path: &Path,
        env: Option<&Arc<Environment>>,
        checkpoint: CheckpointConfig,
    ) -> Result<Self, EngineError> {
        match kind {
            EngineKind::Hash => Ok(Self::Hash(HashEngine::create(path)?)),
            EngineKind::LegacyTree | EngineKind::Tree => {
                let env = env.ok_or(EngineError::EnvironmentRequired)?;
                let format = if kind == EngineKind::Tree {
                    TreeFormat::Current
                } else {
                    TreeFormat::Legacy
                };
                Ok(Self::Tree(TreeEngine::create(
                    path,
                    format,
                    Arc::clone(env),
                    checkpoint,
                )?))
            }
        }
    }

    /// Open an existing engine file. Fails if `path` does not exist.
    ///
    /// Tree files are opened in whichever layout they were written with.
    pub fn open(
        kind: EngineKind,
        path: &Path,
        env: Option<&Arc<Environment>>,
        checkpoint: CheckpointConfig,
    ) -> Result<Self, EngineError> {
        match kind {
            EngineKind::Hash => Ok(Self::Hash(HashEngine::open(path)?)),
            EngineKind::LegacyTree | EngineKind::Tree => {
                let env = env.ok_or(EngineError::EnvironmentRequired)?;
                Ok(Self::Tree(TreeEngine::open(
                    path,
                    Arc::clone(env),
                    checkpoint,
                )?))
            }
        }
    }

    pub fn open_or_create(
        kind: EngineKind,
        path: &Path,
        env: Option<&Arc<Environment>>,
        checkpoint: CheckpointConfig,
    ) -> Result<Self, EngineError> {
        if path.exists() {
            Self::open(kind, path, env, checkpoint)
        } else {
            Self::create(kind, path, env, checkpoint)
        }
    }

    #[must_use]
    pub const fn as_tree(&self) -> Option<&TreeEngine> {
        match self {
            Self::Tree(tree) => Some(tree),
            Self::Hash(_) => None,
        }
    }

    pub const fn as_tree_mut(&mut self) -> Option<&mut TreeEngine> {
        match self {
            Self::Tree(tree) => Some(tree),
            Self::Hash(_) => None,
        }
    }
}

impl StorageEngine for Engine {
    fn kind(&self) -> EngineKind {
        dispatch!(self, e => e.kind())
    }

    fn path(&self) -> &Path {
        dispatch!(self, e => e.path())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        dispatch!(self, e => e.get(key))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        dispatch!(self, e => e.put(key, value))
    }

    fn delete(&mut self, key: &[u8]) -> Result<bool, EngineError> {
        dispatch!(self, e => e.delete(key))
    }

    fn has_key(&self, key: &[u8]) -> Result<bool, EngineError> {
        dispatch!(self, e => e.has_key(key))
    }

    fn has_value(&self, value: &[u8]) -> Result<bool, EngineError> {
        dispatch!(self, e => e.has_value(value))
    }

    fn has_pair(&self, key: &[u8], value: &[u8]) -> Result<bool, EngineError> {
        dispatch!(self, e => e.has_pair(key, value))
    }

    fn keys(&self) -> Result<Vec<Vec<u8>>, EngineError> {
        dispatch!(self, e => e.keys())
    }

    fn each(&self, prefix: Option<&[u8]>) -> Result<EntryIter<'_>, EngineError> {
        dispatch!(self, e => e.each(prefix))
    }

    fn len(&self) -> Result<usize, EngineError> {
        dispatch!(self, e => e.len())
    }

    fn clear(&mut self) -> Result<(), EngineError> {
        dispatch!(self, e => e.clear())
    }

    fn flush(&mut self) -> Result<(), EngineError> {
        dispatch!(self, e => e.flush())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        dispatch!(self, e => e.close())
    }

    fn is_closed(&self) -> bool {
        dispatch!(self, e => e.is_closed())
    }
}

/// Errors that can occur in a storage engine.
#[derive(Debug)]
pub enum EngineError {
    /// I/O error.
    Io(std::io::Error),
    /// `create` found a file already present.
    AlreadyExists(PathBuf),
    /// `open` found no file.
    NotFound(PathBuf),
    /// The file cannot be decoded.
    Corrupt { path: PathBuf, reason: String },
    /// The file was written by an unknown format version.
    UnsupportedVersion { path: PathBuf, version: u32 },
    /// The file was opened read-only.
    ReadOnly(PathBuf),
    /// The engine has been closed.
    Closed,
    /// A tree engine was requested without an environment.
    EnvironmentRequired,
    /// Environment error.
    Environment(EnvironmentError),
}

impl EngineError {
    pub(crate) fn corrupt(path: &Path, reason: impl fmt::Display) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Map a frame error while reading `path`.
    pub(crate) fn from_frame(path: &Path, e: FrameError) -> Self {
        match e {
            FrameError::Io(e) => Self::Io(e),
            other => Self::corrupt(path, other),
        }
    }

    /// Whether this error must abort startup rather than degrade.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::AlreadyExists(_)
            | Self::Corrupt { .. }
            | Self::UnsupportedVersion { .. }
            | Self::EnvironmentRequired => true,
            Self::Environment(e) => e.is_fatal(),
            Self::Io(_) | Self::NotFound(_) | Self::ReadOnly(_) | Self::Closed => false,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "engine I/O error: {e}"),
            Self::AlreadyExists(path) => write!(f, "{} already exists", path.display()),
            Self::NotFound(path) => write!(f, "{} not found", path.display()),
            Self::Corrupt { path, reason } => {
                write!(f, "{} is corrupt: {reason}", path.display())
            }
            Self::UnsupportedVersion { path, version } => write!(
                f,
                "{} has unsupported format version {version}",
                path.display()
            ),
            Self::ReadOnly(path) => write!(f, "{} is open read-only", path.display()),
            Self::Closed => write!(f, "engine is closed"),
            Self::EnvironmentRequired => write!(f, "tree engines need an environment"),
            Self::Environment(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Environment(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<EnvironmentError> for EngineError {
    fn from(e: EnvironmentError) -> Self {
        Self::Environment(e)
    }
}
