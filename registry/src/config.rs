//! Registry configuration module.
//!
//! This module loads the registry configuration from environment variables.
//!
//! # Environment Variables
//!
//! - `REGISTRY_ROOT_DIRECTORY`: Root storage directory (default: `./data`)
//! - `REGISTRY_ENGINE`: Engine for namespace files, `tree` or `hash` (default: `tree`)
//! - `REGISTRY_LOG_SEGMENT_SIZE`: Custom log segment size in bytes (optional)
//! - `REGISTRY_SYNC_ON_COMMIT`: Fsync the log on every commit (default: `true`)
//! - `REGISTRY_CHECKPOINT_WRITES`: Writes between table checkpoints
//!   (default: `1000`, `0` disables)
//!
//! # Layout
//!
//! ```text
//! <root>/env/                 environment home
//! <root>/registry/            one file per namespace
//! <root>/registry.db          generation 0 (single hash file)
//! <root>/registry_tree.db     generation 1 (single tree file)
//! ```

use std::path::PathBuf;

use crate::storage::checkpoint::{CheckpointConfig, DEFAULT_WRITES_THRESHOLD};
use crate::storage::{EngineKind, EnvironmentOptions};

/// Registry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Directory holding the environment home and every namespace file.
    pub root_directory: PathBuf,
    /// Engine used for namespace files (`Hash` or `Tree`).
    pub engine: EngineKind,
    /// Custom log segment size, dropped if the environment refuses it.
    pub log_segment_size: Option<u64>,
    /// Fsync the environment log on every commit.
    pub sync_on_commit: bool,
    /// Automatic table checkpoint thresholds.
    pub checkpoint: CheckpointConfig,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::with_root(Self::DEFAULT_ROOT_DIRECTORY)
    }
}

impl RegistryConfig {
    /// Default root directory.
    pub const DEFAULT_ROOT_DIRECTORY: &'static str = "./data";

    /// Default configuration rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root_directory: root.into(),
            engine: EngineKind::Tree,
            log_segment_size: None,
            sync_on_commit: true,
            checkpoint: CheckpointConfig::default(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let root_directory = match lookup("REGISTRY_ROOT_DIRECTORY") {
            Some(value) if value.is_empty() => {
                return Err(invalid("REGISTRY_ROOT_DIRECTORY", "must not be empty"));
            }
            Some(value) => PathBuf::from(value),
            None => PathBuf::from(Self::DEFAULT_ROOT_DIRECTORY),
        };

        let engine = match lookup("REGISTRY_ENGINE").as_deref() {
            None | Some("tree") => EngineKind::Tree,
            Some("hash") => EngineKind::Hash,
            Some(other) => {
                return Err(invalid(
                    "REGISTRY_ENGINE",
                    format!("'{other}' is not an engine (expected 'tree' or 'hash')"),
                ));
            }
        };

        let log_segment_size = lookup("REGISTRY_LOG_SEGMENT_SIZE")
            .map(|value| {
                value.parse::<u64>().map_err(|_| {
                    invalid(
                        "REGISTRY_LOG_SEGMENT_SIZE",
                        format!("'{value}' is not a size in bytes"),
                    )
                })
            })
            .transpose()?;

        let sync_on_commit = match lookup("REGISTRY_SYNC_ON_COMMIT").as_deref() {
            None | Some("true" | "1") => true,
            Some("false" | "0") => false,
            Some(other) => {
                return Err(invalid(
                    "REGISTRY_SYNC_ON_COMMIT",
                    format!("'{other}' is not a boolean"),
                ));
            }
        };

        let writes_threshold = match lookup("REGISTRY_CHECKPOINT_WRITES") {
            Some(value) => value.parse::<u64>().map_err(|_| {
                invalid(
                    "REGISTRY_CHECKPOINT_WRITES",
                    format!("'{value}' is not a write count"),
                )
            })?,
            None => DEFAULT_WRITES_THRESHOLD,
        };

        Ok(Self {
            root_directory,
            engine,
            log_segment_size,
            sync_on_commit,
            checkpoint: CheckpointConfig {
                writes_threshold,
                ..CheckpointConfig::default()
            },
        })
    }

    /// Home directory of the shared environment.
    #[must_use]
    pub fn environment_home(&self) -> PathBuf {
        self.root_directory.join("env")
    }

    /// Directory holding one file per namespace.
    #[must_use]
    pub fn registry_directory(&self) -> PathBuf {
        self.root_directory.join("registry")
    }

    /// Generation 0: the single hash file holding every namespace.
    #[must_use]
    pub fn legacy_hash_path(&self) -> PathBuf {
        self.root_directory.join("registry.db")
    }

    /// Generation 1: the single tree file holding every namespace.
    #[must_use]
    pub fn legacy_tree_path(&self) -> PathBuf {
        self.root_directory.join("registry_tree.db")
    }

    #[must_use]
    pub const fn environment_options(&self) -> EnvironmentOptions {
        EnvironmentOptions {
            log_segment_size: self.log_segment_size,
            sync_on_commit: self.sync_on_commit,
        }
    }
}

fn invalid(name: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message: message.into(),
    }
}
