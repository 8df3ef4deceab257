//! Storage layer of the registry.
//!
//! Every namespace is one file served by a [`StorageEngine`]:
//!
//! - [`HashEngine`]: unordered append-only file (`.hdb`).
//! - [`TreeEngine`]: case-insensitive ordered file (`.db` legacy layout,
//!   `.tdb` current layout) whose writes go through the shared
//!   [`Environment`] log.
//!
//! # Usage
//!
//! ```ignore
//! use registry::storage::{Engine, EngineKind, Environment, EnvironmentOptions};
//!
//! let env = Environment::open_or_create(home, EnvironmentOptions::default())?;
//! let mut engine = Engine::open_or_create(
//!     EngineKind::Tree,
//!     path,
//!     Some(&env),
//!     CheckpointConfig::default(),
//! )?;
//!
//! engine.put(b"london", b"{\"temp\":15}")?;
//! engine.close()?;
//! env.close()?;
//! ```

pub mod checkpoint;
pub mod comparator;
pub mod engine;
pub mod environment;
pub mod frame;
pub mod hash;
pub mod recovery;
pub mod tree;
pub mod wal;

pub use checkpoint::CheckpointConfig;
pub use engine::{Engine, EngineError, EngineKind, EntryIter, StorageEngine};
pub use environment::{
    CloseOutcome, Environment, EnvironmentError, EnvironmentOptions, EnvironmentStats,
    Transaction,
};
pub use hash::HashEngine;
pub use tree::{TreeEngine, TreeFormat};
pub use wal::Lsn;
