// Life of a registry:
// 1. Startup runs the migration pipeline once
//     - generation 0 hash file -> generation 1 tree file
//     - generation 1 tree file -> one legacy tree file per namespace
//     - legacy tree files -> current tree files
// 2. Each component asks the registry for the accessor of its namespace
// 3. The accessor opens its namespace file on first use
//     - tree files attach to the shared environment, which logs every write
//       and hands back committed work the file is missing
// 4. Maintenance checkpoints the environment and deletes redundant log segments
// 5. Shutdown closes every accessor, then the environment
//
// System components:
//  - Storage engines (hash, tree) behind one trait
//  - Shared transactional environment (log, recovery, checkpoints)
//  - Migration pipeline
//  - Accessor facade (codec, defaults, recovery callbacks)

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod accessor;
pub mod codec;
pub mod config;
pub mod error;
pub mod migration;
pub mod namespace_registry;
pub mod storage;

mod e2e_tests;
#[cfg(test)]
mod testing;

pub use accessor::{Accessor, KeyFilter, RecoveryFn};
pub use codec::{Codec, CodecError, JsonCodec, RawCodec, Value};
pub use config::{ConfigError, RegistryConfig};
pub use error::{RegistryError, Severity};
pub use migration::{MigrationError, MigrationPipeline, MigrationReport, StageReport};
pub use namespace_registry::{
    MaintenanceReport, NamespaceError, NamespaceRegistry, ShutdownReport,
};
