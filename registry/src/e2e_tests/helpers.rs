//! Common helpers for end-to-end tests.

use std::path::{Path, PathBuf};

use crate::accessor::Accessor;
use crate::namespace_registry::NamespaceRegistry;
use crate::storage::{CheckpointConfig, Engine, StorageEngine};

pub use crate::testing::{TestRoot, write_generation0, write_generation1};

/// Store raw bytes under `key`, bypassing the accessor's codec. Creates the
/// namespace file if needed.
///
/// The accessor is closed first so the file is never open twice; its next
/// call reopens it.
pub fn put_raw(registry: &NamespaceRegistry, accessor: &Accessor, key: &str, bytes: &[u8]) {
    accessor.close().expect("close accessor");
    if let Some(parent) = accessor.path().parent() {
        std::fs::create_dir_all(parent).expect("create namespace directory");
    }
    let env = registry.environment().expect("open environment");
    let mut engine = Engine::open_or_create(
        accessor.kind(),
        accessor.path(),
        Some(&env),
        CheckpointConfig::default(),
    )
    .expect("open namespace file");
    engine.put(key.as_bytes(), bytes).expect("put raw bytes");
    engine.close().expect("close namespace file");
}

/// The raw bytes stored under `key`.
pub fn get_raw(registry: &NamespaceRegistry, accessor: &Accessor, key: &str) -> Option<Vec<u8>> {
    accessor.close().expect("close accessor");
    let env = registry.environment().expect("open environment");
    let engine = Engine::open(
        accessor.kind(),
        accessor.path(),
        Some(&env),
        CheckpointConfig::default(),
    )
    .expect("open namespace file");
    engine.get(key.as_bytes()).expect("get raw bytes")
}

/// Every file under `dir`, relative to it, sorted.
pub fn list_files(dir: &Path) -> Vec<PathBuf> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
        for entry in std::fs::read_dir(dir).expect("read directory") {
            let path = entry.expect("directory entry").path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                out.push(path.strip_prefix(root).expect("path under root").to_path_buf());
            }
        }
    }

    let mut files = Vec::new();
    if dir.is_dir() {
        walk(dir, dir, &mut files);
    }
    files.sort();
    files
}
