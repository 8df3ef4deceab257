//! Fixtures shared by unit and end-to-end tests.

#![allow(clippy::expect_used)]

use std::path::Path;
use std::sync::{Arc, OnceLock};

use tempfile::TempDir;

use crate::config::RegistryConfig;
use crate::namespace_registry::{NamespaceRegistry, namespace_path};
use crate::storage::{
    EngineKind, Environment, HashEngine, StorageEngine, TreeEngine, TreeFormat,
};

/// A registry root in a temporary directory, removed on drop.
pub struct TestRoot {
    dir: TempDir,
    config: RegistryConfig,
    env: OnceLock<Arc<Environment>>,
}

impl TestRoot {
    #[must_use]
    pub fn new() -> Self {
        Self::with_engine(EngineKind::Tree)
    }

    #[must_use]
    pub fn with_engine(engine: EngineKind) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut config = RegistryConfig::with_root(dir.path());
        config.engine = engine;
        Self {
            dir,
            config,
            env: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RegistryConfig {
        &mut self.config
    }

    /// A registry over this root, without migration.
    pub fn registry(&self) -> NamespaceRegistry {
        NamespaceRegistry::new(self.config.clone())
    }

    /// A registry over this root, after migration.
    pub fn open_registry(&self) -> NamespaceRegistry {
        NamespaceRegistry::open(self.config.clone())
            .expect("open registry")
            .0
    }

    /// An environment for inspecting files directly. Do not mix with a
    /// registry over the same root.
    pub fn environment(&self) -> Arc<Environment> {
        Arc::clone(self.env.get_or_init(|| {
            Environment::open_or_create(
                &self.config.environment_home(),
                self.config.environment_options(),
            )
            .expect("open environment")
        }))
    }
}

impl Default for TestRoot {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestRoot {
    fn drop(&mut self) {
        if let Some(env) = self.env.take() {
            let _ = env.close();
        }
    }
}

/// Run `f` with a fresh environment for `config`, closing it afterwards.
fn with_environment(config: &RegistryConfig, f: impl FnOnce(&Arc<Environment>)) {
    let env = Environment::open_or_create(&config.environment_home(), config.environment_options())
        .expect("open environment");
    f(&env);
    env.close().expect("close environment");
}

/// Write a generation 0 registry: one hash file with composite keys.
pub fn write_generation0(config: &RegistryConfig, entries: &[(&str, &str)]) {
    let mut hash = HashEngine::create(&config.legacy_hash_path()).expect("create hash file");
    for (key, value) in entries {
        hash.put(key.as_bytes(), value.as_bytes()).expect("put");
    }
    hash.close().expect("close hash file");
}

/// Write a legacy tree file. A key listed twice gets both values.
pub fn write_legacy_tree(config: &RegistryConfig, path: &Path, entries: &[(&str, &str)]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent directory");
    }
    with_environment(config, |env| {
        let mut tree = TreeEngine::create(path, TreeFormat::Legacy, Arc::clone(env), config.checkpoint)
            .expect("create tree file");
        for (key, value) in entries {
            tree.put_dup(key.as_bytes(), value.as_bytes()).expect("put");
        }
        tree.close().expect("close tree file");
    });
}

/// Write a generation 1 registry: one legacy tree file with composite keys.
pub fn write_generation1(config: &RegistryConfig, entries: &[(&str, &str)]) {
    write_legacy_tree(config, &config.legacy_tree_path(), entries);
}

/// Write one generation 2 namespace file.
pub fn write_generation2(config: &RegistryConfig, namespace: &str, entries: &[(&str, &str)]) {
    let path = namespace_path(&config.registry_directory(), namespace, EngineKind::LegacyTree);
    write_legacy_tree(config, &path, entries);
}
