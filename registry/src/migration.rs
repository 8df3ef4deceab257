//! Migration of legacy on-disk layouts.
//!
//! The registry has gone through three layouts before the current one:
//!
//! ```text
//! generation 0   <root>/registry.db          one hash file, "<ns>/<key>" keys
//! generation 1   <root>/registry_tree.db     one legacy tree file, same keys
//! generation 2   <root>/registry/<ns>.db     one legacy tree file per namespace
//! generation 3   <root>/registry/<ns>.tdb    one current tree file per namespace
//! ```
//!
//! When the hash engine is configured the last stage writes `<ns>.hdb`
//! files instead, keeping the first value of each key.
//!
//! [`MigrationPipeline::run`] moves an installation forward one stage at a
//! time. Each stage runs only if its source exists, so a fresh install and a
//! migrated one are both no-ops. A source is never deleted: once its target
//! is complete it is renamed with an `.old` (or `.bak`) suffix, which is
//! also what stops the stage from running again. A target left behind by a
//! crashed run is moved aside with a `.partial` suffix and rebuilt.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::config::RegistryConfig;
use crate::namespace_registry::{namespace_path, normalize_namespace};
use crate::storage::comparator::CaseInsensitiveKey;
use crate::storage::{
    EngineError, EngineKind, Environment, EnvironmentError, HashEngine, StorageEngine,
    TreeEngine, TreeFormat,
};

/// Separator between namespace and key in generation 0 and 1 keys.
const NAMESPACE_SEPARATOR: u8 = b'/';

/// Separator of nested namespaces in the oldest layouts.
const LEGACY_NESTING_SEPARATOR: char = '+';

type Lists = BTreeMap<CaseInsensitiveKey, Vec<Vec<u8>>>;

/// What one stage did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub files_read: usize,
    pub files_written: usize,
    /// Values copied (every duplicate counts).
    pub values: usize,
    /// Entries that could not be placed and were left in the source.
    pub skipped: usize,
    /// Where the sources were moved.
    pub retired: Vec<PathBuf>,
}

/// What a pipeline run did. `None` means the stage had nothing to do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub hash_to_tree: Option<StageReport>,
    pub split: Option<StageReport>,
    pub engine_swap: Option<StageReport>,
}

impl MigrationReport {
    #[must_use]
    pub const fn migrated_anything(&self) -> bool {
        self.hash_to_tree.is_some() || self.split.is_some() || self.engine_swap.is_some()
    }
}

/// One-shot upgrade of every legacy layout under a registry root.
#[derive(Debug)]
pub struct MigrationPipeline<'a> {
    config: &'a RegistryConfig,
    env: Option<Arc<Environment>>,
}

impl<'a> MigrationPipeline<'a> {
    #[must_use]
    pub const fn new(config: &'a RegistryConfig) -> Self {
        Self { config, env: None }
    }

    /// Run every stage in order, then close the environment if a stage
    /// opened it.
    pub fn run(mut self) -> Result<MigrationReport, MigrationError> {
        let result = self.run_stages();
        let closed = self.close_environment();
        let report = result?;
        closed?;
        Ok(report)
    }

    fn run_stages(&mut self) -> Result<MigrationReport, MigrationError> {
        Ok(MigrationReport {
            hash_to_tree: self.hash_to_tree()?,
            split: self.split()?,
            engine_swap: self.engine_swap()?,
        })
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    fn environment(&mut self) -> Result<Arc<Environment>, MigrationError> {
        if let Some(env) = &self.env {
            return Ok(Arc::clone(env));
        }
        let env = Environment::open_or_create(
            &self.config.environment_home(),
            self.config.environment_options(),
        )?;
        self.env = Some(Arc::clone(&env));
        Ok(env)
    }

    fn close_environment(&mut self) -> Result<(), MigrationError> {
        if let Some(env) = self.env.take() {
            let outcome = env.close()?;
            tracing::debug!(?outcome, "closed migration environment");
        }
        Ok(())
    }

    /// Generation 0 to 1: copy the hash file into a legacy tree file.
    fn hash_to_tree(&mut self) -> Result<Option<StageReport>, MigrationError> {
        let source = self.config.legacy_hash_path();
        if !source.exists() {
            return Ok(None);
        }
        let target = self.config.legacy_tree_path();
        tracing::info!(
            source = %source.display(),
            path = %target.display(),
            "migrating hash registry to tree registry"
        );
        set_aside_stale(&target)?;

        let mut report = StageReport {
            files_read: 1,
            ..StageReport::default()
        };
        let mut hash = HashEngine::open_read_only(&source)?;
        let lists = group(hash.each(None)?);
        report.values = lists.values().map(Vec::len).sum();

        let env = self.environment()?;
        let mut tree = TreeEngine::create(
            &target,
            TreeFormat::Legacy,
            env,
            self.config.checkpoint,
        )?;
        tree.put_lists(lists.into_iter().map(|(key, values)| (key.into_bytes(), values)))?;
        tree.close()?;
        hash.close()?;
        report.files_written = 1;

        report.retired.push(retire(&source, "old")?);
        tracing::info!(values = report.values, "migrated hash registry");
        Ok(Some(report))
    }

    /// Generation 1 to 2: split the shared tree file into one file per
    /// namespace.
    fn split(&mut self) -> Result<Option<StageReport>, MigrationError> {
        let source = self.config.legacy_tree_path();
        if !source.exists() {
            return Ok(None);
        }
        let registry_directory = self.config.registry_directory();
        tracing::info!(
            source = %source.display(),
            target = %registry_directory.display(),
            "splitting tree registry into namespace files"
        );

        let env = self.environment()?;
        let mut shared = TreeEngine::open(&source, Arc::clone(&env), self.config.checkpoint)?;
        let mut report = StageReport {
            files_read: 1,
            ..StageReport::default()
        };

        let mut namespaces: BTreeMap<String, Lists> = BTreeMap::new();
        for (composite, values) in shared.lists()? {
            let Some((namespace, key)) = split_composite_key(composite) else {
                tracing::warn!(
                    key = %String::from_utf8_lossy(composite),
                    "registry key has no namespace; leaving it behind"
                );
                report.skipped += values.len();
                continue;
            };
            namespaces
                .entry(namespace)
                .or_default()
                .entry(CaseInsensitiveKey::new(key))
                .or_default()
                .extend(values.iter().cloned());
        }

        for (namespace, lists) in namespaces {
            let path = namespace_path(&registry_directory, &namespace, EngineKind::LegacyTree);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            set_aside_stale(&path)?;

            let values: usize = lists.values().map(Vec::len).sum();
            let mut tree = TreeEngine::create(
                &path,
                TreeFormat::Legacy,
                Arc::clone(&env),
                self.config.checkpoint,
            )?;
            tree.put_lists(lists.into_iter().map(|(key, values)| (key.into_bytes(), values)))?;
            tree.close()?;

            tracing::debug!(namespace = %namespace, values, "wrote namespace file");
            report.files_written += 1;
            report.values += values;
        }
        shared.close()?;

        report.retired.push(retire(&source, "old")?);
        tracing::info!(
            namespaces = report.files_written,
            values = report.values,
            skipped = report.skipped,
            "split tree registry"
        );
        Ok(Some(report))
    }

    /// Generation 2 to 3: rewrite every legacy namespace file in the current
    /// tree format.
    fn engine_swap(&mut self) -> Result<Option<StageReport>, MigrationError> {
        let mut sources = Vec::new();
        collect_legacy_files(&self.config.registry_directory(), &mut sources)?;
        if sources.is_empty() {
            return Ok(None);
        }
        sources.sort();
        tracing::info!(files = sources.len(), "converting namespace files to current format");

        let env = self.environment()?;
        let mut report = StageReport::default();
        let kind = match self.config.engine {
            EngineKind::Hash => EngineKind::Hash,
            EngineKind::LegacyTree | EngineKind::Tree => EngineKind::Tree,
        };
        for source in sources {
            let target = source.with_extension(kind.extension());
            set_aside_stale(&target)?;

            let mut legacy = TreeEngine::open(&source, Arc::clone(&env), self.config.checkpoint)?;
            let (values, dropped) = if kind == EngineKind::Hash {
                copy_to_hash(&legacy, &target)?
            } else {
                let mut current = TreeEngine::create(
                    &target,
                    TreeFormat::Current,
                    Arc::clone(&env),
                    self.config.checkpoint,
                )?;
                let mut values = 0;
                current.put_lists(legacy.lists()?.map(|(key, list)| {
                    values += list.len();
                    (key.to_vec(), list.to_vec())
                }))?;
                current.close()?;
                (values, 0)
            };
            legacy.close()?;
            report.skipped += dropped;

            tracing::debug!(source = %source.display(), values, "converted namespace file");
            report.files_read += 1;
            report.files_written += 1;
            report.values += values;
            report.retired.push(retire(&source, "bak")?);
        }
        tracing::info!(
            files = report.files_written,
            values = report.values,
            "converted namespace files"
        );
        Ok(Some(report))
    }
}

/// Copy a legacy tree into a hash file. A hash file holds one value per
/// key, so only the first value of each list survives. It is the one `get`
/// returned; the rest stay in the retired source. Returns the values
/// written and the values left behind.
fn copy_to_hash(legacy: &TreeEngine, target: &Path) -> Result<(usize, usize), MigrationError> {
    let mut hash = HashEngine::create(target)?;
    let (mut values, mut dropped) = (0, 0);
    for (key, list) in legacy.lists()? {
        let Some((first, rest)) = list.split_first() else {
            continue;
        };
        hash.put(key, first)?;
        values += 1;
        dropped += rest.len();
    }
    hash.close()?;
    if dropped > 0 {
        tracing::warn!(
            path = %target.display(),
            dropped,
            "hash files keep one value per key, extra values remain in the retired file"
        );
    }
    Ok((values, dropped))
}

/// Group entries into value lists under the comparator. Keys that differ
/// only in case share a list, in the order they are seen.
fn group<'a>(entries: impl Iterator<Item = (&'a [u8], &'a [u8])>) -> Lists {
    let mut lists = Lists::new();
    for (key, value) in entries {
        lists
            .entry(CaseInsensitiveKey::new(key))
            .or_default()
            .push(value.to_vec());
    }
    lists
}

/// Split `"<namespace>/<key>"` on the first separator.
///
/// The namespace is lowercased and `+` becomes a directory separator. Keys
/// without a separator, or whose namespace is not a valid name, give `None`.
fn split_composite_key(composite: &[u8]) -> Option<(String, &[u8])> {
    let at = composite.iter().position(|&b| b == NAMESPACE_SEPARATOR)?;
    let (namespace, key) = (&composite[..at], &composite[at + 1..]);
    let namespace = std::str::from_utf8(namespace)
        .ok()?
        .replace(LEGACY_NESTING_SEPARATOR, "/");
    match normalize_namespace(&namespace) {
        Ok(namespace) => Some((namespace, key)),
        Err(e) => {
            tracing::warn!("cannot migrate namespace '{namespace}': {e}");
            None
        }
    }
}

/// Every `*.db` file under `dir`, recursively.
fn collect_legacy_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), MigrationError> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_legacy_files(&path, out)?;
        } else if path.extension() == Some(OsStr::new(EngineKind::LegacyTree.extension())) {
            out.push(path);
        }
    }
    Ok(())
}

/// `path` with `.suffix` appended.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Rename `path` to `path.suffix`, or `path.suffix.N` if that is taken, so
/// no earlier artifact is overwritten.
fn retire(path: &Path, suffix: &str) -> Result<PathBuf, MigrationError> {
    let mut target = with_suffix(path, suffix);
    let mut attempt = 1;
    while target.exists() {
        target = with_suffix(path, &format!("{suffix}.{attempt}"));
        attempt += 1;
    }
    std::fs::rename(path, &target)?;
    tracing::debug!(from = %path.display(), to = %target.display(), "retired file");
    Ok(target)
}

/// Move a target left behind by an interrupted run out of the way.
fn set_aside_stale(path: &Path) -> Result<(), MigrationError> {
    if path.exists() {
        let moved = retire(path, "partial")?;
        tracing::warn!(
            path = %path.display(),
            moved = %moved.display(),
            "found an incomplete migration target; rebuilding it"
        );
    }
    Ok(())
}

/// Errors that can occur during migration. All of them are fatal.
#[derive(Debug)]
pub enum MigrationError {
    /// I/O error.
    Io(std::io::Error),
    /// A source or target file failed.
    Engine(EngineError),
    /// The environment failed.
    Environment(EnvironmentError),
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "migration I/O error: {e}"),
            Self::Engine(e) => write!(f, "{e}"),
            Self::Environment(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Engine(e) => Some(e),
            Self::Environment(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for MigrationError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<EngineError> for MigrationError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl From<EnvironmentError> for MigrationError {
    fn from(e: EnvironmentError) -> Self {
        Self::Environment(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestRoot, write_generation0, write_generation1, write_generation2};

    fn tree_lists(root: &TestRoot, path: &Path) -> Vec<(Vec<u8>, Vec<Vec<u8>>)> {
        let env = root.environment();
        let tree = TreeEngine::open(path, env, root.config().checkpoint).unwrap();
        tree.lists()
            .unwrap()
            .map(|(key, values)| (key.to_vec(), values.to_vec()))
            .collect()
    }

    #[test]
    fn test_split_composite_key() {
        assert_eq!(
            split_composite_key(b"Weather/london"),
            Some(("weather".to_string(), &b"london"[..]))
        );
        assert_eq!(
            split_composite_key(b"game+scores/alice/bob"),
            Some(("game/scores".to_string(), &b"alice/bob"[..]))
        );
        assert_eq!(split_composite_key(b"orphan"), None);
        assert_eq!(split_composite_key(b"/empty-namespace"), None);
        assert_eq!(split_composite_key(b"a++b/key"), None);
    }

    #[test]
    fn test_fresh_install_is_noop() {
        let root = TestRoot::new();
        let report = MigrationPipeline::new(root.config()).run().unwrap();
        assert_eq!(report, MigrationReport::default());
        assert!(!report.migrated_anything());
        assert!(!root.config().environment_home().exists());
    }

    #[test]
    fn test_full_chain_from_generation0() {
        let root = TestRoot::new();
        write_generation0(
            root.config(),
            &[
                ("weather/london", r#"{"temp":15}"#),
                ("Weather/Paris", r#"{"temp":18}"#),
                ("game+scores/alice", "10"),
                ("orphan", "1"),
            ],
        );

        let report = MigrationPipeline::new(root.config()).run().unwrap();
        let first = report.hash_to_tree.unwrap();
        assert_eq!(first.values, 4);
        let split = report.split.unwrap();
        assert_eq!(split.files_written, 2);
        assert_eq!(split.values, 3);
        assert_eq!(split.skipped, 1);
        let swap = report.engine_swap.unwrap();
        assert_eq!(swap.files_written, 2);

        let config = root.config();
        assert!(with_suffix(&config.legacy_hash_path(), "old").exists());
        assert!(with_suffix(&config.legacy_tree_path(), "old").exists());
        assert!(!config.legacy_hash_path().exists());
        assert!(!config.legacy_tree_path().exists());

        let registry = config.registry_directory();
        assert!(registry.join("weather.db.bak").exists());
        assert!(registry.join("game/scores.db.bak").exists());
        assert_eq!(
            tree_lists(&root, &registry.join("weather.tdb")),
            vec![
                (b"london".to_vec(), vec![br#"{"temp":15}"#.to_vec()]),
                (b"Paris".to_vec(), vec![br#"{"temp":18}"#.to_vec()]),
            ]
        );
        assert_eq!(
            tree_lists(&root, &registry.join("game/scores.tdb")),
            vec![(b"alice".to_vec(), vec![b"10".to_vec()])]
        );
    }

    #[test]
    fn test_second_run_is_noop() {
        let root = TestRoot::new();
        write_generation1(root.config(), &[("weather/london", "15")]);

        let first = MigrationPipeline::new(root.config()).run().unwrap();
        assert!(first.split.is_some());
        let second = MigrationPipeline::new(root.config()).run().unwrap();
        assert_eq!(second, MigrationReport::default());

        let path = root.config().registry_directory().join("weather.tdb");
        assert_eq!(
            tree_lists(&root, &path),
            vec![(b"london".to_vec(), vec![b"15".to_vec()])]
        );
    }

    #[test]
    fn test_split_merges_keys_differing_in_case() {
        let root = TestRoot::new();
        write_generation1(
            root.config(),
            &[("Weather/london", "1"), ("weather/LONDON", "2")],
        );

        MigrationPipeline::new(root.config()).run().unwrap();
        let path = root.config().registry_directory().join("weather.tdb");
        let lists = tree_lists(&root, &path);
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].1.len(), 2);
    }

    #[test]
    fn test_engine_swap_keeps_duplicates() {
        let root = TestRoot::new();
        write_generation2(
            root.config(),
            "docs",
            &[("topic", "first"), ("topic", "second"), ("z", "last")],
        );

        let report = MigrationPipeline::new(root.config()).run().unwrap();
        let swap = report.engine_swap.unwrap();
        assert_eq!(swap.values, 3);

        let path = root.config().registry_directory().join("docs.tdb");
        let lists = tree_lists(&root, &path);
        assert_eq!(lists[0].1, vec![b"first".to_vec(), b"second".to_vec()]);

        let env = root.environment();
        let tree = TreeEngine::open(&path, env, root.config().checkpoint).unwrap();
        assert_eq!(tree.format(), TreeFormat::Current);
    }

    #[test]
    fn test_engine_swap_to_hash_keeps_first_value() {
        let root = TestRoot::with_engine(EngineKind::Hash);
        write_generation2(
            root.config(),
            "docs",
            &[("topic", "first"), ("topic", "second"), ("z", "last")],
        );

        let report = MigrationPipeline::new(root.config()).run().unwrap();
        let swap = report.engine_swap.unwrap();
        assert_eq!(swap.values, 2);
        assert_eq!(swap.skipped, 1);

        let registry = root.config().registry_directory();
        assert!(!registry.join("docs.tdb").exists());
        assert!(registry.join("docs.db.bak").exists());
        let hash = HashEngine::open(&registry.join("docs.hdb")).unwrap();
        assert_eq!(hash.get(b"topic").unwrap(), Some(b"first".to_vec()));
        assert_eq!(hash.get(b"z").unwrap(), Some(b"last".to_vec()));
    }

    #[test]
    fn test_generation0_source_is_never_modified() {
        let root = TestRoot::new();
        let source = root.config().legacy_hash_path();
        write_generation0(root.config(), &[("weather/london", "15")]);
        let mut file = std::fs::OpenOptions::new().append(true).open(&source).unwrap();
        std::io::Write::write_all(&mut file, &[5, 0]).unwrap();
        drop(file);
        let before = std::fs::read(&source).unwrap();

        let report = MigrationPipeline::new(root.config()).run().unwrap();
        assert_eq!(report.hash_to_tree.unwrap().values, 1);
        assert_eq!(std::fs::read(with_suffix(&source, "old")).unwrap(), before);
    }

    #[test]
    fn test_stale_target_is_set_aside() {
        let root = TestRoot::new();
        write_generation0(root.config(), &[("ns/k", "1")]);
        std::fs::write(root.config().legacy_tree_path(), b"half written").unwrap();

        let report = MigrationPipeline::new(root.config()).run().unwrap();
        assert!(report.hash_to_tree.is_some());
        assert!(with_suffix(&root.config().legacy_tree_path(), "partial").exists());
        assert!(root.config().registry_directory().join("ns.tdb").exists());
    }

    #[test]
    fn test_retire_never_overwrites() {
        let root = TestRoot::new();
        let path = root.path().join("file.db");
        std::fs::write(&path, b"one").unwrap();
        assert_eq!(retire(&path, "old").unwrap(), with_suffix(&path, "old"));
        std::fs::write(&path, b"two").unwrap();
        assert_eq!(retire(&path, "old").unwrap(), with_suffix(&path, "old.1"));
        assert_eq!(std::fs::read(with_suffix(&path, "old")).unwrap(), b"one");
    }

    #[test]
    fn test_corrupt_source_is_fatal() {
        let root = TestRoot::new();
        std::fs::write(root.config().legacy_hash_path(), b"garbage").unwrap();
        let err = MigrationPipeline::new(root.config()).run().unwrap_err();
        assert!(matches!(err, MigrationError::Engine(_)));
        assert!(root.config().legacy_hash_path().exists());
    }
}
