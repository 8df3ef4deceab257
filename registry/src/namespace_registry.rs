//! Registry of namespace accessors.
//!
//! The registry is the top-level coordinator: it runs migration at startup,
//! owns the shared [`Environment`] (opened lazily on the first tree-engine
//! access, at most once), hands out one [`Accessor`] per namespace and
//! shuts everything down in order.
//!
//! # Namespace Files
//!
//! - `registry/<namespace>.<ext>` where the extension follows the configured
//!   engine (`tdb` for trees, `hdb` for hashes)
//! - Nested namespaces (`game/scores`) become nested directories
//!
//! # Invariants
//!
//! - Each namespace maps to exactly one `Accessor` for the lifetime of the
//!   registry, so a file is never opened twice
//! - Accessors are closed before the environment on shutdown
//! - Namespace names are validated before they reach the filesystem

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;

use crate::accessor::Accessor;
use crate::config::RegistryConfig;
use crate::error::{RegistryError, recoverable};
use crate::migration::{MigrationPipeline, MigrationReport};
use crate::storage::{CloseOutcome, EngineKind, Environment, EnvironmentStats, Lsn};

/// Maximum length of a normalized namespace name.
const MAX_NAMESPACE_LENGTH: usize = 256;

/// Outcome of [`NamespaceRegistry::maintain`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Accessors flushed before the checkpoint.
    pub flushed: usize,
    /// Checkpoint LSN, if the environment is open and the checkpoint worked.
    pub checkpoint_lsn: Option<Lsn>,
    /// Log segments deleted.
    pub archived: Vec<PathBuf>,
}

/// Outcome of [`NamespaceRegistry::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub accessors_closed: usize,
    /// `None` if the environment was never opened.
    pub environment: Option<CloseOutcome>,
}

/// State shared by the registry and every accessor it hands out.
#[derive(Debug)]
pub(crate) struct Shared {
    config: RegistryConfig,
    environment: Mutex<Option<Arc<Environment>>>,
    accessors: RwLock<HashMap<String, Arc<Accessor>>>,
    shut_down: AtomicBool,
}

impl Shared {
    pub(crate) const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// The shared environment, opened on first use.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    #[allow(clippy::significant_drop_tightening)] // the lock makes the open happen once
    pub(crate) fn environment(&self) -> Result<Arc<Environment>, RegistryError> {
        if self.is_shut_down() {
            return Err(RegistryError::ShutDown);
        }
        let mut environment = self
            .environment
            .lock()
            .map_err(|_| RegistryError::LockPoisoned)?;
        if let Some(env) = environment.as_ref() {
            return Ok(Arc::clone(env));
        }

        let env = Environment::open_or_create(
            &self.config.environment_home(),
            self.config.environment_options(),
        )
        .map_err(RegistryError::EnvironmentOpen)?;
        *environment = Some(Arc::clone(&env));
        Ok(env)
    }

    fn open_environment(&self) -> Option<Arc<Environment>> {
        self.environment
            .lock()
            .ok()
            .and_then(|environment| environment.clone())
    }

    /// Get or create the accessor for `name`.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    #[allow(clippy::significant_drop_tightening)] // False positive - we need the lock held during insert
    pub(crate) fn accessor(self: &Arc<Self>, name: &str) -> Result<Arc<Accessor>, RegistryError> {
        if self.is_shut_down() {
            return Err(RegistryError::ShutDown);
        }
        let name = normalize_namespace(name)?;

        // Fast path: accessor already handed out
        {
            let accessors = self
                .accessors
                .read()
                .map_err(|_| RegistryError::LockPoisoned)?;
            if let Some(accessor) = accessors.get(&name) {
                return Ok(Arc::clone(accessor));
            }
        }

        let mut accessors = self
            .accessors
            .write()
            .map_err(|_| RegistryError::LockPoisoned)?;

        // Double-check: another thread may have created it while we waited for the write lock
        if let Some(accessor) = accessors.get(&name) {
            return Ok(Arc::clone(accessor));
        }

        let kind = self.config.engine;
        let path = namespace_path(&self.config.registry_directory(), &name, kind);
        let accessor = Arc::new(Accessor::new(
            name.clone(),
            path,
            kind,
            Arc::downgrade(self),
        ));
        accessors.insert(name.clone(), Arc::clone(&accessor));

        tracing::debug!(namespace = %name, engine = %kind, "created accessor");
        Ok(accessor)
    }

    fn live_accessors(&self) -> Result<Vec<Arc<Accessor>>, RegistryError> {
        let accessors = self
            .accessors
            .read()
            .map_err(|_| RegistryError::LockPoisoned)?;
        Ok(accessors.values().cloned().collect())
    }
}

/// Registry of namespace accessors.
///
/// Dropping the registry without calling [`shutdown`](Self::shutdown) shuts
/// it down, logging any error.
#[derive(Debug)]
pub struct NamespaceRegistry {
    shared: Arc<Shared>,
}

impl NamespaceRegistry {
    /// Migrate legacy layouts under the configured root, then open the
    /// registry.
    ///
    /// # Errors
    ///
    /// Returns an error if migration fails. Every migration error is fatal.
    pub fn open(config: RegistryConfig) -> Result<(Self, MigrationReport), RegistryError> {
        let report = MigrationPipeline::new(&config).run()?;
        if report.migrated_anything() {
            tracing::info!(?report, "migrated legacy registry layout");
        }
        Ok((Self::new(config), report))
    }

    /// Open the registry without running migration.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        tracing::info!(
            root = %config.root_directory.display(),
            engine = %config.engine,
            "opened namespace registry"
        );
        Self {
            shared: Arc::new(Shared {
                config,
                environment: Mutex::new(None),
                accessors: RwLock::new(HashMap::new()),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        self.shared.config()
    }

    /// Get or create the accessor for a namespace.
    ///
    /// The name is normalized first, so `Weather` and `weather` share an
    /// accessor. The namespace file is not touched until the accessor is
    /// used.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the registry has been shut
    /// down.
    pub fn accessor(&self, name: &str) -> Result<Arc<Accessor>, RegistryError> {
        self.shared.accessor(name)
    }

    /// The shared environment, opening it if needed.
    pub fn environment(&self) -> Result<Arc<Environment>, RegistryError> {
        self.shared.environment()
    }

    /// Flush every accessor, then checkpoint the environment and delete the
    /// log segments the checkpoint made redundant.
    ///
    /// Every step is best effort; failures are logged and skipped. Only a
    /// fatal error is returned.
    pub fn maintain(&self) -> Result<MaintenanceReport, RegistryError> {
        let mut report = MaintenanceReport::default();
        for accessor in self.shared.live_accessors()? {
            let what = format!("flushing namespace '{}'", accessor.name());
            if recoverable(&what, accessor.flush())?.is_some() {
                report.flushed += 1;
            }
        }

        let Some(env) = self.shared.open_environment() else {
            return Ok(report);
        };
        if env.is_closed() {
            return Ok(report);
        }
        report.checkpoint_lsn = recoverable("checkpoint", env.checkpoint().map_err(Into::into))?;
        report.archived =
            recoverable("log archival", env.archive_and_delete_logs().map_err(Into::into))?
                .unwrap_or_default();

        tracing::debug!(
            flushed = report.flushed,
            checkpoint_lsn = ?report.checkpoint_lsn,
            archived = report.archived.len(),
            "maintenance finished"
        );
        Ok(report)
    }

    /// Environment statistics, if the environment is open.
    #[must_use]
    pub fn stats(&self) -> Option<EnvironmentStats> {
        self.shared.open_environment().and_then(|env| env.stats())
    }

    /// Close every accessor, then the environment.
    ///
    /// Further accessor requests fail with [`RegistryError::ShutDown`].
    /// Shutting down twice is a no-op.
    pub fn shutdown(&self) -> Result<ShutdownReport, RegistryError> {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(ShutdownReport {
                accessors_closed: 0,
                environment: None,
            });
        }

        let accessors: Vec<Arc<Accessor>> = {
            let mut accessors = self
                .shared
                .accessors
                .write()
                .map_err(|_| RegistryError::LockPoisoned)?;
            accessors.drain().map(|(_, accessor)| accessor).collect()
        };
        let mut accessors_closed = 0;
        for accessor in &accessors {
            let what = format!("closing namespace '{}'", accessor.name());
            if recoverable(&what, accessor.close())?.is_some() {
                accessors_closed += 1;
            }
        }

        let env = self
            .shared
            .environment
            .lock()
            .map_err(|_| RegistryError::LockPoisoned)?
            .take();
        let environment = match env {
            Some(env) => Some(env.close()?),
            None => None,
        };

        tracing::info!(accessors_closed, ?environment, "namespace registry shut down");
        Ok(ShutdownReport {
            accessors_closed,
            environment,
        })
    }
}

impl Drop for NamespaceRegistry {
    fn drop(&mut self) {
        if self.shared.is_shut_down() {
            return;
        }
        if let Err(e) = self.shutdown() {
            tracing::error!("failed to shut down namespace registry: {e}");
        }
    }
}

/// Error returned for an invalid namespace name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceError {
    /// The name is empty.
    Empty,
    /// The name exceeds the maximum length.
    TooLong,
    /// A `/`-separated component is empty, `.`, `..`, or contains a
    /// character that is not allowed in file names.
    InvalidComponent { name: String, component: String },
}

impl std::fmt::Display for NamespaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "namespace must not be empty"),
            Self::TooLong => write!(
                f,
                "namespace exceeds maximum length of {MAX_NAMESPACE_LENGTH} characters"
            ),
            Self::InvalidComponent { name, component } => {
                write!(f, "namespace '{name}' has invalid component '{component}'")
            }
        }
    }
}

impl std::error::Error for NamespaceError {}

/// Normalize a namespace name: lowercase, `/`-separated, every component a
/// valid file name.
///
/// # Examples
///
/// ```
/// use registry::namespace_registry::normalize_namespace;
///
/// assert_eq!(normalize_namespace("Game/Scores").unwrap(), "game/scores");
/// assert!(normalize_namespace("").is_err());
/// assert!(normalize_namespace("../evil").is_err());
/// assert!(normalize_namespace("a//b").is_err());
/// ```
pub fn normalize_namespace(name: &str) -> Result<String, NamespaceError> {
    if name.is_empty() {
        return Err(NamespaceError::Empty);
    }
    let normalized = name.to_lowercase();
    if normalized.len() > MAX_NAMESPACE_LENGTH {
        return Err(NamespaceError::TooLong);
    }

    for component in normalized.split('/') {
        let invalid = component.is_empty()
            || component == "."
            || component == ".."
            || component
                .chars()
                .any(|c| c == '\\' || c == '\0' || c.is_control());
        if invalid {
            return Err(NamespaceError::InvalidComponent {
                name: name.to_string(),
                component: component.to_string(),
            });
        }
    }
    Ok(normalized)
}

/// Path of the file backing a normalized namespace under `registry_directory`.
#[must_use]
pub fn namespace_path(registry_directory: &Path, namespace: &str, kind: EngineKind) -> PathBuf {
    let mut path = registry_directory.to_path_buf();
    path.extend(namespace.split('/'));
    let mut file = path.into_os_string();
    file.push(".");
    file.push(kind.extension());
    PathBuf::from(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_namespace_valid() {
        assert_eq!(normalize_namespace("weather").unwrap(), "weather");
        assert_eq!(normalize_namespace("Weather").unwrap(), "weather");
        assert_eq!(normalize_namespace("game/Scores").unwrap(), "game/scores");
        assert_eq!(normalize_namespace("plugin.docs").unwrap(), "plugin.docs");
    }

    #[test]
    fn test_normalize_namespace_invalid() {
        assert_eq!(normalize_namespace(""), Err(NamespaceError::Empty));
        assert_eq!(
            normalize_namespace(&"a".repeat(MAX_NAMESPACE_LENGTH + 1)),
            Err(NamespaceError::TooLong)
        );
        for name in ["/weather", "weather/", "a//b", "a/../b", ".", "a\\b", "a\0b"] {
            assert!(
                matches!(
                    normalize_namespace(name),
                    Err(NamespaceError::InvalidComponent { .. })
                ),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_namespace_path() {
        let dir = Path::new("/srv/registry");
        assert_eq!(
            namespace_path(dir, "weather", EngineKind::Tree),
            PathBuf::from("/srv/registry/weather.tdb")
        );
        assert_eq!(
            namespace_path(dir, "game/scores", EngineKind::Hash),
            PathBuf::from("/srv/registry/game/scores.hdb")
        );
        assert_eq!(
            namespace_path(dir, "plugin.docs", EngineKind::LegacyTree),
            PathBuf::from("/srv/registry/plugin.docs.db")
        );
    }

    #[test]
    fn test_accessor_is_shared_per_namespace() {
        let dir = tempdir().expect("create temp dir");
        let registry = NamespaceRegistry::new(RegistryConfig::with_root(dir.path()));

        let a = registry.accessor("Weather").unwrap();
        let b = registry.accessor("weather").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry.accessor("weather/daily").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.name(), "weather/daily");
    }

    #[test]
    fn test_environment_opened_lazily_and_once() {
        let dir = tempdir().expect("create temp dir");
        let registry = NamespaceRegistry::new(RegistryConfig::with_root(dir.path()));
        assert!(registry.stats().is_none());

        let first = registry.environment().unwrap();
        let second = registry.environment().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.stats().is_some());
    }

    #[test]
    fn test_shutdown_closes_environment_and_refuses_accessors() {
        let dir = tempdir().expect("create temp dir");
        let config = RegistryConfig::with_root(dir.path());
        let home = config.environment_home();
        let registry = NamespaceRegistry::new(config);

        let weather = registry.accessor("weather").unwrap();
        weather.set("london", serde_json::json!(15)).unwrap();
        assert!(home.exists());

        let report = registry.shutdown().unwrap();
        assert_eq!(report.accessors_closed, 1);
        assert_eq!(report.environment, Some(CloseOutcome::Removed));
        assert!(!home.exists());

        assert!(matches!(
            registry.accessor("weather"),
            Err(RegistryError::ShutDown)
        ));
        assert!(matches!(
            weather.get("london"),
            Err(RegistryError::ShutDown)
        ));

        let again = registry.shutdown().unwrap();
        assert_eq!(again.accessors_closed, 0);
        assert_eq!(again.environment, None);
    }

    #[test]
    fn test_maintain_checkpoints_and_archives() {
        let dir = tempdir().expect("create temp dir");
        let mut config = RegistryConfig::with_root(dir.path());
        config.log_segment_size = Some(64 * 1024);
        let registry = NamespaceRegistry::new(config);

        let accessor = registry.accessor("bulk").unwrap();
        let payload = serde_json::Value::String("x".repeat(1024));
        for i in 0..200 {
            accessor.set(&format!("key{i:03}"), payload.clone()).unwrap();
        }

        let report = registry.maintain().unwrap();
        assert_eq!(report.flushed, 1);
        assert!(report.checkpoint_lsn.is_some());
        assert!(!report.archived.is_empty());
        assert_eq!(accessor.length().unwrap(), 200);
    }

    #[test]
    fn test_maintain_without_environment() {
        let dir = tempdir().expect("create temp dir");
        let registry = NamespaceRegistry::new(RegistryConfig::with_root(dir.path()));
        let report = registry.maintain().unwrap();
        assert_eq!(report, MaintenanceReport::default());
    }
}
