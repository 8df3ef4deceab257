//! Top-level error type and the policy applied to it.
//!
//! Every module has its own error enum; [`RegistryError`] wraps them at the
//! public boundary. [`RegistryError::severity`] is the single place that
//! decides whether an error aborts startup or is logged and skipped.

use std::fmt;

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::migration::MigrationError;
use crate::namespace_registry::NamespaceError;
use crate::storage::{EngineError, EnvironmentError};

/// How an error is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The process cannot continue.
    Fatal,
    /// Log it and carry on.
    Recoverable,
}

/// Errors surfaced by the registry.
#[derive(Debug)]
pub enum RegistryError {
    /// Configuration error.
    Config(ConfigError),
    /// Invalid namespace name.
    Namespace(NamespaceError),
    /// Storage engine error.
    Engine(EngineError),
    /// The environment could not be opened, even with reduced options.
    EnvironmentOpen(EnvironmentError),
    /// Environment error after a successful open.
    Environment(EnvironmentError),
    /// Migration error.
    Migration(MigrationError),
    /// Value could not be encoded or converted.
    Codec(CodecError),
    /// I/O error.
    Io(std::io::Error),
    /// A thread panicked while holding an accessor lock.
    LockPoisoned,
    /// The registry has been shut down.
    ShutDown,
}

impl RegistryError {
    #[must_use]
    pub const fn severity(&self) -> Severity {
        let fatal = match self {
            Self::Config(_)
            | Self::EnvironmentOpen(_)
            | Self::Migration(_)
            | Self::LockPoisoned => true,
            Self::Engine(e) => e.is_fatal(),
            Self::Environment(e) => e.is_fatal(),
            Self::Namespace(_) | Self::Codec(_) | Self::Io(_) | Self::ShutDown => false,
        };
        if fatal {
            Severity::Fatal
        } else {
            Severity::Recoverable
        }
    }

    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.severity(), Severity::Fatal)
    }
}

/// Apply the error policy to the outcome of a best-effort operation.
///
/// Recoverable errors are logged and turned into `None`; fatal errors are
/// passed on.
pub fn recoverable<T>(
    what: &str,
    result: Result<T, RegistryError>,
) -> Result<Option<T>, RegistryError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.severity() == Severity::Recoverable => {
            tracing::warn!("{what} failed: {e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Namespace(e) => write!(f, "{e}"),
            Self::Engine(e) => write!(f, "storage error: {e}"),
            Self::EnvironmentOpen(e) => write!(f, "failed to open environment: {e}"),
            Self::Environment(e) => write!(f, "{e}"),
            Self::Migration(e) => write!(f, "migration failed: {e}"),
            Self::Codec(e) => write!(f, "serialization error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::LockPoisoned => write!(f, "accessor lock poisoned"),
            Self::ShutDown => write!(f, "registry has been shut down"),
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Namespace(e) => Some(e),
            Self::Engine(e) => Some(e),
            Self::EnvironmentOpen(e) | Self::Environment(e) => Some(e),
            Self::Migration(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::LockPoisoned | Self::ShutDown => None,
        }
    }
}

impl From<ConfigError> for RegistryError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<NamespaceError> for RegistryError {
    fn from(e: NamespaceError) -> Self {
        Self::Namespace(e)
    }
}

impl From<EngineError> for RegistryError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl From<EnvironmentError> for RegistryError {
    fn from(e: EnvironmentError) -> Self {
        Self::Environment(e)
    }
}

impl From<MigrationError> for RegistryError {
    fn from(e: MigrationError) -> Self {
        Self::Migration(e)
    }
}

impl From<CodecError> for RegistryError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(CodecError::Json(e))
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_severity_classification() {
        assert!(RegistryError::EnvironmentOpen(EnvironmentError::Closed).is_fatal());
        assert!(!RegistryError::Environment(EnvironmentError::Closed).is_fatal());
        assert!(RegistryError::Environment(EnvironmentError::UnsupportedVersion(3)).is_fatal());
        assert!(RegistryError::Engine(EngineError::AlreadyExists(PathBuf::from("x"))).is_fatal());
        assert!(!RegistryError::Engine(EngineError::Closed).is_fatal());
        assert!(!RegistryError::Codec(CodecError::NotText).is_fatal());
        assert!(!RegistryError::ShutDown.is_fatal());
    }

    #[test]
    fn test_recoverable_policy() {
        let ok: Result<u32, RegistryError> = Ok(1);
        assert_eq!(recoverable("op", ok).unwrap(), Some(1));

        let soft: Result<u32, RegistryError> = Err(RegistryError::Environment(
            EnvironmentError::Io(std::io::Error::other("disk")),
        ));
        assert_eq!(recoverable("checkpoint", soft).unwrap(), None);

        let hard: Result<u32, RegistryError> = Err(RegistryError::LockPoisoned);
        assert!(recoverable("checkpoint", hard).is_err());
    }
}
