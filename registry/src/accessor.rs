//! Per-namespace accessor.
//!
//! An [`Accessor`] maps application values to the bytes stored in one
//! namespace file and back. It owns the value policy of its namespace:
//!
//! - a [`Codec`] (JSON unless reconfigured),
//! - a default value returned for missing keys,
//! - a recovery callback consulted when stored bytes fail to decode.
//!
//! The backing engine is opened on first use. Until the namespace file
//! exists, the accessor behaves as an empty store: reads return the default
//! and nothing is created on disk. The first write creates the file and any
//! missing parent directories.
//!
//! A value that fails to decode is never repaired. The recovery callback
//! gets the raw bytes and may supply a substitute; otherwise the default is
//! returned. The bytes stay on disk as they were.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec::{Codec, JsonCodec, RawCodec, Value};
use crate::error::RegistryError;
use crate::namespace_registry::Shared;
use crate::storage::{Engine, EngineError, EngineKind, StorageEngine};

/// Callback that turns the raw bytes of an undecodable value into a
/// substitute. Returning `None` falls back to the default.
pub type RecoveryFn = Box<dyn Fn(&[u8]) -> Option<Value> + Send + Sync>;

type RecoveryRef<'a> = &'a (dyn Fn(&[u8]) -> Option<Value> + Send + Sync);

/// Restricts a traversal to some keys.
#[derive(Debug, Clone)]
pub enum KeyFilter {
    /// Keys starting with the prefix. Matched case-insensitively on tree
    /// engines and byte-exact on hash engines.
    Prefix(String),
    /// Keys matching the pattern anywhere.
    Pattern(Regex),
}

impl KeyFilter {
    #[must_use]
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Pattern)
    }

    /// The part of the filter the engine can apply itself.
    fn engine_prefix(&self) -> Option<&[u8]> {
        match self {
            Self::Prefix(prefix) => Some(prefix.as_bytes()),
            Self::Pattern(_) => None,
        }
    }

    fn matches(&self, key: &str) -> bool {
        match self {
            Self::Prefix(_) => true,
            Self::Pattern(pattern) => pattern.is_match(key),
        }
    }
}

struct AccessorState {
    engine: Option<Engine>,
    codec: Box<dyn Codec>,
    default: Option<Value>,
    recovery: Option<RecoveryFn>,
}

/// Decoding rules of one accessor, borrowed for the length of a call.
struct ValuePolicy<'a> {
    namespace: &'a str,
    codec: &'a dyn Codec,
    default: Option<&'a Value>,
    recovery: Option<RecoveryRef<'a>>,
}

impl ValuePolicy<'_> {
    /// A fresh copy of the default, `null` if none is set.
    fn default_value(&self) -> Value {
        self.default.cloned().unwrap_or(Value::Null)
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, RegistryError> {
        Ok(self.codec.encode(value)?)
    }

    fn decode(&self, key: &str, bytes: &[u8]) -> Value {
        let error = match self.codec.decode(bytes) {
            Ok(value) => return value,
            Err(e) => e,
        };
        tracing::warn!(
            namespace = self.namespace,
            key,
            codec = self.codec.name(),
            len = bytes.len(),
            "failed to decode stored value: {error}"
        );

        match self.recovery.and_then(|recover| recover(bytes)) {
            Some(value) => {
                tracing::debug!(namespace = self.namespace, key, "recovered stored value");
                value
            }
            None => self.default_value(),
        }
    }
}

/// Namespaced view over one engine file.
///
/// Accessors are handed out by
/// [`NamespaceRegistry::accessor`](crate::NamespaceRegistry::accessor), one
/// per namespace. Every method takes `&self`; calls are serialized by an
/// internal lock.
pub struct Accessor {
    name: String,
    path: PathBuf,
    kind: EngineKind,
    registry: Weak<Shared>,
    state: Mutex<AccessorState>,
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Accessor {
    pub(crate) fn new(name: String, path: PathBuf, kind: EngineKind, registry: Weak<Shared>) -> Self {
        Self {
            name,
            path,
            kind,
            registry,
            state: Mutex::new(AccessorState {
                engine: None,
                codec: Box::new(JsonCodec),
                default: None,
                recovery: None,
            }),
        }
    }

    /// Normalized namespace name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the namespace file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn kind(&self) -> EngineKind {
        self.kind
    }

    fn lock(&self) -> Result<MutexGuard<'_, AccessorState>, RegistryError> {
        self.state.lock().map_err(|_| RegistryError::LockPoisoned)
    }

    fn registry(&self) -> Result<Arc<Shared>, RegistryError> {
        self.registry
            .upgrade()
            .filter(|registry| !registry.is_shut_down())
            .ok_or(RegistryError::ShutDown)
    }

    /// Open the engine unless it is open already. Without `create`, a
    /// missing namespace file leaves the engine closed.
    fn ensure_engine(&self, state: &mut AccessorState, create: bool) -> Result<(), RegistryError> {
        if state.engine.as_ref().is_some_and(|engine| !engine.is_closed()) {
            return Ok(());
        }
        state.engine = None;
        if !create && !self.path.exists() {
            return Ok(());
        }

        let registry = self.registry()?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let env = if self.kind.needs_environment() {
            Some(registry.environment()?)
        } else {
            None
        };
        let engine = Engine::open_or_create(
            self.kind,
            &self.path,
            env.as_ref(),
            registry.config().checkpoint,
        )?;

        tracing::debug!(
            namespace = %self.name,
            path = %self.path.display(),
            engine = %engine.kind(),
            "opened namespace file"
        );
        state.engine = Some(engine);
        Ok(())
    }

    /// Run `f` with the engine (if the file exists or `create` is set) and
    /// the value policy.
    fn with_engine<T>(
        &self,
        create: bool,
        f: impl FnOnce(Option<&mut Engine>, &ValuePolicy<'_>) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let mut guard = self.lock()?;
        self.ensure_engine(&mut guard, create)?;
        let AccessorState {
            engine,
            codec,
            default,
            recovery,
        } = &mut *guard;
        let policy = ValuePolicy {
            namespace: &self.name,
            codec: &**codec,
            default: default.as_ref(),
            recovery: recovery.as_deref(),
        };
        f(engine.as_mut(), &policy)
    }

    /// Visit entries in engine order until `visit` breaks.
    fn traverse(
        &self,
        filter: Option<&KeyFilter>,
        mut visit: impl FnMut(&str, &[u8], &ValuePolicy<'_>) -> ControlFlow<()>,
    ) -> Result<(), RegistryError> {
        self.with_engine(false, |engine, policy| {
            let Some(engine) = engine else {
                return Ok(());
            };
            for (key, bytes) in engine.each(filter.and_then(KeyFilter::engine_prefix))? {
                let key = String::from_utf8_lossy(key);
                if filter.is_some_and(|filter| !filter.matches(&key)) {
                    continue;
                }
                if visit(&key, bytes, policy).is_break() {
                    break;
                }
            }
            Ok(())
        })
    }

    /// The value stored under `key`, or the default.
    pub fn get(&self, key: &str) -> Result<Value, RegistryError> {
        self.with_engine(false, |engine, policy| {
            let stored = match engine {
                Some(engine) => engine.get(key.as_bytes())?,
                None => None,
            };
            Ok(stored.map_or_else(|| policy.default_value(), |bytes| policy.decode(key, &bytes)))
        })
    }

    /// Store `value` under `key`, creating the namespace file if needed.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), RegistryError> {
        let value = value.into();
        self.with_engine(true, |engine, policy| {
            let engine = engine.ok_or(RegistryError::Engine(EngineError::Closed))?;
            engine.put(key.as_bytes(), &policy.encode(&value)?)?;
            Ok(())
        })
    }

    /// Remove `key`, returning its previous value or the default.
    pub fn delete(&self, key: &str) -> Result<Value, RegistryError> {
        self.with_engine(false, |engine, policy| {
            let Some(engine) = engine else {
                return Ok(policy.default_value());
            };
            let Some(bytes) = engine.get(key.as_bytes())? else {
                return Ok(policy.default_value());
            };
            let previous = policy.decode(key, &bytes);
            engine.delete(key.as_bytes())?;
            Ok(previous)
        })
    }

    /// Call `f` for every entry, in engine order.
    ///
    /// The accessor stays locked while `f` runs, so `f` must not call back
    /// into the same accessor.
    pub fn each(
        &self,
        filter: Option<&KeyFilter>,
        mut f: impl FnMut(&str, Value),
    ) -> Result<(), RegistryError> {
        self.traverse(filter, |key, bytes, policy| {
            f(key, policy.decode(key, bytes));
            ControlFlow::Continue(())
        })
    }

    /// Call `f` for every distinct key, without decoding values.
    pub fn each_key(
        &self,
        filter: Option<&KeyFilter>,
        mut f: impl FnMut(&str),
    ) -> Result<(), RegistryError> {
        let mut last: Option<String> = None;
        self.traverse(filter, |key, _, _| {
            if last.as_deref() != Some(key) {
                f(key);
                last = Some(key.to_string());
            }
            ControlFlow::Continue(())
        })
    }

    pub fn each_value(
        &self,
        filter: Option<&KeyFilter>,
        mut f: impl FnMut(Value),
    ) -> Result<(), RegistryError> {
        self.traverse(filter, |key, bytes, policy| {
            f(policy.decode(key, bytes));
            ControlFlow::Continue(())
        })
    }

    pub fn has_key(&self, key: &str) -> Result<bool, RegistryError> {
        self.with_engine(false, |engine, _| match engine {
            Some(engine) => Ok(engine.has_key(key.as_bytes())?),
            None => Ok(false),
        })
    }

    /// Linear scan for an entry whose value equals `value`.
    pub fn has_value(&self, value: &Value) -> Result<bool, RegistryError> {
        Ok(self.index_of(value)?.is_some())
    }

    /// Whether `key` holds `value` (any of its values, for duplicate keys).
    pub fn has_pair(&self, key: &str, value: &Value) -> Result<bool, RegistryError> {
        self.with_engine(false, |engine, policy| {
            let Some(engine) = engine else {
                return Ok(false);
            };
            let stored = match engine.as_tree() {
                Some(tree) => tree.getlist(key.as_bytes())?,
                None => engine.get(key.as_bytes())?.into_iter().collect(),
            };
            Ok(stored
                .iter()
                .any(|bytes| policy.decode(key, bytes) == *value))
        })
    }

    /// The first key, in engine order, whose value equals `value`.
    pub fn index_of(&self, value: &Value) -> Result<Option<String>, RegistryError> {
        let mut found = None;
        self.traverse(None, |key, bytes, policy| {
            if policy.decode(key, bytes) == *value {
                found = Some(key.to_string());
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        Ok(found)
    }

    /// Distinct keys, in engine order.
    pub fn keys(&self) -> Result<Vec<String>, RegistryError> {
        self.with_engine(false, |engine, _| {
            let Some(engine) = engine else {
                return Ok(Vec::new());
            };
            Ok(engine
                .keys()?
                .into_iter()
                .map(|key| String::from_utf8_lossy(&key).into_owned())
                .collect())
        })
    }

    pub fn values(&self) -> Result<Vec<Value>, RegistryError> {
        let mut values = Vec::new();
        self.each_value(None, |value| values.push(value))?;
        Ok(values)
    }

    /// Every entry as a `(key, value)` pair, in engine order.
    pub fn to_pairs(&self) -> Result<Vec<(String, Value)>, RegistryError> {
        let mut pairs = Vec::new();
        self.each(None, |key, value| pairs.push((key.to_string(), value)))?;
        Ok(pairs)
    }

    /// Every entry as a map. For duplicate keys the first value wins, as in
    /// [`get`](Self::get).
    pub fn to_mapping(&self) -> Result<BTreeMap<String, Value>, RegistryError> {
        let mut mapping = BTreeMap::new();
        self.each(None, |key, value| {
            mapping.entry(key.to_string()).or_insert(value);
        })?;
        Ok(mapping)
    }

    /// Remove every entry, keeping the namespace file.
    pub fn clear(&self) -> Result<(), RegistryError> {
        self.with_engine(false, |engine, _| {
            if let Some(engine) = engine {
                engine.clear()?;
            }
            Ok(())
        })
    }

    /// Number of distinct keys.
    pub fn length(&self) -> Result<usize, RegistryError> {
        self.with_engine(false, |engine, _| match engine {
            Some(engine) => Ok(engine.len()?),
            None => Ok(0),
        })
    }

    pub fn is_empty(&self) -> Result<bool, RegistryError> {
        Ok(self.length()? == 0)
    }

    /// Accessor for `<name>/<suffix>`.
    ///
    /// The child has its own file and its own configuration; the default,
    /// recovery callback and codec of this accessor are not inherited.
    pub fn sub_namespace(&self, suffix: &str) -> Result<Arc<Self>, RegistryError> {
        self.registry()?
            .accessor(&format!("{}/{suffix}", self.name))
    }

    /// Value returned for missing keys (and undecodable ones without a
    /// recovery result). Each lookup gets its own copy.
    pub fn set_default(&self, value: impl Into<Value>) -> Result<(), RegistryError> {
        self.lock()?.default = Some(value.into());
        Ok(())
    }

    pub fn set_recovery(
        &self,
        recovery: impl Fn(&[u8]) -> Option<Value> + Send + Sync + 'static,
    ) -> Result<(), RegistryError> {
        self.lock()?.recovery = Some(Box::new(recovery));
        Ok(())
    }

    pub fn set_codec(&self, codec: impl Codec + 'static) -> Result<(), RegistryError> {
        self.lock()?.codec = Box::new(codec);
        Ok(())
    }

    /// Store strings as their raw UTF-8 bytes.
    pub fn use_raw_strings(&self) -> Result<(), RegistryError> {
        self.set_codec(RawCodec)
    }

    /// [`get`](Self::get) converted into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, RegistryError> {
        Ok(serde_json::from_value(self.get(key)?)?)
    }

    /// [`set`](Self::set) from any serializable value.
    pub fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), RegistryError> {
        self.set(key, serde_json::to_value(value)?)
    }

    /// Make every write durable in the namespace file.
    pub fn flush(&self) -> Result<(), RegistryError> {
        let mut state = self.lock()?;
        if let Some(engine) = state.engine.as_mut() {
            engine.flush()?;
        }
        Ok(())
    }

    /// Close the namespace file. The next call reopens it.
    pub fn close(&self) -> Result<(), RegistryError> {
        let engine = self.lock()?.engine.take();
        if let Some(mut engine) = engine {
            engine.close()?;
            tracing::debug!(namespace = %self.name, "closed namespace file");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::namespace_registry::NamespaceRegistry;
    use serde::Deserialize;
    use serde_json::json;
    use tempfile::{TempDir, tempdir};

    fn registry(engine: EngineKind) -> (TempDir, NamespaceRegistry) {
        let dir = tempdir().expect("create temp dir");
        let mut config = RegistryConfig::with_root(dir.path());
        config.engine = engine;
        let registry = NamespaceRegistry::new(config);
        (dir, registry)
    }

    #[test]
    fn test_missing_file_behaves_as_empty() {
        let (_dir, registry) = registry(EngineKind::Tree);
        let accessor = registry.accessor("untouched").unwrap();
        accessor.set_default(json!({"fallback": true})).unwrap();

        assert_eq!(accessor.get("k").unwrap(), json!({"fallback": true}));
        assert_eq!(accessor.delete("k").unwrap(), json!({"fallback": true}));
        assert!(!accessor.has_key("k").unwrap());
        assert!(!accessor.has_pair("k", &json!(1)).unwrap());
        assert!(accessor.keys().unwrap().is_empty());
        assert!(accessor.is_empty().unwrap());
        accessor.clear().unwrap();
        accessor.flush().unwrap();

        assert!(!accessor.path().exists());
        assert!(registry.stats().is_none());
    }

    #[test]
    fn test_set_creates_nested_file() {
        let (_dir, registry) = registry(EngineKind::Tree);
        let accessor = registry.accessor("game/scores").unwrap();
        accessor.set("alice", 10).unwrap();

        assert!(accessor.path().exists());
        assert!(accessor.path().ends_with("registry/game/scores.tdb"));
        assert_eq!(accessor.get("alice").unwrap(), json!(10));
    }

    #[test]
    fn test_default_is_copied_per_lookup() {
        let (_dir, registry) = registry(EngineKind::Hash);
        let accessor = registry.accessor("defaults").unwrap();
        accessor.set_default(json!({"items": []})).unwrap();

        let mut first = accessor.get("a").unwrap();
        first["items"]
            .as_array_mut()
            .expect("items is an array")
            .push(json!(1));
        assert_eq!(accessor.get("b").unwrap(), json!({"items": []}));
    }

    #[test]
    fn test_delete_returns_previous_value() {
        let (_dir, registry) = registry(EngineKind::Tree);
        let accessor = registry.accessor("ns").unwrap();
        accessor.set("k", "v").unwrap();

        assert_eq!(accessor.delete("k").unwrap(), json!("v"));
        assert_eq!(accessor.delete("k").unwrap(), Value::Null);
        assert_eq!(accessor.length().unwrap(), 0);
    }

    #[test]
    fn test_queries() {
        for kind in [EngineKind::Hash, EngineKind::Tree] {
            let (_dir, registry) = registry(kind);
            let accessor = registry.accessor("cities").unwrap();
            accessor.set("london", json!({"temp": 15})).unwrap();
            accessor.set("paris", json!({"temp": 18})).unwrap();
            accessor.set("lisbon", json!({"temp": 22})).unwrap();

            assert!(accessor.has_key("paris").unwrap());
            assert!(accessor.has_value(&json!({"temp": 18})).unwrap());
            assert!(!accessor.has_value(&json!({"temp": 99})).unwrap());
            assert!(accessor.has_pair("london", &json!({"temp": 15})).unwrap());
            assert!(!accessor.has_pair("london", &json!({"temp": 18})).unwrap());
            assert_eq!(
                accessor.index_of(&json!({"temp": 22})).unwrap(),
                Some("lisbon".to_string())
            );
            assert_eq!(accessor.index_of(&json!(0)).unwrap(), None);
            assert_eq!(accessor.length().unwrap(), 3);

            let mapping = accessor.to_mapping().unwrap();
            assert_eq!(mapping.len(), 3);
            assert_eq!(mapping["paris"], json!({"temp": 18}));

            let mut values = accessor.values().unwrap();
            values.sort_by_key(|v| v["temp"].as_i64());
            assert_eq!(values[0], json!({"temp": 15}));

            accessor.clear().unwrap();
            assert!(accessor.is_empty().unwrap());
            assert!(accessor.path().exists());
        }
    }

    #[test]
    fn test_tree_keys_are_ordered_case_insensitively() {
        let (_dir, registry) = registry(EngineKind::Tree);
        let accessor = registry.accessor("ordered").unwrap();
        for key in ["banana", "Apple", "cherry", "apricot"] {
            accessor.set(key, key).unwrap();
        }

        assert_eq!(
            accessor.keys().unwrap(),
            vec!["Apple", "apricot", "banana", "cherry"]
        );
        assert_eq!(accessor.get("APPLE").unwrap(), json!("Apple"));

        let pairs = accessor.to_pairs().unwrap();
        assert_eq!(pairs[0], ("Apple".to_string(), json!("Apple")));
    }

    #[test]
    fn test_filters() {
        let (_dir, registry) = registry(EngineKind::Tree);
        let accessor = registry.accessor("filtered").unwrap();
        for (key, value) in [("user:1", 1), ("User:2", 2), ("group:1", 3), ("user:10", 4)] {
            accessor.set(key, value).unwrap();
        }

        let mut keys = Vec::new();
        accessor
            .each_key(Some(&KeyFilter::prefix("user:")), |key| keys.push(key.to_string()))
            .unwrap();
        assert_eq!(keys, vec!["user:1", "user:10", "User:2"]);

        let mut values = Vec::new();
        let pattern = KeyFilter::pattern(r":1\d*$").unwrap();
        accessor
            .each_value(Some(&pattern), |value| values.push(value))
            .unwrap();
        assert_eq!(values, vec![json!(3), json!(1), json!(4)]);

        let mut seen = 0;
        accessor
            .each(Some(&KeyFilter::prefix("group")), |key, value| {
                assert_eq!(key, "group:1");
                assert_eq!(value, json!(3));
                seen += 1;
            })
            .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_hash_prefix_is_exact() {
        let (_dir, registry) = registry(EngineKind::Hash);
        let accessor = registry.accessor("hashed").unwrap();
        accessor.set("user:1", 1).unwrap();
        accessor.set("User:2", 2).unwrap();

        let mut keys = Vec::new();
        accessor
            .each_key(Some(&KeyFilter::prefix("user:")), |key| keys.push(key.to_string()))
            .unwrap();
        assert_eq!(keys, vec!["user:1"]);
    }

    #[test]
    fn test_raw_strings() {
        let (_dir, registry) = registry(EngineKind::Tree);
        let accessor = registry.accessor("text").unwrap();
        accessor.use_raw_strings().unwrap();

        accessor.set("greeting", "hello").unwrap();
        assert_eq!(accessor.get("greeting").unwrap(), json!("hello"));
        assert!(matches!(
            accessor.set("number", 5),
            Err(RegistryError::Codec(_))
        ));
    }

    #[test]
    fn test_recovery_receives_raw_bytes() {
        let (_dir, registry) = registry(EngineKind::Tree);
        let accessor = registry.accessor("legacy").unwrap();
        accessor.use_raw_strings().unwrap();
        accessor.set("plain", "not json").unwrap();

        accessor.set_codec(JsonCodec).unwrap();
        accessor.set_default("default").unwrap();
        assert_eq!(accessor.get("plain").unwrap(), json!("default"));

        accessor
            .set_recovery(|bytes| Some(json!({"raw": String::from_utf8_lossy(bytes)})))
            .unwrap();
        assert_eq!(accessor.get("plain").unwrap(), json!({"raw": "not json"}));

        accessor.set_recovery(|_| None).unwrap();
        assert_eq!(accessor.get("plain").unwrap(), json!("default"));
    }

    #[test]
    fn test_typed_helpers() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Reading {
            temp: i32,
            unit: String,
        }

        let (_dir, registry) = registry(EngineKind::Tree);
        let accessor = registry.accessor("weather").unwrap();
        let reading = Reading {
            temp: 15,
            unit: "C".to_string(),
        };
        accessor.set_as("london", &reading).unwrap();

        assert_eq!(accessor.get_as::<Reading>("london").unwrap(), reading);
        assert_eq!(accessor.get_as::<Option<Reading>>("paris").unwrap(), None);
        assert!(accessor.get_as::<Reading>("paris").is_err());
    }

    #[test]
    fn test_close_and_reopen() {
        let (_dir, registry) = registry(EngineKind::Tree);
        let accessor = registry.accessor("reopen").unwrap();
        accessor.set("k", 1).unwrap();
        accessor.close().unwrap();
        accessor.close().unwrap();

        assert_eq!(accessor.get("k").unwrap(), json!(1));
    }

    #[test]
    fn test_sub_namespace_does_not_inherit_configuration() {
        let (_dir, registry) = registry(EngineKind::Tree);
        let parent = registry.accessor("parent").unwrap();
        parent.set_default("parent default").unwrap();

        let child = parent.sub_namespace("Child").unwrap();
        assert_eq!(child.name(), "parent/child");
        assert_eq!(child.get("missing").unwrap(), Value::Null);

        child.set("k", 1).unwrap();
        assert!(!parent.has_key("k").unwrap());
        assert!(!parent.path().exists());
    }
}
