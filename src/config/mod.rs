use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::env;
use std::sync::Arc;

/// Process-wide configuration service.
///
/// Snapshots the environment at startup into a string store. Values set
/// programmatically override the snapshot; `set_default` fills gaps without
/// clobbering existing entries.
#[derive(Clone, Default)]
pub struct ConfigService {
    config: Arc<DashMap<String, String>>,
}

impl ConfigService {
    pub fn new() -> Self {
        let service = Self::default();
        for (key, value) in env::vars() {
            service.set(&key, &value);
        }
        service
    }

    /// An empty service, ignoring the environment. Useful in tests.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| v.clone())
    }

    /// Typed accessor: parses the raw string as JSON first, falling back to
    /// treating it as a plain string. `get_as::<u16>("PORT")` parses
    /// `"8080"`, `get_as::<String>` returns the value verbatim.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        serde_json::from_str(&raw)
            .ok()
            .or_else(|| serde_json::from_value(Value::String(raw)).ok())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    /// Set `key` only if it has no value yet.
    pub fn set_default(&self, key: &str, value: &str) {
        self.config
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.config.contains_key(key)
    }

    /// Debug flag, read from `TRELLIS_DEBUG`.
    pub fn is_debug(&self) -> bool {
        self.get_as::<bool>("TRELLIS_DEBUG").unwrap_or(false)
    }
}
