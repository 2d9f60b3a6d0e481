//! Nested experiment configuration.
//!
//! A [`ConfigDict`] is built once per run by one of the registered config
//! builders, locked, optionally overridden from the command line, and then
//! consumed by the training driver. Lookups of unknown keys fail loudly.

mod args;
mod steps;
mod value;

pub use args::{parse_arg, parse_typed};
pub use steps::get_steps;
pub use value::ConfigValue;

use std::fmt;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::error::{BigVisionError, Result};
use crate::utils::io;

/// Insertion-ordered mapping from keys to [`ConfigValue`]s.
#[derive(Debug, Clone, Default)]
pub struct ConfigDict {
    entries: Vec<(String, ConfigValue)>,
    locked: bool,
}

impl ConfigDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an unlocked dict from `(key, value)` pairs.
    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, ConfigValue)>,
    {
        let mut dict = Self::new();
        for (key, value) in pairs {
            dict.insert(key.into(), value);
        }
        dict
    }

    fn insert(&mut self, key: String, value: ConfigValue) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Direct child lookup; a missing key is an error.
    pub fn get(&self, key: &str) -> Result<&ConfigValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .ok_or_else(|| BigVisionError::MissingKey(key.to_string()))
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut ConfigValue> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Inserts or replaces a direct child. Adding a new key to a locked dict
    /// is an error.
    pub fn set(&mut self, key: &str, value: impl Into<ConfigValue>) -> Result<()> {
        if self.locked && !self.contains(key) {
            return Err(BigVisionError::Locked(key.to_string()));
        }
        self.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Freezes the key set of this dict and every nested dict.
    pub fn lock(&mut self) {
        self.locked = true;
        for (_, value) in self.entries.iter_mut() {
            lock_value(value);
        }
    }

    pub fn locked(mut self) -> Self {
        self.lock();
        self
    }

    /// Dotted lookup, e.g. `"val.split"`.
    pub fn get_path(&self, path: &str) -> Result<&ConfigValue> {
        let mut current = self;
        let mut parts = path.split('.').peekable();
        while let Some(part) = parts.next() {
            let value = current
                .get(part)
                .map_err(|_| BigVisionError::MissingKey(path.to_string()))?;
            if parts.peek().is_none() {
                return Ok(value);
            }
            current = value.as_dict().ok_or_else(|| BigVisionError::TypeMismatch {
                key: path.to_string(),
                expected: "dict",
                found: value.type_name(),
            })?;
        }
        Err(BigVisionError::MissingKey(path.to_string()))
    }

    /// Dotted assignment. Intermediate dicts must already exist.
    pub fn set_path(&mut self, path: &str, value: impl Into<ConfigValue>) -> Result<()> {
        let (parent, leaf) = match path.rsplit_once('.') {
            Some((parent, leaf)) => (Some(parent), leaf),
            None => (None, path),
        };
        let target = match parent {
            Some(parent) => self.dict_at_mut(parent, path)?,
            None => self,
        };
        target.set(leaf, value).map_err(|e| match e {
            BigVisionError::Locked(_) => BigVisionError::Locked(path.to_string()),
            other => other,
        })
    }

    fn dict_at_mut(&mut self, parent: &str, full: &str) -> Result<&mut ConfigDict> {
        let mut current = self;
        for part in parent.split('.') {
            let value = current
                .get_mut(part)
                .ok_or_else(|| BigVisionError::MissingKey(full.to_string()))?;
            let found = value.type_name();
            current = match value {
                ConfigValue::Dict(d) => d,
                _ => {
                    return Err(BigVisionError::TypeMismatch {
                        key: full.to_string(),
                        expected: "dict",
                        found,
                    })
                }
            };
        }
        Ok(current)
    }

    /// Applies a command-line override. The existing value's type decides
    /// how `raw` is parsed.
    pub fn override_path(&mut self, path: &str, raw: &str) -> Result<()> {
        let current = self.get_path(path)?;
        let parsed = parse_typed(current, raw, path)?;
        debug!(path, value = %parsed, "config override");
        self.set_path(path, parsed)
    }

    /// Applies a `key=value` override string.
    pub fn apply_override(&mut self, assignment: &str) -> Result<()> {
        let (path, raw) = assignment.split_once('=').ok_or_else(|| {
            BigVisionError::InvalidArgument(format!("expected key=value, got `{}`", assignment))
        })?;
        self.override_path(path.trim(), raw.trim())
    }

    pub fn get_str(&self, path: &str) -> Result<&str> {
        let value = self.get_path(path)?;
        value.as_str().ok_or_else(|| mismatch(path, "str", value))
    }

    pub fn get_int(&self, path: &str) -> Result<i64> {
        let value = self.get_path(path)?;
        value.as_int().ok_or_else(|| mismatch(path, "int", value))
    }

    pub fn get_float(&self, path: &str) -> Result<f64> {
        let value = self.get_path(path)?;
        value.as_float().ok_or_else(|| mismatch(path, "float", value))
    }

    pub fn get_bool(&self, path: &str) -> Result<bool> {
        let value = self.get_path(path)?;
        value.as_bool().ok_or_else(|| mismatch(path, "bool", value))
    }

    pub fn get_list(&self, path: &str) -> Result<&[ConfigValue]> {
        let value = self.get_path(path)?;
        value.as_list().ok_or_else(|| mismatch(path, "list", value))
    }

    pub fn get_dict(&self, path: &str) -> Result<&ConfigDict> {
        let value = self.get_path(path)?;
        value.as_dict().ok_or_else(|| mismatch(path, "dict", value))
    }

    /// Like [`get_path`](Self::get_path) but `None` for a missing key.
    pub fn get_opt(&self, path: &str) -> Option<&ConfigValue> {
        self.get_path(path).ok()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a JSON config file. The result is locked.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = io::read_to_string(path)?;
        Ok(Self::from_json_str(&text)?.locked())
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        io::write_string(path, self.to_json_pretty()?)
    }
}

fn lock_value(value: &mut ConfigValue) {
    match value {
        ConfigValue::Dict(d) => d.lock(),
        ConfigValue::List(items) => items.iter_mut().for_each(lock_value),
        _ => {}
    }
}

fn mismatch(path: &str, expected: &'static str, value: &ConfigValue) -> BigVisionError {
    BigVisionError::TypeMismatch {
        key: path.to_string(),
        expected,
        found: value.type_name(),
    }
}

/// Key order is not significant for equality.
impl PartialEq for ConfigDict {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.get(k).map_or(false, |o| o == v))
    }
}

impl Serialize for ConfigDict {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ConfigDict {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct DictVisitor;

        impl<'de> Visitor<'de> for DictVisitor {
            type Value = ConfigDict;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a map of config values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut dict = ConfigDict::new();
                while let Some((key, value)) = access.next_entry::<String, ConfigValue>()? {
                    dict.insert(key, value);
                }
                Ok(dict)
            }
        }

        deserializer.deserialize_map(DictVisitor)
    }
}
