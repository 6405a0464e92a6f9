//! TOML-backed configuration loading (spec §6.3).
//!
//! The file format's top-level section name selects the application; the
//! well-known `app`, `logging`, and `network` subsections are reachable by
//! name, and anything else is reachable through a dot-path accessor. This
//! generalizes `mqk-config::load_layered_yaml`'s config-hash/canonical-JSON
//! pattern from YAML to TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Configuration error taxonomy (spec §7 "Configuration error").
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("application section '{0}' not found in config file")]
    MissingSection(String),
    #[error("key '{0}' not found")]
    MissingKey(String),
    #[error("key '{key}' has type {actual}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// The scalar value types the dot-path accessor supports (spec §6.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

fn toml_type_name(v: &toml::Value) -> &'static str {
    match v {
        toml::Value::String(_) => "string",
        toml::Value::Integer(_) => "integer",
        toml::Value::Float(_) => "float",
        toml::Value::Boolean(_) => "boolean",
        toml::Value::Datetime(_) => "datetime",
        toml::Value::Array(_) => "array",
        toml::Value::Table(_) => "table",
    }
}

/// A loaded, application-scoped configuration document.
#[derive(Debug, Clone)]
pub struct Config {
    app_name: String,
    selected: toml::Value,
}

impl Config {
    /// Parses `text` as TOML and selects the top-level section named
    /// `app_name`, per spec §6.3 ("Top-level section name selects the
    /// application").
    pub fn from_str(text: &str, app_name: &str) -> Result<Self, ConfigError> {
        let root: toml::Value = toml::from_str(text)?;
        let selected = root
            .get(app_name)
            .cloned()
            .ok_or_else(|| ConfigError::MissingSection(app_name.to_string()))?;
        Ok(Self {
            app_name: app_name.to_string(),
            selected,
        })
    }

    pub fn load(path: impl AsRef<Path>, app_name: &str) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&text, app_name)
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Known subsection lookup (`app`, `logging`, `network`, or any other
    /// top-level key within the selected application section).
    pub fn section(&self, name: &str) -> Option<&toml::Value> {
        self.selected.get(name)
    }

    /// Deserializes a named subsection into `T`, applying `T`'s `Default`
    /// via `#[serde(default)]` fields for anything the file omits.
    pub fn section_as<T: for<'de> Deserialize<'de> + Default>(&self, name: &str) -> Result<T, ConfigError> {
        match self.section(name) {
            Some(v) => Ok(v.clone().try_into()?),
            None => Ok(T::default()),
        }
    }

    fn navigate(&self, dot_path: &str) -> Option<&toml::Value> {
        let mut current = &self.selected;
        for part in dot_path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn get_string(&self, dot_path: &str) -> Option<String> {
        self.navigate(dot_path)?.as_str().map(|s| s.to_string())
    }

    pub fn get_int(&self, dot_path: &str) -> Option<i64> {
        self.navigate(dot_path)?.as_integer()
    }

    pub fn get_float(&self, dot_path: &str) -> Option<f64> {
        self.navigate(dot_path)?.as_float()
    }

    pub fn get_bool(&self, dot_path: &str) -> Option<bool> {
        self.navigate(dot_path)?.as_bool()
    }

    /// Typed accessor mirroring the four dot-path value kinds (spec §6.3).
    pub fn get(&self, dot_path: &str) -> Result<ConfigValue, ConfigError> {
        let v = self
            .navigate(dot_path)
            .ok_or_else(|| ConfigError::MissingKey(dot_path.to_string()))?;
        match v {
            toml::Value::String(s) => Ok(ConfigValue::String(s.clone())),
            toml::Value::Integer(i) => Ok(ConfigValue::Int(*i)),
            toml::Value::Float(f) => Ok(ConfigValue::Float(*f)),
            toml::Value::Boolean(b) => Ok(ConfigValue::Bool(*b)),
            other => Err(ConfigError::TypeMismatch {
                key: dot_path.to_string(),
                expected: "string|integer|float|boolean",
                actual: toml_type_name(other),
            }),
        }
    }

    /// Applies a CLI-style override (`--key=value` parsed elsewhere) onto a
    /// dot path, creating intermediate tables as needed. Used by the
    /// Application core's "apply overrides" lifecycle step (spec §4.F).
    pub fn set_override(&mut self, dot_path: &str, value: ConfigValue) {
        let toml_value = match value {
            ConfigValue::String(s) => toml::Value::String(s),
            ConfigValue::Int(i) => toml::Value::Integer(i),
            ConfigValue::Float(f) => toml::Value::Float(f),
            ConfigValue::Bool(b) => toml::Value::Boolean(b),
        };
        let parts: Vec<&str> = dot_path.split('.').collect();
        set_nested(&mut self.selected, &parts, toml_value);
    }

    /// Canonical JSON of the selected section (`serde_json::Value` maps
    /// keys are a `BTreeMap`, so field order is always sorted — this is
    /// what makes the hash stable across re-serialization).
    pub fn canonical_json(&self) -> serde_json::Value {
        // Round-trip through serde_json::Value for a stable, sorted-key form.
        let as_json: serde_json::Value = serde_json::to_value(&self.selected)
            .unwrap_or(serde_json::Value::Null);
        as_json
    }

    pub fn canonical_json_string(&self) -> String {
        serde_json::to_string(&self.canonical_json()).unwrap_or_default()
    }

    /// SHA-256 hex digest of the canonical JSON, for the `config-hash`
    /// CLI command and for audit trails (grounded on `mqk-config`'s
    /// config-hash pattern, generalized from YAML to TOML).
    pub fn config_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn set_nested(value: &mut toml::Value, parts: &[&str], leaf: toml::Value) {
    if !value.is_table() {
        *value = toml::Value::Table(Default::default());
    }
    let table = value.as_table_mut().expect("just coerced to table");
    if parts.len() == 1 {
        table.insert(parts[0].to_string(), leaf);
        return;
    }
    let entry = table
        .entry(parts[0].to_string())
        .or_insert_with(|| toml::Value::Table(Default::default()));
    set_nested(entry, &parts[1..], leaf);
}
