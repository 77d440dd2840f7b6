// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, BTreeSet, HashMap};

use thiserror::Error;

use crate::configuration::sources::{CompositeSource, ConfigKey, ConfigSourceOrigin};
use crate::configuration::value::{float_to_i64, Value};
use crate::{dd_debug, dd_warn};

/// Converts the raw string of an environment variable into a structured value.
///
/// Transforms are total: on malformed input they log and return a fallback value.
pub type EnvTransform = Box<dyn Fn(&str) -> Value + Send + Sync>;

/// Shape of a declared key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Scalar,
    /// Declared with a `.*` suffix, the key holds a map with arbitrary sub-keys
    Mapping,
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("unknown configuration keys: {}", .0.join(", "))]
    UnknownKeys(Vec<String>),
}

/// A raw value that could not be converted to the type of its key
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{key}: can not parse {value:?} from {name} as {desired_type}: {message}")]
pub struct ResolveError {
    pub key: String,
    pub name: String,
    pub value: String,
    pub desired_type: &'static str,
    pub message: String,
}

#[derive(Debug, Default)]
struct Binding {
    default: Option<Value>,
    env_names: Vec<String>,
}

/// Declares the known configuration keys, their defaults and the environment variables they
/// are read from.
///
/// The registry is populated once, then [`Registry::resolve`] snapshots the values of every key
/// into a [`ResolvedConfig`].
#[derive(Default)]
pub struct Registry {
    known: BTreeMap<String, KeyKind>,
    bindings: BTreeMap<String, Binding>,
    transforms: HashMap<String, EnvTransform>,
    file_values: BTreeMap<String, Value>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("known", &self.known)
            .field("bindings", &self.bindings)
            .field(
                "transforms",
                &self.transforms.keys().collect::<BTreeSet<_>>(),
            )
            .field("file_values", &self.file_values)
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a key as known. A `.*` suffix declares the whole sub-tree under the key.
    pub fn set_known(&mut self, key: &str) {
        match key.strip_suffix(".*") {
            Some(base) => self.known.insert(base.to_string(), KeyKind::Mapping),
            None => self.known.insert(key.to_string(), KeyKind::Scalar),
        };
    }

    /// Binds a key to a default value and to environment variables. The first variable that is
    /// set wins.
    pub fn bind_env_and_set_default(
        &mut self,
        key: &str,
        default: impl Into<Value>,
        env_names: &[&str],
    ) {
        self.bind(key, Some(default.into()), env_names);
    }

    /// Binds a key to environment variables, without default value
    pub fn bind_env(&mut self, key: &str, env_names: &[&str]) {
        self.bind(key, None, env_names);
    }

    fn bind(&mut self, key: &str, default: Option<Value>, env_names: &[&str]) {
        if !self.is_known(key) {
            dd_warn!("Configuration key {key} is bound but was never declared");
        }
        let binding = Binding {
            default,
            env_names: env_names.iter().map(|s| s.to_string()).collect(),
        };
        if self.bindings.insert(key.to_string(), binding).is_some() {
            dd_debug!("Configuration key {key} was bound twice, keeping the last binding");
        }
    }

    /// Registers the function converting the environment value of `key`.
    ///
    /// It is not applied to file values nor to defaults.
    pub fn set_env_key_transformer<F>(&mut self, key: &str, transform: F)
    where
        F: Fn(&str) -> Value + Send + Sync + 'static,
    {
        self.transforms.insert(key.to_string(), Box::new(transform));
    }

    /// Sets a value read from the configuration file. Sub-keys of a wildcard key are gathered
    /// into the map of that key.
    pub fn set_file_value(&mut self, key: &str, value: impl Into<Value>) {
        self.file_values.insert(key.to_string(), value.into());
    }

    pub fn key_kind(&self, key: &str) -> Option<KeyKind> {
        if let Some(kind) = self.known.get(key) {
            return Some(*kind);
        }
        self.mapping_ancestor(key).map(|_| KeyKind::Scalar)
    }

    pub fn is_known(&self, key: &str) -> bool {
        self.key_kind(key).is_some()
    }

    /// Shortest declared wildcard key strictly containing `key`, with the remaining sub-path
    fn mapping_ancestor<'k>(&self, key: &'k str) -> Option<(&'k str, &'k str)> {
        key.match_indices('.').find_map(|(i, _)| {
            let (base, rest) = (&key[..i], &key[i + 1..]);
            matches!(self.known.get(base), Some(KeyKind::Mapping)).then_some((base, rest))
        })
    }

    pub fn unknown_keys<'a, I>(&self, keys: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        keys.into_iter().filter(|k| !self.is_known(k)).collect()
    }

    /// Strict validation of keys coming from outside, e.g. the keys of a configuration file
    pub fn validate_keys<'a, I>(&self, keys: I) -> crate::Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let unknown = self.unknown_keys(keys);
        if unknown.is_empty() {
            return Ok(());
        }
        Err(ConfigError::UnknownKeys(unknown.into_iter().map(String::from).collect()).into())
    }

    /// Strict validation of every key bound or set in this registry
    pub fn validate(&self) -> crate::Result<()> {
        self.validate_keys(
            self.bindings
                .keys()
                .chain(self.file_values.keys())
                .map(String::as_str),
        )
    }

    pub fn resolve_from_env(&self) -> ResolvedConfig {
        self.resolve(&CompositeSource::default_sources())
    }

    /// Computes the value of every bound or file provided key.
    ///
    /// Precedence is environment, then file, then default. Environment values go through the
    /// transform of their key if there is one, and are otherwise converted to the type of the
    /// default. Values that fail to convert are reported in [`ResolvedConfig::errors`] and
    /// skipped.
    pub fn resolve(&self, sources: &CompositeSource) -> ResolvedConfig {
        let file_values = self.file_layer();
        let mut errors = Vec::new();
        let mut values = BTreeMap::new();

        let keys: BTreeSet<&str> = self
            .bindings
            .keys()
            .chain(file_values.keys())
            .map(String::as_str)
            .collect();

        for key in keys {
            let binding = self.bindings.get(key);
            let resolved = binding
                .and_then(|b| self.env_value(key, b, sources, &mut errors))
                .or_else(|| {
                    file_values.get(key).map(|value| ResolvedValue {
                        value: value.clone(),
                        origin: ConfigSourceOrigin::File,
                        name: None,
                    })
                })
                .or_else(|| {
                    binding
                        .and_then(|b| b.default.clone())
                        .map(|value| ResolvedValue {
                            value,
                            origin: ConfigSourceOrigin::Default,
                            name: None,
                        })
                });
            if let Some(resolved) = resolved {
                values.insert(key.to_string(), resolved);
            }
        }

        ResolvedConfig { values, errors }
    }

    /// File values with wildcard sub-keys folded into the map of their wildcard key
    fn file_layer(&self) -> BTreeMap<String, Value> {
        let mut layer = BTreeMap::new();
        let mut nested: BTreeMap<&str, BTreeMap<String, Value>> = BTreeMap::new();
        for (key, value) in &self.file_values {
            match self.mapping_ancestor(key) {
                Some((base, rest)) => {
                    nested
                        .entry(base)
                        .or_default()
                        .insert(rest.to_string(), value.clone());
                }
                None => {
                    layer.insert(key.clone(), value.clone());
                }
            }
        }
        for (base, sub_values) in nested {
            match layer.get_mut(base) {
                Some(Value::Map(map)) => map.extend(sub_values),
                Some(other) => {
                    dd_warn!(
                        "Configuration key {base} should be a map, found a {}",
                        other.kind()
                    );
                }
                None => {
                    layer.insert(base.to_string(), Value::Map(sub_values));
                }
            }
        }
        layer
    }

    fn env_value(
        &self,
        key: &str,
        binding: &Binding,
        sources: &CompositeSource,
        errors: &mut Vec<ResolveError>,
    ) -> Option<ResolvedValue> {
        for env_name in &binding.env_names {
            let Some(raw) = sources.get_first([env_name.as_str()]) else {
                continue;
            };
            let transform = self
                .transforms
                .get(key)
                .filter(|_| raw.origin == ConfigSourceOrigin::EnvVar);
            let converted = match transform {
                Some(transform) => Ok(transform(&raw.value)),
                None => convert_raw(key, &raw, binding.default.as_ref()),
            };
            match converted {
                Ok(value) => {
                    dd_debug!("Configuration key {key} set from {env_name}");
                    return Some(ResolvedValue {
                        value,
                        origin: raw.origin,
                        name: Some(raw.name),
                    });
                }
                Err(e) => {
                    dd_warn!("{e}");
                    errors.push(e);
                }
            }
        }
        None
    }
}

/// Converts a raw string to the type of the default value of its key
fn convert_raw(
    key: &str,
    raw: &ConfigKey<String>,
    default: Option<&Value>,
) -> Result<Value, ResolveError> {
    let error = |desired_type: &'static str, message: String| ResolveError {
        key: key.to_string(),
        name: raw.name.clone(),
        value: raw.value.clone(),
        desired_type,
        message,
    };
    let s = raw.value.as_str();
    match default {
        None | Some(Value::String(_)) => Ok(Value::String(s.to_string())),
        Some(Value::Bool(_)) => parse_bool(s)
            .map(Value::Bool)
            .ok_or_else(|| error("bool", "expected one of 1, t, true, 0, f, false".into())),
        Some(Value::Int(_)) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .or_else(|e| match s.trim().parse::<f64>() {
                Ok(f) if f.fract() == 0.0 && f.is_finite() => float_to_i64(f)
                    .map(Value::Int)
                    .ok_or_else(|| error("int", format!("{f} is out of the range of an int"))),
                _ => Err(error("int", e.to_string())),
            }),
        Some(Value::Float(_)) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| error("float", e.to_string())),
        Some(Value::List(_)) => Ok(s
            .split_whitespace()
            .map(String::from)
            .collect::<Vec<_>>()
            .into()),
        Some(Value::Map(_)) => serde_json::from_str::<BTreeMap<String, String>>(s)
            .map(Value::from)
            .map_err(|e| error("map", e.to_string())),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedValue {
    pub value: Value,
    pub origin: ConfigSourceOrigin,
    /// Environment variable the value was read from
    pub name: Option<String>,
}

/// Snapshot of the values of every key of a [`Registry`]
#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
    values: BTreeMap<String, ResolvedValue>,
    errors: Vec<ResolveError>,
}

impl ResolvedConfig {
    /// Value of `key`. Entries of wildcard keys are addressed as `key.sub_key`
    pub fn get(&self, key: &str) -> Option<&Value> {
        if let Some(v) = self.values.get(key) {
            return Some(&v.value);
        }
        key.match_indices('.').find_map(|(i, _)| {
            let (base, rest) = (&key[..i], &key[i + 1..]);
            self.values.get(base)?.value.as_map()?.get(rest)
        })
    }

    pub fn get_resolved(&self, key: &str) -> Option<&ResolvedValue> {
        self.values.get(key)
    }

    pub fn origin(&self, key: &str) -> Option<ConfigSourceOrigin> {
        self.values.get(key).map(|v| v.origin)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_string_list(&self, key: &str) -> Option<Vec<&str>> {
        self.get(key).and_then(Value::as_string_list)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Conversion errors met while resolving
    pub fn errors(&self) -> &[ResolveError] {
        &self.errors
    }
}
