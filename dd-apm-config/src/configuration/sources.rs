// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

/// Source of a configuration value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSourceOrigin {
    Default,
    File,
    EnvVar,
    Code,
}

/// A raw value found in one of the sources, with the name it was found under
#[derive(Debug, PartialEq)]
pub struct ConfigKey<T> {
    pub value: T,
    pub origin: ConfigSourceOrigin,
    pub name: String,
}

/// Compose multiple sources of raw values together.
///
/// The higher precedence sources are the first ones in the list.
pub struct CompositeSource {
    sources: Vec<Box<dyn ConfigurationSource>>,
}

impl CompositeSource {
    pub fn add_source<C: ConfigurationSource + 'static>(&mut self, source: C) {
        self.sources.push(Box::new(source));
    }

    pub fn new() -> Self {
        CompositeSource {
            sources: Vec::new(),
        }
    }

    pub fn default_sources() -> Self {
        let mut sources = Self::new();
        sources.add_source(EnvSource);
        sources
    }

    /// Looks up candidate names in order and returns the first value found.
    ///
    /// For each name the sources are walked in order of precedence. A variable set to the empty
    /// string counts as unset, so the lookup moves on to the next source, then to the next name.
    pub fn get_first<'a, I>(&self, names: I) -> Option<ConfigKey<String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names.into_iter().find_map(|name| {
            self.sources.iter().find_map(|s| match s.get(name) {
                Ok(value) if !value.is_empty() => Some(ConfigKey {
                    value,
                    origin: s.origin(),
                    name: name.to_string(),
                }),
                Ok(_) | Err(ConfigSourceError::Missing) => None,
            })
        })
    }
}

impl Default for CompositeSource {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, PartialEq)]
pub enum ConfigSourceError {
    Missing,
}

pub type ConfigSourceResult<T> = Result<T, ConfigSourceError>;

/// Represent a source of raw string configuration values, looked up by name
pub trait ConfigurationSource {
    fn origin(&self) -> ConfigSourceOrigin;

    fn get(&self, name: &str) -> ConfigSourceResult<String>;
}

/// The process environment
pub struct EnvSource;

impl ConfigurationSource for EnvSource {
    fn origin(&self) -> ConfigSourceOrigin {
        ConfigSourceOrigin::EnvVar
    }

    fn get(&self, name: &str) -> ConfigSourceResult<String> {
        #[allow(clippy::disallowed_methods)]
        std::env::var(name).map_err(|_| ConfigSourceError::Missing)
    }
}

/// A source of configuration that is backed by a HashMap
///
/// Useful in tests, or when the environment was captured ahead of time.
pub struct HashMapSource {
    map: HashMap<String, String>,
    origin: ConfigSourceOrigin,
}

impl HashMapSource {
    pub fn from_iter<U: ToString, V: ToString, T: IntoIterator<Item = (U, V)>>(
        map: T,
        origin: ConfigSourceOrigin,
    ) -> Self {
        HashMapSource {
            map: map
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            origin,
        }
    }
}

impl ConfigurationSource for HashMapSource {
    fn origin(&self) -> ConfigSourceOrigin {
        self.origin
    }

    fn get(&self, name: &str) -> ConfigSourceResult<String> {
        self.map.get(name).cloned().ok_or(ConfigSourceError::Missing)
    }
}

#[cfg(test)]
mod tests {
    use super::{CompositeSource, ConfigKey, ConfigSourceOrigin, HashMapSource};

    #[test]
    fn test_composite_source_single_origin() {
        let mut source = CompositeSource::new();
        source.add_source(HashMapSource::from_iter(
            [("DD_APM_ENV", "staging"), ("DD_APM_MAX_TPS", "20")],
            ConfigSourceOrigin::EnvVar,
        ));

        for (names, expected) in [
            (
                vec!["DD_APM_ENV"],
                Some(ConfigKey {
                    value: "staging".to_string(),
                    origin: ConfigSourceOrigin::EnvVar,
                    name: "DD_APM_ENV".to_string(),
                }),
            ),
            (
                vec!["DD_APM_MAX_TPS", "DD_MAX_TPS"],
                Some(ConfigKey {
                    value: "20".to_string(),
                    origin: ConfigSourceOrigin::EnvVar,
                    name: "DD_APM_MAX_TPS".to_string(),
                }),
            ),
            (vec!["DD_APM_DD_URL"], None),
            (vec![], None),
        ] {
            let result = source.get_first(names.iter().copied());
            assert_eq!(result, expected, "Failed for names: {names:?}");
        }
    }

    #[test]
    fn test_alias_fallback() {
        let mut source = CompositeSource::new();
        source.add_source(HashMapSource::from_iter(
            [("DD_RECEIVER_PORT", "8127")],
            ConfigSourceOrigin::EnvVar,
        ));

        let result = source.get_first(["DD_APM_RECEIVER_PORT", "DD_RECEIVER_PORT"]);
        assert_eq!(
            result,
            Some(ConfigKey {
                value: "8127".to_string(),
                origin: ConfigSourceOrigin::EnvVar,
                name: "DD_RECEIVER_PORT".to_string(),
            })
        );
    }

    #[test]
    fn test_first_alias_wins() {
        let mut source = CompositeSource::new();
        source.add_source(HashMapSource::from_iter(
            [("DD_APM_MAX_EPS", "300"), ("DD_MAX_EPS", "400")],
            ConfigSourceOrigin::EnvVar,
        ));

        let result = source.get_first(["DD_APM_MAX_EPS", "DD_MAX_EPS"]).unwrap();
        assert_eq!(result.value, "300");
        assert_eq!(result.name, "DD_APM_MAX_EPS");
    }

    #[test]
    fn test_empty_value_is_unset() {
        let mut source = CompositeSource::new();
        source.add_source(HashMapSource::from_iter(
            [("DD_APM_IGNORE_RESOURCES", ""), ("DD_IGNORE_RESOURCE", "GET /")],
            ConfigSourceOrigin::EnvVar,
        ));

        let result = source
            .get_first(["DD_APM_IGNORE_RESOURCES", "DD_IGNORE_RESOURCE"])
            .unwrap();
        assert_eq!(result.value, "GET /");
        assert_eq!(result.name, "DD_IGNORE_RESOURCE");

        assert_eq!(source.get_first(["DD_APM_IGNORE_RESOURCES"]), None);
    }

    #[test]
    fn test_composite_priority_order() {
        let mut source = CompositeSource::new();
        source.add_source(HashMapSource::from_iter(
            [("DD_APM_ENV", "from-code")],
            ConfigSourceOrigin::Code,
        ));
        source.add_source(HashMapSource::from_iter(
            [("DD_APM_ENV", "from-env"), ("DD_APM_DD_URL", "http://intake")],
            ConfigSourceOrigin::EnvVar,
        ));

        let env = source.get_first(["DD_APM_ENV"]).unwrap();
        assert_eq!(env.value, "from-code");
        assert_eq!(env.origin, ConfigSourceOrigin::Code);

        let url = source.get_first(["DD_APM_DD_URL"]).unwrap();
        assert_eq!(url.value, "http://intake");
        assert_eq!(url.origin, ConfigSourceOrigin::EnvVar);
    }
}
