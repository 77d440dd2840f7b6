// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashMap, time::Duration};

use serde::Deserialize;

use crate::configuration::apm::{self, setup_apm};
use crate::configuration::registry::{Registry, ResolvedConfig};
use crate::configuration::value::Value;
use crate::dd_warn;

/// Rule replacing the part of a tag value matching `pattern` by `repl`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplaceRule {
    /// Tag name, `resource.name` or `*` for every tag
    pub name: String,
    pub pattern: String,
    pub repl: String,
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
/// Settings of the trace agent
///
/// # Usage
/// ```
/// use dd_apm_config::ApmConfig;
///
/// // Reads DD_APM_* environment variables on top of the defaults
/// let config = ApmConfig::from_env();
/// assert!(config.receiver_port() > 0);
/// ```
pub struct ApmConfig {
    enabled: bool,
    env: String,

    // # Intake
    dd_url: String,
    profiling_dd_url: String,
    /// Extra intake urls, with the API keys to use for each of them
    additional_endpoints: HashMap<String, Vec<String>>,
    profiling_additional_endpoints: HashMap<String, Vec<String>>,

    // # Receiver
    receiver_port: u16,
    receiver_socket: Option<String>,
    non_local_traffic: bool,
    connection_limit: i64,
    /// Zero disables connection resets
    connection_reset_interval: Duration,

    // # Sampling
    max_traces_per_second: f64,
    max_events_per_second: f64,
    /// Rates by `service|operation`
    analyzed_spans: HashMap<String, f64>,

    // # Filtering
    ignore_resources: Vec<String>,
    replace_tags: Vec<ReplaceRule>,

    // # Watchdog
    max_memory: f64,
    max_cpu_percent: f64,
}

impl Default for ApmConfig {
    fn default() -> Self {
        ApmConfig {
            enabled: apm::apm_enabled_default(std::env::consts::ARCH, std::env::consts::OS),
            env: "none".to_string(),
            dd_url: apm::DEFAULT_DD_URL.to_string(),
            profiling_dd_url: apm::DEFAULT_PROFILING_DD_URL.to_string(),
            additional_endpoints: HashMap::new(),
            profiling_additional_endpoints: HashMap::new(),
            receiver_port: apm::DEFAULT_RECEIVER_PORT as u16,
            receiver_socket: None,
            non_local_traffic: false,
            connection_limit: 0,
            connection_reset_interval: Duration::ZERO,
            max_traces_per_second: 10.0,
            max_events_per_second: 200.0,
            analyzed_spans: HashMap::new(),
            ignore_resources: Vec::new(),
            replace_tags: Vec::new(),
            max_memory: 5e8,
            max_cpu_percent: 50.0,
        }
    }
}

impl ApmConfig {
    /// Registers the APM keys in a new registry and resolves them against the process
    /// environment
    pub fn from_env() -> Self {
        let mut registry = Registry::new();
        setup_apm(&mut registry);
        Self::from_resolved(&registry.resolve_from_env())
    }

    pub fn from_resolved(resolved: &ResolvedConfig) -> Self {
        let default = ApmConfig::default();

        Self {
            enabled: resolved.get_bool(apm::ENABLED).unwrap_or(default.enabled),
            env: resolved
                .get_str(apm::ENV)
                .map(String::from)
                .unwrap_or(default.env),
            dd_url: resolved
                .get_str(apm::DD_URL)
                .map(String::from)
                .unwrap_or(default.dd_url),
            profiling_dd_url: resolved
                .get_str(apm::PROFILING_DD_URL)
                .map(String::from)
                .unwrap_or(default.profiling_dd_url),
            additional_endpoints: resolved
                .get(apm::ADDITIONAL_ENDPOINTS)
                .map(|v| endpoints(apm::ADDITIONAL_ENDPOINTS, v))
                .unwrap_or(default.additional_endpoints),
            profiling_additional_endpoints: resolved
                .get(apm::PROFILING_ADDITIONAL_ENDPOINTS)
                .map(|v| endpoints(apm::PROFILING_ADDITIONAL_ENDPOINTS, v))
                .unwrap_or(default.profiling_additional_endpoints),
            receiver_port: resolved
                .get_i64(apm::RECEIVER_PORT)
                .and_then(|port| match u16::try_from(port) {
                    Ok(port) => Some(port),
                    Err(_) => {
                        dd_warn!("\"{}\" {port} is not a valid port", apm::RECEIVER_PORT);
                        None
                    }
                })
                .unwrap_or(default.receiver_port),
            receiver_socket: resolved
                .get_str(apm::RECEIVER_SOCKET)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .or(default.receiver_socket),
            non_local_traffic: resolved
                .get_bool(apm::NON_LOCAL_TRAFFIC)
                .unwrap_or(default.non_local_traffic),
            connection_limit: resolved
                .get_i64(apm::CONNECTION_LIMIT)
                .unwrap_or(default.connection_limit),
            connection_reset_interval: resolved
                .get_i64(apm::CONNECTION_RESET_INTERVAL)
                .and_then(|secs| u64::try_from(secs).ok())
                .map(Duration::from_secs)
                .unwrap_or(default.connection_reset_interval),
            max_traces_per_second: resolved
                .get_f64(apm::MAX_TRACES_PER_SECOND)
                .unwrap_or(default.max_traces_per_second),
            max_events_per_second: resolved
                .get_f64(apm::MAX_EVENTS_PER_SECOND)
                .unwrap_or(default.max_events_per_second),
            analyzed_spans: resolved
                .get(apm::ANALYZED_SPANS)
                .and_then(Value::as_map)
                .map(|spans| {
                    spans
                        .iter()
                        .filter_map(|(name, rate)| Some((name.clone(), rate.as_f64()?)))
                        .collect()
                })
                .unwrap_or(default.analyzed_spans),
            ignore_resources: resolved
                .get_string_list(apm::IGNORE_RESOURCES)
                .map(|l| l.into_iter().map(String::from).collect())
                .unwrap_or(default.ignore_resources),
            replace_tags: resolved
                .get(apm::REPLACE_TAGS)
                .and_then(Value::as_list)
                .map(replace_rules)
                .unwrap_or(default.replace_tags),
            max_memory: resolved
                .get_f64(apm::MAX_MEMORY)
                .unwrap_or(default.max_memory),
            max_cpu_percent: resolved
                .get_f64(apm::MAX_CPU_PERCENT)
                .unwrap_or(default.max_cpu_percent),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn dd_url(&self) -> &str {
        &self.dd_url
    }

    pub fn profiling_dd_url(&self) -> &str {
        &self.profiling_dd_url
    }

    pub fn additional_endpoints(&self) -> &HashMap<String, Vec<String>> {
        &self.additional_endpoints
    }

    pub fn profiling_additional_endpoints(&self) -> &HashMap<String, Vec<String>> {
        &self.profiling_additional_endpoints
    }

    pub fn receiver_port(&self) -> u16 {
        self.receiver_port
    }

    pub fn receiver_socket(&self) -> Option<&str> {
        self.receiver_socket.as_deref()
    }

    pub fn non_local_traffic(&self) -> bool {
        self.non_local_traffic
    }

    pub fn connection_limit(&self) -> i64 {
        self.connection_limit
    }

    pub fn connection_reset_interval(&self) -> Duration {
        self.connection_reset_interval
    }

    pub fn max_traces_per_second(&self) -> f64 {
        self.max_traces_per_second
    }

    pub fn max_events_per_second(&self) -> f64 {
        self.max_events_per_second
    }

    pub fn analyzed_spans(&self) -> &HashMap<String, f64> {
        &self.analyzed_spans
    }

    /// Rate of the spans of `operation` in `service`, if they are analyzed
    pub fn analyzed_span_rate(&self, service: &str, operation: &str) -> Option<f64> {
        self.analyzed_spans
            .get(&format!("{service}|{operation}"))
            .copied()
    }

    pub fn ignore_resources(&self) -> impl Iterator<Item = &str> {
        self.ignore_resources.iter().map(String::as_str)
    }

    pub fn replace_tags(&self) -> &[ReplaceRule] {
        &self.replace_tags
    }

    pub fn max_memory(&self) -> f64 {
        self.max_memory
    }

    pub fn max_cpu_percent(&self) -> f64 {
        self.max_cpu_percent
    }
}

/// Reads `url -> api keys`. The file gives a map, the environment a JSON object.
fn endpoints(key: &str, value: &Value) -> HashMap<String, Vec<String>> {
    match value {
        Value::Map(map) => map
            .iter()
            .map(|(url, keys)| {
                let keys = match keys {
                    Value::String(k) => vec![k.clone()],
                    other => other
                        .as_string_list()
                        .unwrap_or_default()
                        .into_iter()
                        .map(String::from)
                        .collect(),
                };
                (url.clone(), keys)
            })
            .collect(),
        Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
            dd_warn!("\"{key}\" can not be parsed: {e}");
            HashMap::new()
        }),
        other => {
            dd_warn!("\"{key}\" should be a map, found a {}", other.kind());
            HashMap::new()
        }
    }
}

fn replace_rules(rules: &[Value]) -> Vec<ReplaceRule> {
    rules
        .iter()
        .filter_map(|rule| {
            match serde_json::to_value(rule).and_then(serde_json::from_value::<ReplaceRule>) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    dd_warn!(
                        "\"{}\" rule {rule} should have a name, a pattern and a repl: {e}",
                        apm::REPLACE_TAGS
                    );
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use pretty_assertions::assert_eq;

    use super::{ApmConfig, ReplaceRule};
    use crate::configuration::apm::setup_apm;
    use crate::configuration::registry::Registry;
    use crate::configuration::sources::{CompositeSource, ConfigSourceOrigin, HashMapSource};
    use crate::configuration::value::Value;
    use crate::log::test_logger;

    fn config_with(vars: &[(&str, &str)], file: &[(&str, Value)]) -> ApmConfig {
        let mut registry = Registry::new();
        setup_apm(&mut registry);
        for (key, value) in file {
            registry.set_file_value(key, value.clone());
        }
        let mut sources = CompositeSource::new();
        sources.add_source(HashMapSource::from_iter(
            vars.iter().copied(),
            ConfigSourceOrigin::EnvVar,
        ));
        ApmConfig::from_resolved(&registry.resolve(&sources))
    }

    #[test]
    fn test_defaults_match_registry_defaults() {
        assert_eq!(config_with(&[], &[]), ApmConfig::default());
    }

    #[test]
    fn test_config_from_env() {
        let config = config_with(
            &[
                ("DD_APM_ENABLED", "false"),
                ("DD_APM_ENV", "prod"),
                ("DD_APM_DD_URL", "https://trace.agent.datadoghq.eu"),
                ("DD_APM_RECEIVER_PORT", "8200"),
                ("DD_APM_RECEIVER_SOCKET", "/var/run/datadog/apm.socket"),
                ("DD_APM_NON_LOCAL_TRAFFIC", "true"),
                ("DD_APM_CONNECTION_LIMIT", "100"),
                ("DD_APM_CONNECTION_RESET_INTERVAL", "120"),
                ("DD_APM_MAX_TPS", "25"),
                ("DD_APM_MAX_EPS", "100.5"),
                ("DD_APM_MAX_MEMORY", "1e9"),
                ("DD_APM_MAX_CPU_PERCENT", "75"),
                ("DD_APM_IGNORE_RESOURCES", "GET /health, GET /ping"),
                (
                    "DD_APM_REPLACE_TAGS",
                    r#"[{"name":"http.url","pattern":"token=.*","repl":"token=?"}]"#,
                ),
                ("DD_APM_ANALYZED_SPANS", "web|http.request=1,db|query=0.25"),
                (
                    "DD_APM_ADDITIONAL_ENDPOINTS",
                    r#"{"https://trace.agent.datadoghq.eu": ["key1", "key2"]}"#,
                ),
            ],
            &[],
        );

        assert!(!config.enabled());
        assert_eq!(config.env(), "prod");
        assert_eq!(config.dd_url(), "https://trace.agent.datadoghq.eu");
        assert_eq!(config.receiver_port(), 8200);
        assert_eq!(config.receiver_socket(), Some("/var/run/datadog/apm.socket"));
        assert!(config.non_local_traffic());
        assert_eq!(config.connection_limit(), 100);
        assert_eq!(config.connection_reset_interval(), Duration::from_secs(120));
        assert_eq!(config.max_traces_per_second(), 25.0);
        assert_eq!(config.max_events_per_second(), 100.5);
        assert_eq!(config.max_memory(), 1e9);
        assert_eq!(config.max_cpu_percent(), 75.0);
        assert_eq!(
            config.ignore_resources().collect::<Vec<_>>(),
            vec!["GET /health", "GET /ping"]
        );
        assert_eq!(
            config.replace_tags(),
            &[ReplaceRule {
                name: "http.url".to_string(),
                pattern: "token=.*".to_string(),
                repl: "token=?".to_string(),
            }]
        );
        assert_eq!(config.analyzed_span_rate("web", "http.request"), Some(1.0));
        assert_eq!(config.analyzed_span_rate("db", "query"), Some(0.25));
        assert_eq!(config.analyzed_span_rate("db", "connect"), None);
        assert_eq!(
            config.additional_endpoints(),
            &HashMap::from([(
                "https://trace.agent.datadoghq.eu".to_string(),
                vec!["key1".to_string(), "key2".to_string()]
            )])
        );
    }

    #[test]
    fn test_config_from_file() {
        let config = config_with(
            &[],
            &[
                (
                    "apm_config.additional_endpoints.https://trace.agent.datadoghq.eu",
                    Value::from(vec!["key1"]),
                ),
                (
                    "apm_config.profiling_additional_endpoints.https://intake.profile.datadoghq.eu/v1/input",
                    Value::from("key2"),
                ),
                ("apm_config.analyzed_spans.web|http.request", Value::from(0.5)),
                ("apm_config.receiver_port", Value::from(8300)),
            ],
        );

        assert_eq!(config.analyzed_span_rate("web", "http.request"), Some(0.5));
        assert_eq!(config.receiver_port(), 8300);
        assert_eq!(
            config.additional_endpoints().get("https://trace.agent.datadoghq.eu"),
            Some(&vec!["key1".to_string()])
        );
        assert_eq!(
            config
                .profiling_additional_endpoints()
                .get("https://intake.profile.datadoghq.eu/v1/input"),
            Some(&vec!["key2".to_string()])
        );
    }

    #[test]
    fn test_replace_rules_from_file() {
        let _g = test_logger::activate_test_logger();
        let rule = |fields: &[(&str, &str)]| {
            Value::from(
                fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect::<HashMap<_, _>>(),
            )
        };
        let config = config_with(
            &[],
            &[(
                "apm_config.replace_tags",
                Value::List(vec![
                    rule(&[("name", "*"), ("pattern", "\\d+"), ("repl", "?")]),
                    rule(&[("name", "http.url"), ("pattern", "token=.*")]),
                ]),
            )],
        );
        assert_eq!(
            config.replace_tags(),
            &[ReplaceRule {
                name: "*".to_string(),
                pattern: "\\d+".to_string(),
                repl: "?".to_string(),
            }]
        );

        let logs = test_logger::take_test_logs().unwrap();
        assert!(
            logs.iter().any(|(_, msg)| msg.contains("missing field `repl`")),
            "{logs:?}"
        );
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let _g = test_logger::activate_test_logger();
        let config = config_with(
            &[
                ("DD_APM_RECEIVER_PORT", "70000"),
                ("DD_APM_ANALYZED_SPANS", "web|http.request"),
                ("DD_APM_ADDITIONAL_ENDPOINTS", "https://trace.agent.datadoghq.eu"),
                ("DD_APM_REPLACE_TAGS", r#"[{"name":"http.url","pattern":"x"}]"#),
            ],
            &[],
        );
        assert_eq!(config.receiver_port(), 8126);
        assert!(config.analyzed_spans().is_empty());
        assert!(config.additional_endpoints().is_empty());
        assert!(config.replace_tags().is_empty());

        let logs = test_logger::take_test_logs().unwrap();
        for expected in [
            "apm_config.receiver_port",
            "apm_config.analyzed_spans",
            "apm_config.additional_endpoints",
            "apm_config.replace_tags",
        ] {
            assert!(
                logs.iter().any(|(_, msg)| msg.contains(expected)),
                "No log for {expected}: {logs:?}"
            );
        }
    }
}
