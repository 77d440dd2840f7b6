// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration keys of the trace agent

use crate::configuration::parsers::{
    parse_analyzed_spans, parse_string_map_list, split_csv_string,
};
use crate::configuration::registry::Registry;
use crate::configuration::value::Value;
use crate::{dd_error, dd_warn};

pub const ENABLED: &str = "apm_config.enabled";
pub const ENV: &str = "apm_config.env";
pub const ADDITIONAL_ENDPOINTS: &str = "apm_config.additional_endpoints";
pub const NON_LOCAL_TRAFFIC: &str = "apm_config.apm_non_local_traffic";
pub const MAX_TRACES_PER_SECOND: &str = "apm_config.max_traces_per_second";
pub const MAX_EVENTS_PER_SECOND: &str = "apm_config.max_events_per_second";
pub const MAX_MEMORY: &str = "apm_config.max_memory";
pub const MAX_CPU_PERCENT: &str = "apm_config.max_cpu_percent";
pub const LOG_FILE: &str = "apm_config.log_file";
pub const DD_URL: &str = "apm_config.apm_dd_url";
pub const PROFILING_DD_URL: &str = "apm_config.profiling_dd_url";
pub const PROFILING_ADDITIONAL_ENDPOINTS: &str = "apm_config.profiling_additional_endpoints";
pub const RECEIVER_PORT: &str = "apm_config.receiver_port";
pub const RECEIVER_SOCKET: &str = "apm_config.receiver_socket";
pub const RECEIVER_TIMEOUT: &str = "apm_config.receiver_timeout";
pub const CONNECTION_LIMIT: &str = "apm_config.connection_limit";
pub const CONNECTION_RESET_INTERVAL: &str = "apm_config.connection_reset_interval";
pub const IGNORE_RESOURCES: &str = "apm_config.ignore_resources";
pub const REPLACE_TAGS: &str = "apm_config.replace_tags";
pub const ANALYZED_SPANS: &str = "apm_config.analyzed_spans";
pub const ANALYZED_RATE_BY_SERVICE: &str = "apm_config.analyzed_rate_by_service";

pub const DEFAULT_DD_URL: &str = "https://trace.agent.datadoghq.com";
pub const DEFAULT_PROFILING_DD_URL: &str = "https://intake.profile.datadoghq.com/v1/input";
pub const DEFAULT_RECEIVER_PORT: i64 = 8126;

/// Keys without environment binding, only settable from the configuration file
const FILE_ONLY_KEYS: &[&str] = &[
    LOG_FILE,
    RECEIVER_TIMEOUT,
    "apm_config.obfuscation.elasticsearch.enabled",
    "apm_config.obfuscation.elasticsearch.keep_values",
    "apm_config.obfuscation.mongodb.enabled",
    "apm_config.obfuscation.mongodb.keep_values",
    "apm_config.obfuscation.http.remove_query_string",
    "apm_config.obfuscation.http.remove_paths_with_digits",
    "apm_config.obfuscation.remove_stack_traces",
    "apm_config.obfuscation.redis.enabled",
    "apm_config.obfuscation.memcached.enabled",
    "apm_config.extra_sample_rate",
    "apm_config.dd_agent_bin",
    "apm_config.trace_writer.connection_limit",
    "apm_config.trace_writer.queue_size",
    "apm_config.service_writer.connection_limit",
    "apm_config.service_writer.queue_size",
    "apm_config.stats_writer.connection_limit",
    "apm_config.stats_writer.queue_size",
    "apm_config.log_throttling",
    "apm_config.bucket_size_seconds",
    "apm_config.watchdog_check_delay",
    "apm_config.max_payload_size",
];

const WILDCARD_KEYS: &[&str] = &[
    ADDITIONAL_ENDPOINTS,
    PROFILING_ADDITIONAL_ENDPOINTS,
    ANALYZED_RATE_BY_SERVICE,
    ANALYZED_SPANS,
];

/// Default of `apm_config.enabled`. The trace agent is not shipped for 32 bit Windows.
pub fn apm_enabled_default(arch: &str, os: &str) -> bool {
    !(arch == "x86" && os == "windows")
}

/// Declares the APM keys, binds them to their defaults and environment variables, and registers
/// the transforms of the keys holding structured values.
pub fn setup_apm(config: &mut Registry) {
    for key in [
        ENABLED,
        ENV,
        NON_LOCAL_TRAFFIC,
        MAX_TRACES_PER_SECOND,
        MAX_EVENTS_PER_SECOND,
        MAX_MEMORY,
        MAX_CPU_PERCENT,
        DD_URL,
        PROFILING_DD_URL,
        RECEIVER_PORT,
        RECEIVER_SOCKET,
        CONNECTION_LIMIT,
        CONNECTION_RESET_INTERVAL, // in seconds
        IGNORE_RESOURCES,
        REPLACE_TAGS,
    ]
    .into_iter()
    .chain(FILE_ONLY_KEYS.iter().copied())
    {
        config.set_known(key);
    }
    for key in WILDCARD_KEYS {
        config.set_known(&format!("{key}.*"));
    }

    config.bind_env_and_set_default(
        ENABLED,
        apm_enabled_default(std::env::consts::ARCH, std::env::consts::OS),
        &["DD_APM_ENABLED"],
    );
    config.bind_env_and_set_default(
        CONNECTION_LIMIT,
        0,
        &["DD_APM_CONNECTION_LIMIT", "DD_CONNECTION_LIMIT"],
    );
    config.bind_env_and_set_default(ENV, "none", &["DD_APM_ENV"]);
    config.bind_env_and_set_default(NON_LOCAL_TRAFFIC, false, &["DD_APM_NON_LOCAL_TRAFFIC"]);
    config.bind_env_and_set_default(DD_URL, DEFAULT_DD_URL, &["DD_APM_DD_URL"]);
    config.bind_env_and_set_default(
        CONNECTION_RESET_INTERVAL,
        0,
        &["DD_APM_CONNECTION_RESET_INTERVAL"],
    );
    config.bind_env_and_set_default(
        RECEIVER_PORT,
        DEFAULT_RECEIVER_PORT,
        &["DD_APM_RECEIVER_PORT", "DD_RECEIVER_PORT"],
    );
    config.bind_env_and_set_default(
        MAX_EVENTS_PER_SECOND,
        200.0,
        &["DD_APM_MAX_EPS", "DD_MAX_EPS"],
    );
    config.bind_env_and_set_default(
        MAX_TRACES_PER_SECOND,
        10.0,
        &["DD_APM_MAX_TPS", "DD_MAX_TPS"],
    );
    config.bind_env_and_set_default(MAX_MEMORY, 5e8, &["DD_APM_MAX_MEMORY"]);
    config.bind_env_and_set_default(MAX_CPU_PERCENT, 50.0, &["DD_APM_MAX_CPU_PERCENT"]);
    config.bind_env_and_set_default(RECEIVER_SOCKET, "", &["DD_APM_RECEIVER_SOCKET"]);
    config.bind_env_and_set_default(
        PROFILING_DD_URL,
        DEFAULT_PROFILING_DD_URL,
        &["DD_APM_PROFILING_DD_URL"],
    );

    config.bind_env(
        PROFILING_ADDITIONAL_ENDPOINTS,
        &["DD_APM_PROFILING_ADDITIONAL_ENDPOINTS"],
    );
    config.bind_env(ADDITIONAL_ENDPOINTS, &["DD_APM_ADDITIONAL_ENDPOINTS"]);
    config.bind_env(REPLACE_TAGS, &["DD_APM_REPLACE_TAGS"]);
    config.bind_env(ANALYZED_SPANS, &["DD_APM_ANALYZED_SPANS"]);
    config.bind_env(
        IGNORE_RESOURCES,
        &["DD_APM_IGNORE_RESOURCES", "DD_IGNORE_RESOURCE"],
    );

    config.set_env_key_transformer(IGNORE_RESOURCES, ignore_resources_transform);
    config.set_env_key_transformer(REPLACE_TAGS, replace_tags_transform);
    config.set_env_key_transformer(ANALYZED_SPANS, analyzed_spans_transform);
}

pub fn ignore_resources_transform(raw: &str) -> Value {
    match split_csv_string(raw, ',') {
        Ok(resources) => resources.into(),
        Err(e) => {
            dd_warn!("\"{IGNORE_RESOURCES}\" can not be parsed: {e}");
            Value::empty_list()
        }
    }
}

pub fn replace_tags_transform(raw: &str) -> Value {
    match parse_string_map_list(raw) {
        Ok(rules) => rules.into(),
        Err(e) => {
            dd_warn!("\"{REPLACE_TAGS}\" can not be parsed: {e}");
            Value::empty_list()
        }
    }
}

pub fn analyzed_spans_transform(raw: &str) -> Value {
    match parse_analyzed_spans(raw) {
        Ok(spans) => spans.into(),
        Err(e) => {
            dd_error!(
                "Bad format for \"{ANALYZED_SPANS}\" it should be of the form \
                 \"service_name|operation_name=rate,other_service|other_operation=rate\", \
                 error: {e}"
            );
            Value::empty_map()
        }
    }
}
