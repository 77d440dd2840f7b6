// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration of the trace agent
//!
//! # Sources of configuration
//!
//! ```text
//! ^ Highest precedence
//! |
//! * "DD_APM" prefixed env variables, then their legacy aliases
//! |
//! * Configuration file values
//! |
//! * Default values
//! |
//! v Lowest level of precedence
//! ```

pub mod apm;
mod apm_config;
pub mod parsers;
mod registry;
pub mod sources;
mod value;

pub use apm_config::{ApmConfig, ReplaceRule};
pub use registry::{
    ConfigError, EnvTransform, KeyKind, Registry, ResolveError, ResolvedConfig, ResolvedValue,
};
pub use value::Value;
