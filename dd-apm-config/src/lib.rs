// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Registration and parsing of the APM configuration keys of the Datadog agent.
//!
//! ```
//! use dd_apm_config::configuration::{apm, Registry};
//!
//! let mut registry = Registry::new();
//! apm::setup_apm(&mut registry);
//! let resolved = registry.resolve_from_env();
//! assert!(resolved.get_str(apm::DD_URL).is_some());
//! ```

pub mod configuration;
pub use configuration::{ApmConfig, Registry};

mod error;
pub use error::{Error, Result};

pub mod log;
