// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::SafeDisplay;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TracingConfig {
    pub service_name: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
    pub ansi: bool,
    /// Omit timestamps; keeps golden test output stable.
    pub without_time: bool,
    /// Default env-filter directive when `RUST_LOG` is not set.
    pub default_directive: String,
}

impl TracingConfig {
    pub fn local_dev(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            json: false,
            ansi: true,
            without_time: false,
            default_directive: "info".to_string(),
        }
    }

    pub fn local_dev_json(service_name: &str) -> Self {
        Self {
            json: true,
            ansi: false,
            ..Self::local_dev(service_name)
        }
    }

    pub fn test_pretty_without_time(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            json: false,
            ansi: true,
            without_time: true,
            default_directive: "debug".to_string(),
        }
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(directive) = std::env::var("RUST_LOG") {
            self.default_directive = directive;
        }
        self
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::local_dev("foreman")
    }
}

impl SafeDisplay for TracingConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "service name: {}", self.service_name);
        let _ = writeln!(&mut result, "JSON: {}", self.json);
        let _ = writeln!(&mut result, "ANSI: {}", self.ansi);
        let _ = writeln!(&mut result, "without time: {}", self.without_time);
        let _ = writeln!(&mut result, "filter: {}", self.default_directive);
        result
    }
}

/// Installs the global subscriber. Safe to call more than once; later calls
/// are no-ops, which lets every test suite initialize unconditionally.
pub fn init_tracing(config: &TracingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive.clone()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi);

    let _ = if config.json {
        builder.json().try_init()
    } else if config.without_time {
        builder.without_time().try_init()
    } else {
        builder.try_init()
    };
}

pub fn init_tracing_with_default_debug_env_filter(config: &TracingConfig) {
    init_tracing(config);
}
