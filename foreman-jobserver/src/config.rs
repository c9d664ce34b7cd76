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

use foreman_common::config::ConfigLoader;
use foreman_common::tracing::TracingConfig;
use foreman_common::SafeDisplay;
use foreman_core::config::MemoryBackendConfig;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::PathBuf;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobServerConfig {
    pub tracing: TracingConfig,
    /// Name of the namespace this server binds to.
    pub namespace: String,
    pub backend: MemoryBackendConfig,
}

impl Default for JobServerConfig {
    fn default() -> Self {
        Self {
            tracing: TracingConfig::local_dev("foreman-jobserver"),
            namespace: String::new(),
            backend: MemoryBackendConfig::default(),
        }
    }
}

impl SafeDisplay for JobServerConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "tracing:");
        let _ = writeln!(&mut result, "{}", self.tracing.to_safe_string_indented());
        let _ = writeln!(&mut result, "namespace: {}", self.namespace);
        let _ = writeln!(&mut result, "backend:");
        let _ = writeln!(&mut result, "{}", self.backend.to_safe_string_indented());
        result
    }
}

pub fn make_config_loader() -> ConfigLoader<JobServerConfig> {
    ConfigLoader::new(&PathBuf::from("config/foreman-jobserver.toml"))
}
