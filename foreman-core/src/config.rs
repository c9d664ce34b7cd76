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

use foreman_common::model::{DEFAULT_LEASE_SECONDS, DEFAULT_WORKER_LIFETIME_SECONDS};
use foreman_common::SafeDisplay;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryBackendConfig {
    /// Seed for the scheduler's weighted draw; random when absent.
    pub random_seed: Option<u64>,
    /// Lease length applied when a request does not carry one.
    #[serde(with = "humantime_serde")]
    pub default_lease: Duration,
    /// Lifetime granted to a worker registration on first sight.
    #[serde(with = "humantime_serde")]
    pub default_worker_lifetime: Duration,
}

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        Self {
            random_seed: None,
            default_lease: Duration::from_secs(DEFAULT_LEASE_SECONDS as u64),
            default_worker_lifetime: Duration::from_secs(DEFAULT_WORKER_LIFETIME_SECONDS as u64),
        }
    }
}

impl SafeDisplay for MemoryBackendConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(
            &mut result,
            "random seed: {}",
            self.random_seed
                .map(|seed| seed.to_string())
                .unwrap_or_else(|| "entropy".to_string())
        );
        let _ = writeln!(&mut result, "default lease: {:?}", self.default_lease);
        let _ = writeln!(
            &mut result,
            "default worker lifetime: {:?}",
            self.default_worker_lifetime
        );
        result
    }
}
