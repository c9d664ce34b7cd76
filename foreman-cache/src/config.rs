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

use foreman_common::SafeDisplay;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::num::NonZeroUsize;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Namespaces cached at the root.
    pub namespace_cache_size: usize,
    /// Work specs cached per namespace.
    pub work_spec_cache_size: usize,
    /// Workers cached per namespace.
    pub worker_cache_size: usize,
    /// Work units cached per work spec.
    pub work_unit_cache_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace_cache_size: 32,
            work_spec_cache_size: 64,
            worker_cache_size: 256,
            work_unit_cache_size: 2048,
        }
    }
}

impl CacheConfig {
    pub(crate) fn namespace_capacity(&self) -> NonZeroUsize {
        capacity(self.namespace_cache_size)
    }

    pub(crate) fn work_spec_capacity(&self) -> NonZeroUsize {
        capacity(self.work_spec_cache_size)
    }

    pub(crate) fn worker_capacity(&self) -> NonZeroUsize {
        capacity(self.worker_cache_size)
    }

    pub(crate) fn work_unit_capacity(&self) -> NonZeroUsize {
        capacity(self.work_unit_cache_size)
    }
}

fn capacity(size: usize) -> NonZeroUsize {
    NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)
}

impl SafeDisplay for CacheConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "namespaces: {}", self.namespace_cache_size);
        let _ = writeln!(&mut result, "work specs: {}", self.work_spec_cache_size);
        let _ = writeln!(&mut result, "workers: {}", self.worker_cache_size);
        let _ = writeln!(&mut result, "work units: {}", self.work_unit_cache_size);
        result
    }
}
