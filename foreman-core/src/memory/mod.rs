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

//! The in-memory reference backend.
//!
//! One process-wide mutex guards the whole entity tree; every public
//! operation takes it for the duration of its data-plane access and no
//! method ever awaits or calls out while holding it. Lease expiry is
//! entirely lazy: observation recomputes status, no timer fires.

mod attempt;
pub(crate) mod meta;
mod namespace;
pub(crate) mod queue;
pub(crate) mod state;
mod work_spec;
mod work_unit;
mod worker;

use crate::backend::{Coordinate, Namespace};
use crate::config::MemoryBackendConfig;
use crate::memory::namespace::MemoryNamespace;
use crate::memory::state::{CoordState, NamespaceId, NamespaceState};
use chrono::{DateTime, Duration, Utc};
use foreman_common::clock::{Clock, SystemClock};
use foreman_common::error::CoordinateError;
use foreman_common::model::Summary;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

pub(crate) struct Shared {
    state: Mutex<CoordState>,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
    config: MemoryBackendConfig,
}

impl Shared {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn state(&self) -> MutexGuard<'_, CoordState> {
        self.state.lock().unwrap()
    }

    pub fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap()
    }

    pub fn default_lease(&self) -> Duration {
        Duration::from_std(self.config.default_lease)
            .unwrap_or_else(|_| foreman_common::model::default_lease())
    }

    pub fn default_worker_lifetime(&self) -> Duration {
        Duration::from_std(self.config.default_worker_lifetime)
            .unwrap_or_else(|_| foreman_common::model::default_worker_lifetime())
    }
}

pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn new(config: MemoryBackendConfig, clock: Arc<dyn Clock>) -> Self {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CoordState::default()),
                clock,
                rng: Mutex::new(rng),
                config,
            }),
        }
    }

    pub fn with_system_clock(config: MemoryBackendConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::with_system_clock(MemoryBackendConfig::default())
    }
}

#[async_trait::async_trait]
impl Coordinate for MemoryBackend {
    async fn namespace(&self, name: &str) -> Result<Arc<dyn Namespace>, CoordinateError> {
        let mut state = self.shared.state();
        let id = match state.namespaces_by_name.get(name) {
            Some(id) => *id,
            None => {
                let id = NamespaceId(state.alloc_id());
                state.namespaces.insert(
                    id,
                    NamespaceState {
                        name: name.to_string(),
                        tombstone: false,
                        specs_by_name: Default::default(),
                        workers_by_name: Default::default(),
                    },
                );
                state.namespaces_by_name.insert(name.to_string(), id);
                info!(namespace = name, "created namespace");
                id
            }
        };
        Ok(MemoryNamespace::handle(&self.shared, id, name))
    }

    async fn namespaces(&self) -> Result<Vec<Arc<dyn Namespace>>, CoordinateError> {
        let state = self.shared.state();
        let mut result: Vec<Arc<dyn Namespace>> = Vec::new();
        let mut names: Vec<(String, NamespaceId)> = state
            .namespaces_by_name
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        names.sort();
        for (name, id) in names {
            result.push(MemoryNamespace::handle(&self.shared, id, &name));
        }
        Ok(result)
    }

    async fn summarize(&self) -> Result<Summary, CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        let ids: Vec<NamespaceId> = state.namespaces_by_name.values().copied().collect();
        let mut summary = Summary::default();
        for id in ids {
            summary.merge(state.summarize_namespace(id, now));
        }
        summary.sort();
        Ok(summary)
    }
}
