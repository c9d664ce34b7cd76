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

use crate::backend::{Namespace, WorkSpec, Worker};
use crate::memory::state::{
    AttemptId, CoordState, NamespaceId, SpecId, SpecState, WorkerId, WorkerState,
};
use crate::memory::work_spec::MemoryWorkSpec;
use crate::memory::worker::MemoryWorker;
use crate::memory::{meta, Shared};
use chrono::{DateTime, Utc};
use foreman_common::error::CoordinateError;
use foreman_common::model::{Dict, Summary};
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub(crate) struct MemoryNamespace {
    shared: Arc<Shared>,
    id: NamespaceId,
    name: String,
}

impl MemoryNamespace {
    pub fn handle(shared: &Arc<Shared>, id: NamespaceId, name: &str) -> Arc<dyn Namespace> {
        Arc::new(Self {
            shared: shared.clone(),
            id,
            name: name.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl Namespace for MemoryNamespace {
    fn name(&self) -> &str {
        &self.name
    }

    async fn destroy(&self) -> Result<(), CoordinateError> {
        let mut state = self.shared.state();
        state.namespace_state_mut(self.id)?.tombstone = true;
        state.namespaces_by_name.remove(&self.name);
        info!(namespace = %self.name, "destroyed namespace");
        Ok(())
    }

    async fn set_work_spec(&self, data: Dict) -> Result<Arc<dyn WorkSpec>, CoordinateError> {
        let name = meta::spec_name(&data)?;
        let mut state = self.shared.state();
        let existing = state
            .namespace_state(self.id)?
            .specs_by_name
            .get(&name)
            .copied();
        let spec_id = match existing {
            Some(spec_id) => {
                state.apply_spec_data(spec_id, data)?;
                spec_id
            }
            None => {
                let spec_meta = meta::meta_from_data(&data)?;
                let spec_id = SpecId(state.alloc_id());
                state.specs.insert(
                    spec_id,
                    SpecState {
                        name: name.clone(),
                        namespace: self.id,
                        data,
                        meta: spec_meta,
                        units_by_name: Default::default(),
                        available: Default::default(),
                        tombstone: false,
                    },
                );
                state
                    .namespace_state_mut(self.id)?
                    .specs_by_name
                    .insert(name.clone(), spec_id);
                info!(namespace = %self.name, work_spec = %name, "created work spec");
                spec_id
            }
        };
        Ok(MemoryWorkSpec::handle(&self.shared, spec_id, &name, &self.name))
    }

    async fn work_spec(&self, name: &str) -> Result<Arc<dyn WorkSpec>, CoordinateError> {
        let state = self.shared.state();
        let spec_id = state
            .namespace_state(self.id)?
            .specs_by_name
            .get(name)
            .copied()
            .ok_or_else(|| CoordinateError::NoSuchWorkSpec {
                name: name.to_string(),
            })?;
        Ok(MemoryWorkSpec::handle(&self.shared, spec_id, name, &self.name))
    }

    async fn destroy_work_spec(&self, name: &str) -> Result<(), CoordinateError> {
        let mut state = self.shared.state();
        let spec_id = state
            .namespace_state(self.id)?
            .specs_by_name
            .get(name)
            .copied()
            .ok_or_else(|| CoordinateError::NoSuchWorkSpec {
                name: name.to_string(),
            })?;
        // strip the spec's attempts out of the workers' lists before the
        // tombstone makes them unreachable
        let mut detached: Vec<(AttemptId, WorkerId)> = Vec::new();
        if let Some(spec) = state.specs.get(&spec_id) {
            for unit_id in spec.units_by_name.values() {
                if let Some(unit) = state.units.get(unit_id) {
                    for attempt_id in &unit.attempts {
                        if let Some(attempt) = state.attempts.get(attempt_id) {
                            detached.push((*attempt_id, attempt.worker));
                        }
                    }
                }
            }
        }
        for (attempt_id, worker_id) in detached {
            if let Some(worker) = state.workers.get_mut(&worker_id) {
                worker.active_attempts.retain(|id| *id != attempt_id);
            }
        }
        if let Some(spec) = state.specs.get_mut(&spec_id) {
            spec.tombstone = true;
        }
        state
            .namespace_state_mut(self.id)?
            .specs_by_name
            .remove(name);
        info!(namespace = %self.name, work_spec = %name, "destroyed work spec");
        Ok(())
    }

    async fn work_spec_names(&self) -> Result<Vec<String>, CoordinateError> {
        let state = self.shared.state();
        Ok(state
            .namespace_state(self.id)?
            .specs_by_name
            .keys()
            .cloned()
            .collect())
    }

    async fn worker(&self, name: &str) -> Result<Arc<dyn Worker>, CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        let existing = state
            .namespace_state(self.id)?
            .workers_by_name
            .get(name)
            .copied();
        let worker_id = match existing {
            Some(worker_id) => worker_id,
            None => {
                let worker_id = WorkerId(state.alloc_id());
                let lifetime = self.shared.default_worker_lifetime();
                state.workers.insert(
                    worker_id,
                    WorkerState {
                        name: name.to_string(),
                        namespace: self.id,
                        parent: None,
                        children: Default::default(),
                        data: None,
                        active: true,
                        mode: String::new(),
                        expiration: now + lifetime,
                        last_update: now,
                        active_attempts: Vec::new(),
                        attempts: Vec::new(),
                        tombstone: false,
                    },
                );
                state
                    .namespace_state_mut(self.id)?
                    .workers_by_name
                    .insert(name.to_string(), worker_id);
                debug!(namespace = %self.name, worker = %name, "registered worker");
                worker_id
            }
        };
        Ok(MemoryWorker::handle(&self.shared, worker_id, self.id, name))
    }

    async fn workers(&self) -> Result<HashMap<String, Arc<dyn Worker>>, CoordinateError> {
        let state = self.shared.state();
        let entries: Vec<(String, WorkerId)> = state
            .namespace_state(self.id)?
            .workers_by_name
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        let mut result: HashMap<String, Arc<dyn Worker>> = HashMap::new();
        for (name, worker_id) in entries {
            result.insert(
                name.clone(),
                MemoryWorker::handle(&self.shared, worker_id, self.id, &name),
            );
        }
        Ok(result)
    }

    async fn summarize(&self) -> Result<Summary, CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        state.check_namespace(self.id)?;
        Ok(state.summarize_namespace(self.id, now))
    }
}

impl CoordState {
    pub(crate) fn summarize_namespace(&mut self, id: NamespaceId, now: DateTime<Utc>) -> Summary {
        let mut summary = Summary::default();
        let Ok(namespace) = self.namespace_state(id) else {
            return summary;
        };
        let namespace_name = namespace.name.clone();
        let specs: Vec<(String, SpecId)> = namespace
            .specs_by_name
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        for (spec_name, spec_id) in specs {
            self.sweep_spec(spec_id, now);
            for (status, count) in self.count_statuses(spec_id, now).into_iter().sorted() {
                summary.record(&namespace_name, &spec_name, status, count);
            }
        }
        summary.sort();
        summary
    }
}
