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

use crate::backend::{Attempt, WorkUnit, Worker};
use crate::memory::attempt::MemoryAttempt;
use crate::memory::state::{CoordState, NamespaceId, SpecId, UnitId, WorkerId};
use crate::memory::work_unit::MemoryWorkUnit;
use crate::memory::Shared;
use crate::scheduler;
use crate::scheduler::SpecCandidate;
use chrono::{DateTime, Duration, Utc};
use foreman_common::error::CoordinateError;
use foreman_common::model::{clamp_lease, AttemptRequest, AttemptStatus, Dict, WorkUnitMeta};
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

pub(crate) struct MemoryWorker {
    pub(crate) shared: Arc<Shared>,
    pub(crate) id: WorkerId,
    pub(crate) namespace: NamespaceId,
    name: String,
}

impl MemoryWorker {
    pub fn handle(
        shared: &Arc<Shared>,
        id: WorkerId,
        namespace: NamespaceId,
        name: &str,
    ) -> Arc<dyn Worker> {
        Arc::new(Self {
            shared: shared.clone(),
            id,
            namespace,
            name: name.to_string(),
        })
    }

    fn attempt_handles(&self, attempt_ids: Vec<crate::memory::state::AttemptId>) -> Vec<Arc<dyn Attempt>> {
        attempt_ids
            .into_iter()
            .map(|attempt_id| MemoryAttempt::handle(&self.shared, attempt_id))
            .collect()
    }
}

/// Synthesized continuous units are named by their creation time,
/// `"<unix_seconds>.<millis>"`.
fn continuous_unit_name(now: DateTime<Utc>) -> String {
    format!("{}.{:03}", now.timestamp(), now.timestamp_subsec_millis())
}

#[async_trait::async_trait]
impl Worker for MemoryWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn parent(&self) -> Result<Option<Arc<dyn Worker>>, CoordinateError> {
        let state = self.shared.state();
        let parent = state.worker_state(self.id)?.parent;
        match parent {
            Some(parent_id) => {
                let parent = state.worker_state(parent_id)?;
                Ok(Some(MemoryWorker::handle(
                    &self.shared,
                    parent_id,
                    parent.namespace,
                    &parent.name,
                )))
            }
            None => Ok(None),
        }
    }

    async fn set_parent(&self, parent: Option<&Arc<dyn Worker>>) -> Result<(), CoordinateError> {
        let new_parent = match parent {
            Some(handle) => {
                let parent = handle
                    .as_any()
                    .downcast_ref::<MemoryWorker>()
                    .ok_or(CoordinateError::WrongBackend)?;
                if !Arc::ptr_eq(&parent.shared, &self.shared)
                    || parent.namespace != self.namespace
                {
                    return Err(CoordinateError::WrongBackend);
                }
                Some(parent.id)
            }
            None => None,
        };
        let mut state = self.shared.state();
        state.check_worker(self.id)?;
        if let Some(parent_id) = new_parent {
            state.check_worker(parent_id)?;
        }
        let old_parent = state.worker_state(self.id)?.parent;
        if old_parent == new_parent {
            return Ok(());
        }
        if let Some(old_id) = old_parent {
            if let Some(old) = state.workers.get_mut(&old_id) {
                old.children.remove(&self.id);
            }
        }
        state.worker_state_mut(self.id)?.parent = new_parent;
        if let Some(new_id) = new_parent {
            state.worker_state_mut(new_id)?.children.insert(self.id);
        }
        Ok(())
    }

    async fn children(&self) -> Result<Vec<Arc<dyn Worker>>, CoordinateError> {
        let state = self.shared.state();
        let children: Vec<WorkerId> = state
            .worker_state(self.id)?
            .children
            .iter()
            .copied()
            .collect();
        let mut result: Vec<Arc<dyn Worker>> = Vec::new();
        for child_id in children {
            if let Some(child) = state.workers.get(&child_id) {
                result.push(MemoryWorker::handle(
                    &self.shared,
                    child_id,
                    child.namespace,
                    &child.name,
                ));
            }
        }
        Ok(result)
    }

    async fn active(&self) -> Result<bool, CoordinateError> {
        let state = self.shared.state();
        Ok(state.worker_state(self.id)?.active)
    }

    async fn deactivate(&self) -> Result<(), CoordinateError> {
        let mut state = self.shared.state();
        state.worker_state_mut(self.id)?.active = false;
        Ok(())
    }

    async fn mode(&self) -> Result<String, CoordinateError> {
        let state = self.shared.state();
        Ok(state.worker_state(self.id)?.mode.clone())
    }

    async fn data(&self) -> Result<Option<Dict>, CoordinateError> {
        let state = self.shared.state();
        Ok(state.worker_state(self.id)?.data.clone())
    }

    async fn expiration(&self) -> Result<DateTime<Utc>, CoordinateError> {
        let state = self.shared.state();
        Ok(state.worker_state(self.id)?.expiration)
    }

    async fn last_update(&self) -> Result<DateTime<Utc>, CoordinateError> {
        let state = self.shared.state();
        Ok(state.worker_state(self.id)?.last_update)
    }

    async fn update(
        &self,
        data: Option<Dict>,
        now: DateTime<Utc>,
        expiration: DateTime<Utc>,
        mode: &str,
    ) -> Result<(), CoordinateError> {
        let mut state = self.shared.state();
        let worker = state.worker_state_mut(self.id)?;
        worker.data = data;
        worker.last_update = now;
        worker.expiration = expiration;
        worker.mode = mode.to_string();
        worker.active = true;
        Ok(())
    }

    async fn active_attempts(&self) -> Result<Vec<Arc<dyn Attempt>>, CoordinateError> {
        let state = self.shared.state();
        let attempt_ids = state.worker_state(self.id)?.active_attempts.clone();
        Ok(self.attempt_handles(attempt_ids))
    }

    async fn all_attempts(&self) -> Result<Vec<Arc<dyn Attempt>>, CoordinateError> {
        let state = self.shared.state();
        let attempt_ids = state.worker_state(self.id)?.attempts.clone();
        Ok(self.attempt_handles(attempt_ids))
    }

    async fn child_attempts(&self) -> Result<Vec<Arc<dyn Attempt>>, CoordinateError> {
        let state = self.shared.state();
        let children: Vec<WorkerId> = state
            .worker_state(self.id)?
            .children
            .iter()
            .copied()
            .collect();
        let mut attempt_ids = Vec::new();
        for child_id in children {
            if let Some(child) = state.workers.get(&child_id) {
                attempt_ids.extend(child.active_attempts.iter().copied());
            }
        }
        Ok(self.attempt_handles(attempt_ids))
    }

    async fn request_attempts(
        &self,
        request: AttemptRequest,
    ) -> Result<Vec<Arc<dyn Attempt>>, CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        state.check_worker(self.id)?;
        state.sweep_namespace(self.namespace, now);

        let specs: Vec<(String, SpecId)> = state
            .namespace_state(self.namespace)?
            .specs_by_name
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        // assembled in name order so a fixed seed fixes the draw
        let mut candidates: Vec<SpecCandidate> = Vec::new();
        for (name, spec_id) in specs {
            let Some(spec) = state.specs.get(&spec_id) else {
                continue;
            };
            if spec.tombstone {
                continue;
            }
            let mut meta = spec.meta.clone();
            meta.available_count = spec.available.len();
            meta.pending_count = state.pending_count(spec_id, now);
            if scheduler::eligible(&name, &meta, &request, now) {
                candidates.push(SpecCandidate {
                    spec: spec_id,
                    name,
                    meta,
                });
            }
        }
        let candidates = scheduler::apply_preemption(candidates);
        let chosen = {
            let mut rng = self.shared.rng();
            scheduler::choose_work_spec(&candidates, &mut rng)
        };
        let Some(chosen) = chosen else {
            return Ok(Vec::new());
        };

        let lease = clamp_lease(Some(
            request.lease_time.unwrap_or_else(|| self.shared.default_lease()),
        ));
        let mut cap = request.number_of_work_units.max(1);
        if chosen.meta.max_attempts_returned > 0 {
            cap = cap.min(chosen.meta.max_attempts_returned);
        }
        if chosen.meta.max_running > 0 {
            cap = cap.min(chosen.meta.max_running - chosen.meta.pending_count);
        }

        let mut handles: Vec<Arc<dyn Attempt>> = Vec::new();
        while handles.len() < cap {
            let popped = {
                let CoordState { units, specs, .. } = &mut *state;
                specs
                    .get_mut(&chosen.spec)
                    .and_then(|spec| spec.available.pop(units))
            };
            let unit_id: UnitId = match popped {
                Some(unit_id) => unit_id,
                None => {
                    let (due, interval, name_taken) = match state.specs.get(&chosen.spec) {
                        Some(spec) => (
                            scheduler::continuous_eligible(&spec.meta, now),
                            spec.meta.interval,
                            spec.units_by_name.contains_key(&continuous_unit_name(now)),
                        ),
                        None => break,
                    };
                    if !due || name_taken {
                        break;
                    }
                    let name = continuous_unit_name(now);
                    state.upsert_work_unit(
                        chosen.spec,
                        &name,
                        Dict::new(),
                        WorkUnitMeta::default(),
                        now,
                    )?;
                    if let Some(spec) = state.specs.get_mut(&chosen.spec) {
                        spec.meta.next_continuous = Some(now + interval);
                    }
                    debug!(work_spec = %chosen.name, work_unit = %name, "synthesized continuous work unit");
                    continue;
                }
            };
            let history = state
                .units
                .get(&unit_id)
                .map(|unit| unit.attempts.len())
                .unwrap_or(0);
            if chosen.meta.max_retries > 0 && history > chosen.meta.max_retries {
                let mut note = Dict::new();
                note.insert("error".to_string(), Value::String("too many retries".to_string()));
                state.create_attempt(
                    unit_id,
                    self.id,
                    now,
                    lease,
                    Some(note),
                    AttemptStatus::Failed,
                )?;
                continue;
            }
            let data = state
                .units
                .get(&unit_id)
                .map(|unit| unit.data.clone())
                .unwrap_or_default();
            let attempt_id = state.create_attempt(
                unit_id,
                self.id,
                now,
                lease,
                Some(data),
                AttemptStatus::Pending,
            )?;
            handles.push(MemoryAttempt::handle(&self.shared, attempt_id));
        }
        debug!(
            worker = %self.name,
            work_spec = %chosen.name,
            count = handles.len(),
            "dispatched attempts"
        );
        Ok(handles)
    }

    async fn make_attempt(
        &self,
        work_unit: &Arc<dyn WorkUnit>,
        lifetime: Option<Duration>,
    ) -> Result<Arc<dyn Attempt>, CoordinateError> {
        let unit = work_unit
            .as_any()
            .downcast_ref::<MemoryWorkUnit>()
            .ok_or(CoordinateError::WrongBackend)?;
        if !Arc::ptr_eq(&unit.shared, &self.shared) {
            return Err(CoordinateError::WrongBackend);
        }
        let now = self.shared.now();
        let lease = clamp_lease(Some(lifetime.unwrap_or_else(|| self.shared.default_lease())));
        let mut state = self.shared.state();
        let data = state.unit_state(unit.id)?.data.clone();
        let attempt_id = state.create_attempt(
            unit.id,
            self.id,
            now,
            lease,
            Some(data),
            AttemptStatus::Pending,
        )?;
        Ok(MemoryAttempt::handle(&self.shared, attempt_id))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
