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

use crate::backend::{Attempt, WorkUnit};
use crate::memory::attempt::MemoryAttempt;
use crate::memory::state::UnitId;
use crate::memory::Shared;
use foreman_common::error::CoordinateError;
use foreman_common::model::{Dict, WorkUnitMeta, WorkUnitStatus};
use std::any::Any;
use std::sync::Arc;

pub(crate) struct MemoryWorkUnit {
    pub(crate) shared: Arc<Shared>,
    pub(crate) id: UnitId,
    name: String,
    work_spec_name: String,
}

impl MemoryWorkUnit {
    pub fn handle(
        shared: &Arc<Shared>,
        id: UnitId,
        name: &str,
        work_spec_name: &str,
    ) -> Arc<dyn WorkUnit> {
        Arc::new(Self {
            shared: shared.clone(),
            id,
            name: name.to_string(),
            work_spec_name: work_spec_name.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl WorkUnit for MemoryWorkUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn work_spec_name(&self) -> &str {
        &self.work_spec_name
    }

    async fn data(&self) -> Result<Dict, CoordinateError> {
        let state = self.shared.state();
        let unit = state.unit_state(self.id)?;
        // data reported by the active attempt overrides the unit's own
        if let Some(attempt_id) = unit.active_attempt {
            if let Some(data) = state.attempts.get(&attempt_id).and_then(|a| a.data.clone()) {
                return Ok(data);
            }
        }
        Ok(unit.data.clone())
    }

    async fn status(&self) -> Result<WorkUnitStatus, CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        state.check_unit(self.id)?;
        state.sweep_unit(self.id, now);
        state
            .unit_status(self.id, now)
            .ok_or_else(|| CoordinateError::NoSuchWorkUnit {
                name: self.name.clone(),
            })
    }

    async fn meta(&self) -> Result<WorkUnitMeta, CoordinateError> {
        let state = self.shared.state();
        Ok(state.unit_state(self.id)?.meta.clone())
    }

    async fn set_meta(&self, meta: WorkUnitMeta) -> Result<(), CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        state.unit_state_mut(self.id)?.meta = meta;
        state.reprioritize(self.id);
        state.sweep_unit(self.id, now);
        Ok(())
    }

    async fn priority(&self) -> Result<f64, CoordinateError> {
        let state = self.shared.state();
        Ok(state.unit_state(self.id)?.meta.priority)
    }

    async fn set_priority(&self, priority: f64) -> Result<(), CoordinateError> {
        let mut state = self.shared.state();
        state.unit_state_mut(self.id)?.meta.priority = priority;
        state.reprioritize(self.id);
        Ok(())
    }

    async fn active_attempt(&self) -> Result<Option<Arc<dyn Attempt>>, CoordinateError> {
        let state = self.shared.state();
        let active = state.unit_state(self.id)?.active_attempt;
        Ok(active.map(|attempt_id| MemoryAttempt::handle(&self.shared, attempt_id)))
    }

    async fn attempts(&self) -> Result<Vec<Arc<dyn Attempt>>, CoordinateError> {
        let state = self.shared.state();
        let attempt_ids = state.unit_state(self.id)?.attempts.clone();
        Ok(attempt_ids
            .into_iter()
            .map(|attempt_id| MemoryAttempt::handle(&self.shared, attempt_id))
            .collect())
    }

    async fn attempt_count(&self) -> Result<usize, CoordinateError> {
        let state = self.shared.state();
        Ok(state.unit_state(self.id)?.attempts.len())
    }

    async fn clear_active_attempt(&self) -> Result<(), CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        let cleared = {
            let unit = state.unit_state_mut(self.id)?;
            unit.active_attempt.take()
        };
        if let Some(attempt_id) = cleared {
            // the attempt keeps its status; it just no longer confers the
            // lease, so it leaves the worker's active list
            if let Some(worker_id) = state.attempts.get(&attempt_id).map(|a| a.worker) {
                if let Some(worker) = state.workers.get_mut(&worker_id) {
                    worker.active_attempts.retain(|id| *id != attempt_id);
                }
            }
        }
        state.sweep_unit(self.id, now);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
