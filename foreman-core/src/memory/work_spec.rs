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

use crate::backend::{WorkSpec, WorkUnit};
use crate::memory::state::{CoordState, SpecId, UnitId, WorkerId};
use crate::memory::work_unit::MemoryWorkUnit;
use crate::memory::{meta, Shared};
use foreman_common::error::CoordinateError;
use foreman_common::model::{
    Dict, Summary, WorkSpecMeta, WorkUnitMeta, WorkUnitQuery, WorkUnitStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub(crate) struct MemoryWorkSpec {
    shared: Arc<Shared>,
    id: SpecId,
    name: String,
    namespace_name: String,
}

impl MemoryWorkSpec {
    pub fn handle(
        shared: &Arc<Shared>,
        id: SpecId,
        name: &str,
        namespace_name: &str,
    ) -> Arc<dyn WorkSpec> {
        Arc::new(Self {
            shared: shared.clone(),
            id,
            name: name.to_string(),
            namespace_name: namespace_name.to_string(),
        })
    }

    /// Runs the query against a swept spec and returns matching unit IDs,
    /// name-sorted and truncated when the query carries a limit.
    fn query_unit_ids(
        state: &CoordState,
        spec_id: SpecId,
        query: &WorkUnitQuery,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<UnitId>, CoordinateError> {
        let spec = state.spec_state(spec_id)?;
        let mut matching: Vec<UnitId> = Vec::new();
        for (name, unit_id) in &spec.units_by_name {
            let Some(status) = state.unit_status(*unit_id, now) else {
                continue;
            };
            if query.matches(name, status) {
                matching.push(*unit_id);
            }
        }
        // units_by_name iterates in name order already
        if query.limit > 0 {
            matching.truncate(query.limit);
        }
        Ok(matching)
    }
}

#[async_trait::async_trait]
impl WorkSpec for MemoryWorkSpec {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace_name(&self) -> &str {
        &self.namespace_name
    }

    async fn data(&self) -> Result<Dict, CoordinateError> {
        let state = self.shared.state();
        Ok(state.spec_state(self.id)?.data.clone())
    }

    async fn set_data(&self, data: Dict) -> Result<(), CoordinateError> {
        let mut state = self.shared.state();
        state.check_spec(self.id)?;
        state.apply_spec_data(self.id, data)
    }

    async fn meta(&self, with_counts: bool) -> Result<WorkSpecMeta, CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        if with_counts {
            state.check_spec(self.id)?;
            state.sweep_spec(self.id, now);
        }
        let spec = state.spec_state(self.id)?;
        let mut snapshot = spec.meta.clone();
        if with_counts {
            snapshot.available_count = spec.available.len();
            snapshot.pending_count = state.pending_count(self.id, now);
        }
        Ok(snapshot)
    }

    async fn set_meta(&self, meta: WorkSpecMeta) -> Result<(), CoordinateError> {
        let mut state = self.shared.state();
        let spec = state.spec_state_mut(self.id)?;
        let mut next = meta;
        // immutable fields of the target survive, and `continuous` cannot
        // be turned on for a spec that was never continuous
        next.can_be_continuous = spec.meta.can_be_continuous;
        next.next_work_spec = spec.meta.next_work_spec.clone();
        next.runtime = spec.meta.runtime.clone();
        next.continuous = next.continuous && next.can_be_continuous;
        next.weight = next.weight.max(1);
        next.available_count = 0;
        next.pending_count = 0;
        spec.meta = next;
        Ok(())
    }

    async fn add_work_unit(
        &self,
        name: &str,
        data: Dict,
        meta: WorkUnitMeta,
    ) -> Result<Arc<dyn WorkUnit>, CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        let unit_id = state.upsert_work_unit(self.id, name, data, meta, now)?;
        debug!(
            namespace = %self.namespace_name,
            work_spec = %self.name,
            work_unit = %name,
            "added work unit"
        );
        Ok(MemoryWorkUnit::handle(&self.shared, unit_id, name, &self.name))
    }

    async fn work_unit(&self, name: &str) -> Result<Arc<dyn WorkUnit>, CoordinateError> {
        let state = self.shared.state();
        let unit_id = state
            .spec_state(self.id)?
            .units_by_name
            .get(name)
            .copied()
            .ok_or_else(|| CoordinateError::NoSuchWorkUnit {
                name: name.to_string(),
            })?;
        Ok(MemoryWorkUnit::handle(&self.shared, unit_id, name, &self.name))
    }

    async fn work_units(
        &self,
        query: &WorkUnitQuery,
    ) -> Result<Vec<Arc<dyn WorkUnit>>, CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        state.check_spec(self.id)?;
        state.sweep_spec(self.id, now);
        let unit_ids = Self::query_unit_ids(&state, self.id, query, now)?;
        let mut result: Vec<Arc<dyn WorkUnit>> = Vec::new();
        for unit_id in unit_ids {
            if let Some(unit) = state.units.get(&unit_id) {
                result.push(MemoryWorkUnit::handle(
                    &self.shared,
                    unit_id,
                    &unit.name,
                    &self.name,
                ));
            }
        }
        Ok(result)
    }

    async fn count_work_unit_status(
        &self,
    ) -> Result<HashMap<WorkUnitStatus, usize>, CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        state.check_spec(self.id)?;
        state.sweep_spec(self.id, now);
        Ok(state.count_statuses(self.id, now))
    }

    async fn set_work_unit_priorities(
        &self,
        query: &WorkUnitQuery,
        priority: f64,
    ) -> Result<(), CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        state.check_spec(self.id)?;
        state.sweep_spec(self.id, now);
        let unit_ids = Self::query_unit_ids(&state, self.id, query, now)?;
        for unit_id in unit_ids {
            if let Some(unit) = state.units.get_mut(&unit_id) {
                unit.meta.priority = priority;
            }
            state.reprioritize(unit_id);
        }
        Ok(())
    }

    async fn adjust_work_unit_priorities(
        &self,
        query: &WorkUnitQuery,
        adjustment: f64,
    ) -> Result<(), CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        state.check_spec(self.id)?;
        state.sweep_spec(self.id, now);
        let unit_ids = Self::query_unit_ids(&state, self.id, query, now)?;
        for unit_id in unit_ids {
            if let Some(unit) = state.units.get_mut(&unit_id) {
                unit.meta.priority += adjustment;
            }
            state.reprioritize(unit_id);
        }
        Ok(())
    }

    async fn delete_work_units(&self, query: &WorkUnitQuery) -> Result<usize, CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        state.check_spec(self.id)?;
        state.sweep_spec(self.id, now);
        let unit_ids = Self::query_unit_ids(&state, self.id, query, now)?;
        let mut deleted = 0;
        for unit_id in unit_ids {
            let Some(name) = state.units.get(&unit_id).map(|unit| unit.name.clone()) else {
                continue;
            };
            // detach every attempt from its worker before tombstoning
            let attached: Vec<(crate::memory::state::AttemptId, WorkerId)> = state
                .units
                .get(&unit_id)
                .map(|unit| {
                    unit.attempts
                        .iter()
                        .filter_map(|attempt_id| {
                            state
                                .attempts
                                .get(attempt_id)
                                .map(|attempt| (*attempt_id, attempt.worker))
                        })
                        .collect()
                })
                .unwrap_or_default();
            for (attempt_id, worker_id) in attached {
                if let Some(worker) = state.workers.get_mut(&worker_id) {
                    worker.active_attempts.retain(|id| *id != attempt_id);
                    worker.attempts.retain(|id| *id != attempt_id);
                }
            }
            {
                let CoordState { units, specs, .. } = &mut *state;
                if let Some(spec) = specs.get_mut(&self.id) {
                    spec.available.remove(units, unit_id);
                    spec.units_by_name.remove(&name);
                }
            }
            if let Some(unit) = state.units.get_mut(&unit_id) {
                unit.tombstone = true;
            }
            deleted += 1;
        }
        debug!(
            namespace = %self.namespace_name,
            work_spec = %self.name,
            count = deleted,
            "deleted work units"
        );
        Ok(deleted)
    }

    async fn summarize(&self) -> Result<Summary, CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        state.check_spec(self.id)?;
        state.sweep_spec(self.id, now);
        let mut summary = Summary::default();
        for (status, count) in state.count_statuses(self.id, now) {
            summary.record(&self.namespace_name, &self.name, status, count);
        }
        summary.sort();
        Ok(summary)
    }
}

impl CoordState {
    /// `set_data` core: validates the embedded name against the spec's
    /// current name and re-derives the scheduling metadata.
    /// `can_be_continuous` latches at first extraction and survives every
    /// later `set_data`, and `continuous` stays clamped to it. The
    /// continuous cadence (`next_continuous`) survives too, so replacing
    /// the data does not make a continuous spec immediately eligible
    /// again.
    pub(crate) fn apply_spec_data(
        &mut self,
        spec_id: SpecId,
        data: Dict,
    ) -> Result<(), CoordinateError> {
        let name = meta::spec_name(&data)?;
        let new_meta = meta::meta_from_data(&data)?;
        let spec = self.spec_state_mut(spec_id)?;
        if name != spec.name {
            return Err(CoordinateError::ChangedName {
                current: spec.name.clone(),
                proposed: name,
            });
        }
        let next_continuous = spec.meta.next_continuous;
        let can_be_continuous = spec.meta.can_be_continuous;
        spec.data = data;
        spec.meta = new_meta;
        spec.meta.next_continuous = next_continuous;
        spec.meta.can_be_continuous = can_be_continuous;
        spec.meta.continuous = spec.meta.continuous && can_be_continuous;
        Ok(())
    }
}
