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

//! Attempt handles and the attempt state machine.
//!
//! All transitions run under the global lock as methods on `CoordState`, so
//! the scheduler and the public attempt operations share one code path.
//! Idempotent repeats of a terminal transition are accepted as no-ops; a
//! transition on an attempt that has been superseded reports `LostLease`.

use crate::backend::{Attempt, WorkUnit, Worker};
use crate::memory::state::{AttemptId, AttemptState, CoordState, UnitId, WorkerId};
use crate::memory::work_unit::MemoryWorkUnit;
use crate::memory::worker::MemoryWorker;
use crate::memory::Shared;
use chrono::{DateTime, Duration, Utc};
use foreman_common::error::CoordinateError;
use foreman_common::model::{clamp_lease, AttemptStatus, Dict, WorkUnitMeta};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub(crate) struct MemoryAttempt {
    shared: Arc<Shared>,
    id: AttemptId,
}

impl MemoryAttempt {
    pub fn handle(shared: &Arc<Shared>, id: AttemptId) -> Arc<dyn Attempt> {
        Arc::new(Self {
            shared: shared.clone(),
            id,
        })
    }
}

#[async_trait::async_trait]
impl Attempt for MemoryAttempt {
    async fn work_unit(&self) -> Result<Arc<dyn WorkUnit>, CoordinateError> {
        let state = self.shared.state();
        let unit_id = state.attempt_state(self.id)?.unit;
        let unit = state.unit_state(unit_id)?;
        let spec = state.spec_state(unit.spec)?;
        Ok(MemoryWorkUnit::handle(
            &self.shared,
            unit_id,
            &unit.name,
            &spec.name,
        ))
    }

    async fn worker(&self) -> Result<Arc<dyn Worker>, CoordinateError> {
        let state = self.shared.state();
        let worker_id = state.attempt_state(self.id)?.worker;
        let worker = state.worker_state(worker_id)?;
        Ok(MemoryWorker::handle(
            &self.shared,
            worker_id,
            worker.namespace,
            &worker.name,
        ))
    }

    async fn status(&self) -> Result<AttemptStatus, CoordinateError> {
        let state = self.shared.state();
        Ok(state.attempt_state(self.id)?.status)
    }

    async fn data(&self) -> Result<Option<Dict>, CoordinateError> {
        let state = self.shared.state();
        Ok(state.attempt_state(self.id)?.data.clone())
    }

    async fn start_time(&self) -> Result<DateTime<Utc>, CoordinateError> {
        let state = self.shared.state();
        Ok(state.attempt_state(self.id)?.start_time)
    }

    async fn end_time(&self) -> Result<Option<DateTime<Utc>>, CoordinateError> {
        let state = self.shared.state();
        Ok(state.attempt_state(self.id)?.end_time)
    }

    async fn expiration_time(&self) -> Result<DateTime<Utc>, CoordinateError> {
        let state = self.shared.state();
        Ok(state.attempt_state(self.id)?.expiration_time)
    }

    async fn renew(&self, extend: Duration, data: Option<Dict>) -> Result<(), CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        state.renew_attempt(self.id, now, extend, data)
    }

    async fn expire(&self, data: Option<Dict>) -> Result<(), CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        state.expire_attempt(self.id, now, data)
    }

    async fn finish(&self, data: Option<Dict>) -> Result<(), CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        state.finish_attempt(self.id, now, data)
    }

    async fn fail(&self, data: Option<Dict>) -> Result<(), CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        state.fail_attempt(self.id, now, data)
    }

    async fn retry(&self, data: Option<Dict>, delay: Duration) -> Result<(), CoordinateError> {
        let now = self.shared.now();
        let mut state = self.shared.state();
        state.retry_attempt(self.id, now, data, delay)
    }
}

impl CoordState {
    fn attempt_context(
        &self,
        id: AttemptId,
    ) -> Result<(UnitId, WorkerId, AttemptStatus, bool, String), CoordinateError> {
        let attempt = self.attempt_state(id)?;
        let unit = self.unit_state(attempt.unit)?;
        let is_active = unit.active_attempt == Some(id);
        Ok((
            attempt.unit,
            attempt.worker,
            attempt.status,
            is_active,
            unit.name.clone(),
        ))
    }

    fn detach_from_worker(&mut self, attempt_id: AttemptId, worker_id: WorkerId) {
        if let Some(worker) = self.workers.get_mut(&worker_id) {
            worker.active_attempts.retain(|id| *id != attempt_id);
        }
    }

    pub(crate) fn renew_attempt(
        &mut self,
        id: AttemptId,
        now: DateTime<Utc>,
        extend: Duration,
        data: Option<Dict>,
    ) -> Result<(), CoordinateError> {
        let (unit_id, worker_id, status, is_active, unit_name) = self.attempt_context(id)?;
        match status {
            AttemptStatus::Pending | AttemptStatus::Expired => {
                if !is_active {
                    // superseded; record the expiry if it never happened
                    if status == AttemptStatus::Pending {
                        let attempt = self.attempt_state_mut(id)?;
                        attempt.status = AttemptStatus::Expired;
                        attempt.end_time = Some(now);
                        self.detach_from_worker(id, worker_id);
                    }
                    return Err(CoordinateError::LostLease {
                        work_unit: unit_name,
                    });
                }
                let lease = clamp_lease(Some(extend));
                {
                    let attempt = self.attempt_state_mut(id)?;
                    attempt.status = AttemptStatus::Pending;
                    attempt.expiration_time = now + lease;
                    attempt.end_time = None;
                    if let Some(data) = data {
                        attempt.data = Some(data);
                    }
                }
                if let Some(worker) = self.workers.get_mut(&worker_id) {
                    if !worker.active_attempts.contains(&id) {
                        worker.active_attempts.push(id);
                    }
                }
                // a lazily expired unit re-entered the queue; pull it back
                self.sweep_unit(unit_id, now);
                Ok(())
            }
            actual => Err(CoordinateError::NotPending { actual }),
        }
    }

    pub(crate) fn expire_attempt(
        &mut self,
        id: AttemptId,
        now: DateTime<Utc>,
        data: Option<Dict>,
    ) -> Result<(), CoordinateError> {
        let (unit_id, worker_id, status, is_active, _) = self.attempt_context(id)?;
        match status {
            AttemptStatus::Expired => Ok(()),
            AttemptStatus::Pending => {
                {
                    let attempt = self.attempt_state_mut(id)?;
                    attempt.status = AttemptStatus::Expired;
                    attempt.end_time = Some(now);
                    if let Some(data) = data {
                        attempt.data = Some(data);
                    }
                }
                self.detach_from_worker(id, worker_id);
                if is_active {
                    self.unit_state_mut(unit_id)?.active_attempt = None;
                }
                self.sweep_unit(unit_id, now);
                Ok(())
            }
            actual => Err(CoordinateError::NotPending { actual }),
        }
    }

    pub(crate) fn finish_attempt(
        &mut self,
        id: AttemptId,
        now: DateTime<Utc>,
        data: Option<Dict>,
    ) -> Result<(), CoordinateError> {
        let (unit_id, worker_id, status, is_active, unit_name) = self.attempt_context(id)?;
        match status {
            AttemptStatus::Finished => Ok(()),
            AttemptStatus::Pending | AttemptStatus::Expired | AttemptStatus::Failed => {
                if !is_active {
                    return Err(CoordinateError::LostLease {
                        work_unit: unit_name,
                    });
                }
                {
                    let attempt = self.attempt_state_mut(id)?;
                    attempt.status = AttemptStatus::Finished;
                    attempt.end_time = Some(now);
                    if let Some(data) = data {
                        attempt.data = Some(data);
                    }
                }
                self.detach_from_worker(id, worker_id);
                self.sweep_unit(unit_id, now);
                self.chain_from_attempt(id, now);
                Ok(())
            }
            actual => Err(CoordinateError::NotPending { actual }),
        }
    }

    pub(crate) fn fail_attempt(
        &mut self,
        id: AttemptId,
        now: DateTime<Utc>,
        data: Option<Dict>,
    ) -> Result<(), CoordinateError> {
        let (unit_id, worker_id, status, is_active, unit_name) = self.attempt_context(id)?;
        match status {
            AttemptStatus::Failed => Ok(()),
            // a Finish that won the race stands; the late Fail is a no-op
            AttemptStatus::Finished => Ok(()),
            AttemptStatus::Pending | AttemptStatus::Expired => {
                if !is_active {
                    return Err(CoordinateError::LostLease {
                        work_unit: unit_name,
                    });
                }
                {
                    let attempt = self.attempt_state_mut(id)?;
                    attempt.status = AttemptStatus::Failed;
                    attempt.end_time = Some(now);
                    if let Some(data) = data {
                        attempt.data = Some(data);
                    }
                }
                self.detach_from_worker(id, worker_id);
                self.sweep_unit(unit_id, now);
                Ok(())
            }
            actual => Err(CoordinateError::NotPending { actual }),
        }
    }

    pub(crate) fn retry_attempt(
        &mut self,
        id: AttemptId,
        now: DateTime<Utc>,
        data: Option<Dict>,
        delay: Duration,
    ) -> Result<(), CoordinateError> {
        let (unit_id, worker_id, status, is_active, unit_name) = self.attempt_context(id)?;
        match status {
            AttemptStatus::Retryable => Ok(()),
            AttemptStatus::Pending | AttemptStatus::Expired => {
                if !is_active {
                    return Err(CoordinateError::LostLease {
                        work_unit: unit_name,
                    });
                }
                {
                    let attempt = self.attempt_state_mut(id)?;
                    attempt.status = AttemptStatus::Retryable;
                    attempt.end_time = Some(now);
                    attempt.retry_delay = Some(delay);
                    if let Some(data) = data {
                        attempt.data = Some(data);
                    }
                }
                self.unit_state_mut(unit_id)?.meta.not_before = Some(now + delay);
                self.detach_from_worker(id, worker_id);
                self.sweep_unit(unit_id, now);
                Ok(())
            }
            actual => Err(CoordinateError::NotPending { actual }),
        }
    }

    /// Creates an attempt for `unit_id` and makes it the unit's active
    /// attempt, superseding a still-pending predecessor.
    pub(crate) fn create_attempt(
        &mut self,
        unit_id: UnitId,
        worker_id: WorkerId,
        now: DateTime<Utc>,
        lease: Duration,
        data: Option<Dict>,
        status: AttemptStatus,
    ) -> Result<AttemptId, CoordinateError> {
        self.check_unit(unit_id)?;
        self.check_worker(worker_id)?;
        let superseded = self.unit_state(unit_id)?.active_attempt;
        if let Some(old_id) = superseded {
            let old_worker = {
                let old = self.attempt_state_mut(old_id)?;
                if old.status == AttemptStatus::Pending {
                    old.status = AttemptStatus::Expired;
                    old.end_time = Some(now);
                    Some(old.worker)
                } else {
                    None
                }
            };
            if let Some(old_worker) = old_worker {
                self.detach_from_worker(old_id, old_worker);
            }
        }
        let id = AttemptId(self.alloc_id());
        self.attempts.insert(
            id,
            AttemptState {
                unit: unit_id,
                worker: worker_id,
                status,
                data,
                start_time: now,
                end_time: status.is_terminal().then_some(now),
                expiration_time: now + lease,
                retry_delay: None,
            },
        );
        {
            let unit = self.unit_state_mut(unit_id)?;
            unit.active_attempt = Some(id);
            unit.attempts.push(id);
        }
        {
            let worker = self.worker_state_mut(worker_id)?;
            worker.attempts.push(id);
            if status == AttemptStatus::Pending {
                worker.active_attempts.push(id);
            }
        }
        self.sweep_unit(unit_id, now);
        Ok(id)
    }

    /// The chaining side effect of a successful finish: when the attempt's
    /// data carries `output` and the owning spec names a live follow-on
    /// spec, units are generated there via regular upsert semantics.
    fn chain_from_attempt(&mut self, id: AttemptId, now: DateTime<Utc>) {
        let Some(attempt) = self.attempts.get(&id) else {
            return;
        };
        let unit_id = attempt.unit;
        let Some(output) = attempt
            .data
            .as_ref()
            .and_then(|data| data.get("output"))
            .cloned()
        else {
            return;
        };
        let Some(spec_id) = self.units.get(&unit_id).map(|unit| unit.spec) else {
            return;
        };
        let (next_name, namespace_id) = match self.specs.get(&spec_id) {
            Some(spec) => (spec.meta.next_work_spec.clone(), spec.namespace),
            None => return,
        };
        if next_name.is_empty() {
            return;
        }
        let Some(next_id) = self
            .namespaces
            .get(&namespace_id)
            .filter(|ns| !ns.tombstone)
            .and_then(|ns| ns.specs_by_name.get(&next_name))
            .copied()
        else {
            // dangling successor name: chaining is silently skipped
            return;
        };
        let entries = parse_output(&output, now);
        let generated = entries.len();
        for (name, data, meta) in entries {
            let _ = self.upsert_work_unit(next_id, &name, data, meta, now);
        }
        if generated > 0 {
            debug!(work_spec = %next_name, count = generated, "chained output into follow-on spec");
        }
    }
}

/// Decodes the `output` value of a finishing attempt: either a map from
/// new-unit name to descriptor, or a sequence of names / single-entry maps.
fn parse_output(output: &Value, now: DateTime<Utc>) -> Vec<(String, Dict, WorkUnitMeta)> {
    match output {
        Value::Object(map) => map
            .iter()
            .map(|(name, value)| descriptor(name, value, now))
            .collect(),
        Value::Array(items) => items
            .iter()
            .flat_map(|item| match item {
                Value::String(name) => {
                    vec![(name.clone(), Dict::new(), WorkUnitMeta::default())]
                }
                Value::Object(map) => map
                    .iter()
                    .map(|(name, value)| descriptor(name, value, now))
                    .collect(),
                _ => Vec::new(),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn descriptor(name: &str, value: &Value, now: DateTime<Utc>) -> (String, Dict, WorkUnitMeta) {
    match value {
        Value::Object(map) => {
            if let Some(Value::Object(data)) = map.get("data") {
                let mut meta = WorkUnitMeta::default();
                if let Some(Value::Object(raw_meta)) = map.get("meta") {
                    if let Some(priority) = raw_meta.get("priority").and_then(Value::as_f64) {
                        meta.priority = priority;
                    }
                    if let Some(delay) = raw_meta.get("delay").and_then(Value::as_f64) {
                        meta.not_before = Some(now + Duration::milliseconds((delay * 1000.0) as i64));
                    }
                }
                (name.to_string(), data.clone(), meta)
            } else {
                (name.to_string(), map.clone(), WorkUnitMeta::default())
            }
        }
        _ => (name.to_string(), Dict::new(), WorkUnitMeta::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;
    use serde_json::json;
    use test_r::test;

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    #[test]
    fn output_map_with_descriptors() {
        let output = json!({
            "u1": {"data": {"k": "v"}, "meta": {"priority": 2.0, "delay": 30}},
            "u2": {"k2": "v2"},
        });
        let mut entries = parse_output(&output, epoch());
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        check!(entries.len() == 2);
        check!(entries[0].0 == "u1");
        check!(entries[0].1.get("k") == Some(&json!("v")));
        check!(entries[0].2.priority == 2.0);
        check!(entries[0].2.not_before == Some(epoch() + Duration::seconds(30)));
        check!(entries[1].0 == "u2");
        check!(entries[1].1.get("k2") == Some(&json!("v2")));
    }

    #[test]
    fn output_sequence_of_names_and_maps() {
        let output = json!(["plain", {"named": {"data": {"x": 1}}}]);
        let entries = parse_output(&output, epoch());
        check!(entries.len() == 2);
        check!(entries[0].0 == "plain");
        check!(entries[0].1.is_empty());
        check!(entries[1].0 == "named");
        check!(entries[1].1.get("x") == Some(&json!(1)));
    }

    #[test]
    fn null_output_generates_nothing() {
        check!(parse_output(&Value::Null, epoch()).is_empty());
        check!(parse_output(&json!(42), epoch()).is_empty());
    }
}
