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

//! ID-keyed entity arenas.
//!
//! Workers reference attempts, attempts reference units and workers, and
//! workers reference each other; all of those edges are plain IDs into the
//! tables below, never owning pointers. The whole tree lives under one
//! mutex (held by [`super::Shared`]); entities are tombstoned in place and
//! never removed, so a stale handle resolves to a `Gone` error instead of
//! dangling.

use crate::memory::queue::AvailableQueue;
use chrono::{DateTime, Duration, Utc};
use foreman_common::error::{CoordinateError, EntityKind};
use foreman_common::model::{AttemptStatus, Dict, WorkSpecMeta, WorkUnitMeta, WorkUnitStatus};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NamespaceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct SpecId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct UnitId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct AttemptId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct WorkerId(pub u64);

#[derive(Debug)]
pub(crate) struct NamespaceState {
    pub name: String,
    pub tombstone: bool,
    pub specs_by_name: BTreeMap<String, SpecId>,
    pub workers_by_name: BTreeMap<String, WorkerId>,
}

#[derive(Debug)]
pub(crate) struct SpecState {
    pub name: String,
    pub namespace: NamespaceId,
    pub data: Dict,
    pub meta: WorkSpecMeta,
    pub units_by_name: BTreeMap<String, UnitId>,
    pub available: AvailableQueue,
    pub tombstone: bool,
}

#[derive(Debug)]
pub(crate) struct UnitState {
    pub name: String,
    pub spec: SpecId,
    pub data: Dict,
    pub meta: WorkUnitMeta,
    pub active_attempt: Option<AttemptId>,
    pub attempts: Vec<AttemptId>,
    /// 1-based position in the owning spec's available queue; 0 when not
    /// queued. Maintained by [`AvailableQueue`] on every swap.
    pub available_index: usize,
    pub tombstone: bool,
}

#[derive(Debug)]
pub(crate) struct AttemptState {
    pub unit: UnitId,
    pub worker: WorkerId,
    pub status: AttemptStatus,
    pub data: Option<Dict>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub expiration_time: DateTime<Utc>,
    pub retry_delay: Option<Duration>,
}

#[derive(Debug)]
pub(crate) struct WorkerState {
    pub name: String,
    pub namespace: NamespaceId,
    pub parent: Option<WorkerId>,
    pub children: BTreeSet<WorkerId>,
    pub data: Option<Dict>,
    pub active: bool,
    pub mode: String,
    pub expiration: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub active_attempts: Vec<AttemptId>,
    pub attempts: Vec<AttemptId>,
    pub tombstone: bool,
}

#[derive(Debug, Default)]
pub(crate) struct CoordState {
    next_id: u64,
    pub namespaces_by_name: HashMap<String, NamespaceId>,
    pub namespaces: HashMap<NamespaceId, NamespaceState>,
    pub specs: HashMap<SpecId, SpecState>,
    pub units: HashMap<UnitId, UnitState>,
    pub attempts: HashMap<AttemptId, AttemptState>,
    pub workers: HashMap<WorkerId, WorkerState>,
}

/// Status derivation. Pure; an overdue pending lease already reads as no
/// longer pending here, the mutating sweep merely records that fact.
pub(crate) fn derived_status(
    unit: &UnitState,
    attempts: &HashMap<AttemptId, AttemptState>,
    now: DateTime<Utc>,
) -> WorkUnitStatus {
    if let Some(attempt_id) = unit.active_attempt {
        if let Some(attempt) = attempts.get(&attempt_id) {
            match attempt.status {
                AttemptStatus::Pending if attempt.expiration_time >= now => {
                    return WorkUnitStatus::Pending
                }
                AttemptStatus::Pending => {}
                AttemptStatus::Finished => return WorkUnitStatus::Finished,
                AttemptStatus::Failed => return WorkUnitStatus::Failed,
                AttemptStatus::Expired | AttemptStatus::Retryable => {}
            }
        }
    }
    match unit.meta.not_before {
        Some(not_before) if not_before > now => WorkUnitStatus::Delayed,
        _ => WorkUnitStatus::Available,
    }
}

impl CoordState {
    pub fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn namespace_state(&self, id: NamespaceId) -> Result<&NamespaceState, CoordinateError> {
        match self.namespaces.get(&id) {
            Some(ns) if !ns.tombstone => Ok(ns),
            Some(ns) => Err(CoordinateError::gone(EntityKind::Namespace, &ns.name)),
            None => Err(CoordinateError::gone(EntityKind::Namespace, "?")),
        }
    }

    pub fn namespace_state_mut(
        &mut self,
        id: NamespaceId,
    ) -> Result<&mut NamespaceState, CoordinateError> {
        match self.namespaces.get_mut(&id) {
            Some(ns) if !ns.tombstone => Ok(ns),
            Some(ns) => Err(CoordinateError::gone(EntityKind::Namespace, &ns.name)),
            None => Err(CoordinateError::gone(EntityKind::Namespace, "?")),
        }
    }

    pub fn check_namespace(&self, id: NamespaceId) -> Result<(), CoordinateError> {
        self.namespace_state(id).map(|_| ())
    }

    pub fn check_spec(&self, id: SpecId) -> Result<(), CoordinateError> {
        match self.specs.get(&id) {
            Some(spec) if !spec.tombstone => self.check_namespace(spec.namespace),
            Some(spec) => Err(CoordinateError::gone(EntityKind::WorkSpec, &spec.name)),
            None => Err(CoordinateError::gone(EntityKind::WorkSpec, "?")),
        }
    }

    pub fn spec_state(&self, id: SpecId) -> Result<&SpecState, CoordinateError> {
        self.check_spec(id)?;
        self.specs
            .get(&id)
            .ok_or_else(|| CoordinateError::gone(EntityKind::WorkSpec, "?"))
    }

    pub fn spec_state_mut(&mut self, id: SpecId) -> Result<&mut SpecState, CoordinateError> {
        self.check_spec(id)?;
        self.specs
            .get_mut(&id)
            .ok_or_else(|| CoordinateError::gone(EntityKind::WorkSpec, "?"))
    }

    pub fn check_unit(&self, id: UnitId) -> Result<(), CoordinateError> {
        match self.units.get(&id) {
            Some(unit) if !unit.tombstone => self.check_spec(unit.spec),
            Some(unit) => Err(CoordinateError::gone(EntityKind::WorkUnit, &unit.name)),
            None => Err(CoordinateError::gone(EntityKind::WorkUnit, "?")),
        }
    }

    pub fn unit_state(&self, id: UnitId) -> Result<&UnitState, CoordinateError> {
        self.check_unit(id)?;
        self.units
            .get(&id)
            .ok_or_else(|| CoordinateError::gone(EntityKind::WorkUnit, "?"))
    }

    pub fn unit_state_mut(&mut self, id: UnitId) -> Result<&mut UnitState, CoordinateError> {
        self.check_unit(id)?;
        self.units
            .get_mut(&id)
            .ok_or_else(|| CoordinateError::gone(EntityKind::WorkUnit, "?"))
    }

    pub fn check_worker(&self, id: WorkerId) -> Result<(), CoordinateError> {
        match self.workers.get(&id) {
            Some(worker) if !worker.tombstone => self.check_namespace(worker.namespace),
            Some(worker) => Err(CoordinateError::gone(EntityKind::Worker, &worker.name)),
            None => Err(CoordinateError::gone(EntityKind::Worker, "?")),
        }
    }

    pub fn worker_state(&self, id: WorkerId) -> Result<&WorkerState, CoordinateError> {
        self.check_worker(id)?;
        self.workers
            .get(&id)
            .ok_or_else(|| CoordinateError::gone(EntityKind::Worker, "?"))
    }

    pub fn worker_state_mut(&mut self, id: WorkerId) -> Result<&mut WorkerState, CoordinateError> {
        self.check_worker(id)?;
        self.workers
            .get_mut(&id)
            .ok_or_else(|| CoordinateError::gone(EntityKind::Worker, "?"))
    }

    pub fn check_attempt(&self, id: AttemptId) -> Result<(), CoordinateError> {
        match self.attempts.get(&id) {
            Some(attempt) => self.check_unit(attempt.unit),
            None => Err(CoordinateError::gone(EntityKind::Attempt, "?")),
        }
    }

    pub fn attempt_state(&self, id: AttemptId) -> Result<&AttemptState, CoordinateError> {
        self.check_attempt(id)?;
        self.attempts
            .get(&id)
            .ok_or_else(|| CoordinateError::gone(EntityKind::Attempt, "?"))
    }

    pub fn attempt_state_mut(
        &mut self,
        id: AttemptId,
    ) -> Result<&mut AttemptState, CoordinateError> {
        self.check_attempt(id)?;
        self.attempts
            .get_mut(&id)
            .ok_or_else(|| CoordinateError::gone(EntityKind::Attempt, "?"))
    }

    pub fn unit_status(&self, id: UnitId, now: DateTime<Utc>) -> Option<WorkUnitStatus> {
        let unit = self.units.get(&id)?;
        Some(derived_status(unit, &self.attempts, now))
    }

    /// Lazy expiry and queue reconciliation for one unit: an overdue
    /// pending lease transitions to Expired (the attempt stays the unit's
    /// active attempt so a late renewal can revive it), and the unit's
    /// queue membership is brought in line with its derived status.
    pub fn sweep_unit(&mut self, unit_id: UnitId, now: DateTime<Utc>) {
        let (spec_id, status) = {
            let CoordState {
                units,
                attempts,
                workers,
                ..
            } = self;
            let Some(unit) = units.get(&unit_id) else {
                return;
            };
            if unit.tombstone {
                return;
            }
            if let Some(attempt_id) = unit.active_attempt {
                if let Some(attempt) = attempts.get_mut(&attempt_id) {
                    if attempt.status == AttemptStatus::Pending && attempt.expiration_time < now {
                        attempt.status = AttemptStatus::Expired;
                        attempt.end_time = Some(now);
                        if let Some(worker) = workers.get_mut(&attempt.worker) {
                            worker.active_attempts.retain(|id| *id != attempt_id);
                        }
                    }
                }
            }
            (unit.spec, derived_status(unit, attempts, now))
        };
        let CoordState { units, specs, .. } = self;
        let Some(spec) = specs.get_mut(&spec_id) else {
            return;
        };
        match status {
            WorkUnitStatus::Available => spec.available.push(units, unit_id),
            _ => spec.available.remove(units, unit_id),
        }
    }

    pub fn sweep_spec(&mut self, spec_id: SpecId, now: DateTime<Utc>) {
        let unit_ids: Vec<UnitId> = match self.specs.get(&spec_id) {
            Some(spec) if !spec.tombstone => spec.units_by_name.values().copied().collect(),
            _ => return,
        };
        for unit_id in unit_ids {
            self.sweep_unit(unit_id, now);
        }
    }

    pub fn sweep_namespace(&mut self, namespace_id: NamespaceId, now: DateTime<Utc>) {
        let spec_ids: Vec<SpecId> = match self.namespaces.get(&namespace_id) {
            Some(ns) if !ns.tombstone => ns.specs_by_name.values().copied().collect(),
            _ => return,
        };
        for spec_id in spec_ids {
            self.sweep_spec(spec_id, now);
        }
    }

    /// Counts units of a swept spec by derived status.
    pub fn count_statuses(
        &self,
        spec_id: SpecId,
        now: DateTime<Utc>,
    ) -> HashMap<WorkUnitStatus, usize> {
        let mut counts = HashMap::new();
        if let Some(spec) = self.specs.get(&spec_id) {
            for unit_id in spec.units_by_name.values() {
                if let Some(status) = self.unit_status(*unit_id, now) {
                    *counts.entry(status).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    pub fn pending_count(&self, spec_id: SpecId, now: DateTime<Utc>) -> usize {
        match self.specs.get(&spec_id) {
            Some(spec) => spec
                .units_by_name
                .values()
                .filter(|unit_id| {
                    self.unit_status(**unit_id, now) == Some(WorkUnitStatus::Pending)
                })
                .count(),
            None => 0,
        }
    }

    pub fn reprioritize(&mut self, unit_id: UnitId) {
        let Some(spec_id) = self.units.get(&unit_id).map(|unit| unit.spec) else {
            return;
        };
        let CoordState { units, specs, .. } = self;
        if let Some(spec) = specs.get_mut(&spec_id) {
            spec.available.reprioritize(units, unit_id);
        }
    }

    /// Upsert semantics of `add_work_unit`: a terminal unit is reset to
    /// Available (its attempt history survives), a live one has its data
    /// and metadata replaced without disturbing its state.
    pub fn upsert_work_unit(
        &mut self,
        spec_id: SpecId,
        name: &str,
        data: Dict,
        meta: WorkUnitMeta,
        now: DateTime<Utc>,
    ) -> Result<UnitId, CoordinateError> {
        self.check_spec(spec_id)?;
        let existing = self
            .specs
            .get(&spec_id)
            .and_then(|spec| spec.units_by_name.get(name))
            .copied();
        match existing {
            Some(unit_id) => {
                self.sweep_unit(unit_id, now);
                let status = self
                    .unit_status(unit_id, now)
                    .unwrap_or(WorkUnitStatus::Available);
                let unit = self.unit_state_mut(unit_id)?;
                unit.data = data;
                unit.meta = meta;
                if matches!(status, WorkUnitStatus::Finished | WorkUnitStatus::Failed) {
                    unit.active_attempt = None;
                }
                self.reprioritize(unit_id);
                self.sweep_unit(unit_id, now);
                Ok(unit_id)
            }
            None => {
                let unit_id = UnitId(self.alloc_id());
                self.units.insert(
                    unit_id,
                    UnitState {
                        name: name.to_string(),
                        spec: spec_id,
                        data,
                        meta,
                        active_attempt: None,
                        attempts: Vec::new(),
                        available_index: 0,
                        tombstone: false,
                    },
                );
                let spec = self.spec_state_mut(spec_id)?;
                spec.units_by_name.insert(name.to_string(), unit_id);
                self.sweep_unit(unit_id, now);
                Ok(unit_id)
            }
        }
    }
}
