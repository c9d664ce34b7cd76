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

//! The backend trait surface of the coordinator.
//!
//! Every entity is addressed through a shared handle (`Arc<dyn …>`); the
//! in-memory backend in [`crate::memory`] is the reference implementation,
//! and a persistent backend would implement the same traits. Handles stay
//! valid across mutations and report [`CoordinateError::Gone`] once the
//! entity (or any ancestor) has been destroyed.

use chrono::{DateTime, Duration, Utc};
use foreman_common::error::CoordinateError;
use foreman_common::model::{
    AttemptRequest, AttemptStatus, Dict, Summary, WorkSpecMeta, WorkUnitMeta, WorkUnitQuery,
    WorkUnitStatus,
};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Root of a backend: owns namespaces.
#[async_trait::async_trait]
pub trait Coordinate: Send + Sync {
    /// Returns the named namespace, creating it if it does not exist (or if
    /// a previous incarnation was destroyed).
    async fn namespace(&self, name: &str) -> Result<Arc<dyn Namespace>, CoordinateError>;

    async fn namespaces(&self) -> Result<Vec<Arc<dyn Namespace>>, CoordinateError>;

    /// Folds work-unit status counts across every namespace.
    async fn summarize(&self) -> Result<Summary, CoordinateError>;
}

/// Named container for work specs and workers.
#[async_trait::async_trait]
pub trait Namespace: Send + Sync {
    fn name(&self) -> &str;

    /// Tombstones the namespace and everything it owns. Subsequent calls
    /// through any handle into this namespace report `Gone`.
    async fn destroy(&self) -> Result<(), CoordinateError>;

    /// Creates or updates the work spec named by `data["name"]`.
    async fn set_work_spec(&self, data: Dict) -> Result<Arc<dyn WorkSpec>, CoordinateError>;

    async fn work_spec(&self, name: &str) -> Result<Arc<dyn WorkSpec>, CoordinateError>;

    async fn destroy_work_spec(&self, name: &str) -> Result<(), CoordinateError>;

    async fn work_spec_names(&self) -> Result<Vec<String>, CoordinateError>;

    /// Returns the named worker, registering it on first sight.
    async fn worker(&self, name: &str) -> Result<Arc<dyn Worker>, CoordinateError>;

    async fn workers(&self) -> Result<HashMap<String, Arc<dyn Worker>>, CoordinateError>;

    async fn summarize(&self) -> Result<Summary, CoordinateError>;
}

/// A job template owning its work units and their dispatch queue.
#[async_trait::async_trait]
pub trait WorkSpec: Send + Sync {
    fn name(&self) -> &str;

    fn namespace_name(&self) -> &str;

    async fn data(&self) -> Result<Dict, CoordinateError>;

    /// Replaces the data dictionary and re-derives the metadata from it.
    /// Fails with `ChangedName` if `data["name"]` differs from the spec's
    /// name.
    async fn set_data(&self, data: Dict) -> Result<(), CoordinateError>;

    /// Snapshot of the scheduling metadata. `with_counts` additionally runs
    /// lazy expiry and fills `available_count` / `pending_count`.
    async fn meta(&self, with_counts: bool) -> Result<WorkSpecMeta, CoordinateError>;

    async fn set_meta(&self, meta: WorkSpecMeta) -> Result<(), CoordinateError>;

    /// Upserts a work unit. A terminal unit is reset to Available; a live
    /// one has its data and metadata updated in place.
    async fn add_work_unit(
        &self,
        name: &str,
        data: Dict,
        meta: WorkUnitMeta,
    ) -> Result<Arc<dyn WorkUnit>, CoordinateError>;

    async fn work_unit(&self, name: &str) -> Result<Arc<dyn WorkUnit>, CoordinateError>;

    async fn work_units(
        &self,
        query: &WorkUnitQuery,
    ) -> Result<Vec<Arc<dyn WorkUnit>>, CoordinateError>;

    async fn count_work_unit_status(
        &self,
    ) -> Result<HashMap<WorkUnitStatus, usize>, CoordinateError>;

    async fn set_work_unit_priorities(
        &self,
        query: &WorkUnitQuery,
        priority: f64,
    ) -> Result<(), CoordinateError>;

    async fn adjust_work_unit_priorities(
        &self,
        query: &WorkUnitQuery,
        adjustment: f64,
    ) -> Result<(), CoordinateError>;

    /// Tombstones the matched units and detaches their attempts from the
    /// workers holding them. Returns how many units were deleted.
    async fn delete_work_units(&self, query: &WorkUnitQuery) -> Result<usize, CoordinateError>;

    async fn summarize(&self) -> Result<Summary, CoordinateError>;
}

/// One job instance, belonging to exactly one work spec for its lifetime.
#[async_trait::async_trait]
pub trait WorkUnit: Send + Sync {
    fn name(&self) -> &str;

    fn work_spec_name(&self) -> &str;

    async fn data(&self) -> Result<Dict, CoordinateError>;

    /// The derived status; observation runs lazy lease expiry first.
    async fn status(&self) -> Result<WorkUnitStatus, CoordinateError>;

    async fn meta(&self) -> Result<WorkUnitMeta, CoordinateError>;

    async fn set_meta(&self, meta: WorkUnitMeta) -> Result<(), CoordinateError>;

    async fn priority(&self) -> Result<f64, CoordinateError>;

    async fn set_priority(&self, priority: f64) -> Result<(), CoordinateError>;

    async fn active_attempt(&self) -> Result<Option<Arc<dyn Attempt>>, CoordinateError>;

    async fn attempts(&self) -> Result<Vec<Arc<dyn Attempt>>, CoordinateError>;

    async fn attempt_count(&self) -> Result<usize, CoordinateError>;

    /// Drops the active attempt reference without touching the attempt's
    /// own status; the unit becomes takeable again.
    async fn clear_active_attempt(&self) -> Result<(), CoordinateError>;

    fn as_any(&self) -> &dyn Any;
}

/// A lease held by a worker on one work unit.
#[async_trait::async_trait]
pub trait Attempt: Send + Sync {
    async fn work_unit(&self) -> Result<Arc<dyn WorkUnit>, CoordinateError>;

    async fn worker(&self) -> Result<Arc<dyn Worker>, CoordinateError>;

    async fn status(&self) -> Result<AttemptStatus, CoordinateError>;

    async fn data(&self) -> Result<Option<Dict>, CoordinateError>;

    async fn start_time(&self) -> Result<DateTime<Utc>, CoordinateError>;

    async fn end_time(&self) -> Result<Option<DateTime<Utc>>, CoordinateError>;

    async fn expiration_time(&self) -> Result<DateTime<Utc>, CoordinateError>;

    /// Extends the lease. Valid while Pending, or Expired as long as no
    /// newer attempt has superseded this one; otherwise reports
    /// `LostLease`.
    async fn renew(&self, extend: Duration, data: Option<Dict>) -> Result<(), CoordinateError>;

    /// Gives the lease up; the unit returns to the available queue.
    /// Idempotent on an already expired attempt.
    async fn expire(&self, data: Option<Dict>) -> Result<(), CoordinateError>;

    /// Marks the unit done. When the final data carries an `output` key and
    /// the owning spec names a follow-on spec, units are generated there.
    async fn finish(&self, data: Option<Dict>) -> Result<(), CoordinateError>;

    async fn fail(&self, data: Option<Dict>) -> Result<(), CoordinateError>;

    /// Ends this attempt as Retryable and delays the unit by `delay`.
    async fn retry(&self, data: Option<Dict>, delay: Duration) -> Result<(), CoordinateError>;
}

/// A registered executor of work units. Workers form a parent/child tree.
#[async_trait::async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    async fn parent(&self) -> Result<Option<Arc<dyn Worker>>, CoordinateError>;

    /// Re-links this worker under `parent` (or detaches it); both sides of
    /// the bidirectional edge are updated atomically.
    async fn set_parent(&self, parent: Option<&Arc<dyn Worker>>) -> Result<(), CoordinateError>;

    async fn children(&self) -> Result<Vec<Arc<dyn Worker>>, CoordinateError>;

    async fn active(&self) -> Result<bool, CoordinateError>;

    async fn deactivate(&self) -> Result<(), CoordinateError>;

    async fn mode(&self) -> Result<String, CoordinateError>;

    async fn data(&self) -> Result<Option<Dict>, CoordinateError>;

    async fn expiration(&self) -> Result<DateTime<Utc>, CoordinateError>;

    async fn last_update(&self) -> Result<DateTime<Utc>, CoordinateError>;

    /// Heartbeat: stores the latest payload and re-activates the worker.
    async fn update(
        &self,
        data: Option<Dict>,
        now: DateTime<Utc>,
        expiration: DateTime<Utc>,
        mode: &str,
    ) -> Result<(), CoordinateError>;

    async fn active_attempts(&self) -> Result<Vec<Arc<dyn Attempt>>, CoordinateError>;

    async fn all_attempts(&self) -> Result<Vec<Arc<dyn Attempt>>, CoordinateError>;

    /// Union of the children's active attempts.
    async fn child_attempts(&self) -> Result<Vec<Arc<dyn Attempt>>, CoordinateError>;

    /// Asks the scheduler for work. An empty batch is a valid outcome, not
    /// an error.
    async fn request_attempts(
        &self,
        request: AttemptRequest,
    ) -> Result<Vec<Arc<dyn Attempt>>, CoordinateError>;

    /// Forcibly leases `work_unit` to this worker, bypassing scheduling.
    /// The unit must come from the same backend.
    async fn make_attempt(
        &self,
        work_unit: &Arc<dyn WorkUnit>,
        lifetime: Option<Duration>,
    ) -> Result<Arc<dyn Attempt>, CoordinateError>;

    fn as_any(&self) -> &dyn Any;
}
