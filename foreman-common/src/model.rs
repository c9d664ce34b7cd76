use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Opaque user dictionary: a string-keyed map of tagged values. All loosely
/// typed data flowing through the coordinator (work spec data, work unit
/// data, attempt data) uses this shape.
pub type Dict = serde_json::Map<String, serde_json::Value>;

/// Default lease length for attempts when the caller does not specify one.
pub const DEFAULT_LEASE_SECONDS: i64 = 15 * 60;

/// Smallest lease length a caller may request.
pub const MIN_LEASE_SECONDS: i64 = 1;

/// Largest lease length a caller may request.
pub const MAX_LEASE_SECONDS: i64 = 24 * 60 * 60;

/// Default lifetime of a worker registration before it is considered expired.
pub const DEFAULT_WORKER_LIFETIME_SECONDS: i64 = 15 * 60;

/// Default work spec weight when neither `weight` nor `nice` is given.
pub const DEFAULT_WEIGHT: i32 = 20;

pub fn default_lease() -> Duration {
    Duration::seconds(DEFAULT_LEASE_SECONDS)
}

pub fn default_worker_lifetime() -> Duration {
    Duration::seconds(DEFAULT_WORKER_LIFETIME_SECONDS)
}

/// Clamps a requested lease length into the allowed range, substituting the
/// default for zero or negative requests.
pub fn clamp_lease(requested: Option<Duration>) -> Duration {
    match requested {
        None => default_lease(),
        Some(lease) if lease <= Duration::zero() => default_lease(),
        Some(lease) if lease < Duration::seconds(MIN_LEASE_SECONDS) => {
            Duration::seconds(MIN_LEASE_SECONDS)
        }
        Some(lease) if lease > Duration::seconds(MAX_LEASE_SECONDS) => {
            Duration::seconds(MAX_LEASE_SECONDS)
        }
        Some(lease) => lease,
    }
}

/// Derived status of a work unit. Never stored; always recomputed from the
/// unit's active attempt and `not_before`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum WorkUnitStatus {
    Available,
    Pending,
    Finished,
    Failed,
    Delayed,
}

impl Display for WorkUnitStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkUnitStatus::Available => write!(f, "available"),
            WorkUnitStatus::Pending => write!(f, "pending"),
            WorkUnitStatus::Finished => write!(f, "finished"),
            WorkUnitStatus::Failed => write!(f, "failed"),
            WorkUnitStatus::Delayed => write!(f, "delayed"),
        }
    }
}

/// Status of one attempt, the lease a worker holds on a work unit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum AttemptStatus {
    Pending,
    Expired,
    Finished,
    Failed,
    Retryable,
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptStatus::Finished | AttemptStatus::Failed)
    }
}

impl Display for AttemptStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptStatus::Pending => write!(f, "pending"),
            AttemptStatus::Expired => write!(f, "expired"),
            AttemptStatus::Finished => write!(f, "finished"),
            AttemptStatus::Failed => write!(f, "failed"),
            AttemptStatus::Retryable => write!(f, "retryable"),
        }
    }
}

/// Metadata controlling how a work spec is scheduled. Derived from the
/// spec's data dictionary and adjustable afterwards, except for the fields
/// noted as immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkSpecMeta {
    /// Higher priority specs are always preferred.
    pub priority: i32,
    /// Relative share among specs of equal priority; always at least 1.
    pub weight: i32,
    pub paused: bool,
    /// Whether the spec may synthesize work units on demand.
    pub continuous: bool,
    /// Immutable: whether `continuous` may ever be turned on.
    pub can_be_continuous: bool,
    /// Minimum memory a worker must advertise to receive this spec's units.
    pub min_memory_gb: f64,
    /// Spacing between synthesized continuous units.
    #[serde(with = "duration_seconds")]
    pub interval: Duration,
    /// Earliest time the next continuous unit may be emitted.
    pub next_continuous: Option<DateTime<Utc>>,
    /// Cap on concurrently pending attempts; zero means unlimited.
    pub max_running: usize,
    /// Cap on attempts handed out per scheduling request; zero means unlimited.
    pub max_attempts_returned: usize,
    /// Cap on total attempts per work unit; zero means unlimited.
    pub max_retries: usize,
    /// Immutable: name of the follow-on spec for chained output.
    pub next_work_spec: String,
    /// Whether the follow-on spec outranks this one while it has work.
    pub next_work_spec_preempts: bool,
    /// Immutable: tag workers match against when requesting attempts.
    pub runtime: String,
    /// Live count of available units; populated by `meta(with_counts)`.
    pub available_count: usize,
    /// Live count of pending units; populated by `meta(with_counts)`.
    pub pending_count: usize,
}

impl Default for WorkSpecMeta {
    fn default() -> Self {
        Self {
            priority: 0,
            weight: DEFAULT_WEIGHT,
            paused: false,
            continuous: false,
            can_be_continuous: false,
            min_memory_gb: 0.0,
            interval: Duration::zero(),
            next_continuous: None,
            max_running: 0,
            max_attempts_returned: 0,
            max_retries: 0,
            next_work_spec: String::new(),
            next_work_spec_preempts: true,
            runtime: String::new(),
            available_count: 0,
            pending_count: 0,
        }
    }
}

mod duration_seconds {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        value.num_seconds().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::seconds(i64::deserialize(deserializer)?))
    }
}

/// Metadata of one work unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnitMeta {
    /// Scheduling priority within the owning spec; ties break by name.
    pub priority: f64,
    /// Earliest time the unit may be handed out; `None` means immediately.
    pub not_before: Option<DateTime<Utc>>,
}

impl Default for WorkUnitMeta {
    fn default() -> Self {
        Self {
            priority: 0.0,
            not_before: None,
        }
    }
}

/// Filter for bulk work-unit operations.
///
/// Empty `names` and `statuses` match everything; when both are set a unit
/// must satisfy both. `previous_name` is an exclusive lexicographic lower
/// bound. A positive `limit` sorts the result by name ascending and
/// truncates it; zero leaves the result unsorted and unbounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkUnitQuery {
    pub names: Vec<String>,
    pub statuses: Vec<WorkUnitStatus>,
    pub previous_name: Option<String>,
    pub limit: usize,
}

impl WorkUnitQuery {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            names: vec![name.into()],
            ..Self::default()
        }
    }

    pub fn matches(&self, name: &str, status: WorkUnitStatus) -> bool {
        if !self.names.is_empty() && !self.names.iter().any(|n| n == name) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&status) {
            return false;
        }
        if let Some(previous) = &self.previous_name {
            if name <= previous.as_str() {
                return false;
            }
        }
        true
    }
}

/// What a worker asks for when requesting attempts.
#[derive(Debug, Clone)]
pub struct AttemptRequest {
    /// Memory the worker advertises; matched against `min_memory_gb` when
    /// positive.
    pub available_gb: f64,
    /// Requested lease length; clamped into the allowed range, defaulted
    /// when absent.
    pub lease_time: Option<Duration>,
    /// Upper bound on attempts returned by this request.
    pub number_of_work_units: usize,
    /// Runtime tags the worker can execute; `None` is a wildcard.
    pub runtimes: Option<Vec<String>>,
    /// Optional whitelist of work spec names.
    pub work_specs: Option<Vec<String>>,
}

impl Default for AttemptRequest {
    fn default() -> Self {
        Self {
            available_gb: 0.0,
            lease_time: None,
            number_of_work_units: 1,
            runtimes: None,
            work_specs: None,
        }
    }
}

/// One row of a status summary: how many units of one spec are in one
/// status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub namespace: String,
    pub work_spec: String,
    pub status: WorkUnitStatus,
    pub count: usize,
}

/// Fold of `(namespace, work spec, status)` counts across part or all of
/// the entity tree, for external observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub entries: Vec<SummaryEntry>,
}

impl Summary {
    pub fn record(
        &mut self,
        namespace: &str,
        work_spec: &str,
        status: WorkUnitStatus,
        count: usize,
    ) {
        if count == 0 {
            return;
        }
        let existing = self.entries.iter_mut().find(|entry| {
            entry.namespace == namespace && entry.work_spec == work_spec && entry.status == status
        });
        match existing {
            Some(entry) => entry.count += count,
            None => self.entries.push(SummaryEntry {
                namespace: namespace.to_string(),
                work_spec: work_spec.to_string(),
                status,
                count,
            }),
        }
    }

    pub fn merge(&mut self, other: Summary) {
        for entry in other.entries {
            self.record(&entry.namespace, &entry.work_spec, entry.status, entry.count);
        }
    }

    /// Orders entries by `(namespace, work_spec, status)` for stable output.
    pub fn sort(&mut self) {
        self.entries.sort();
    }
}
