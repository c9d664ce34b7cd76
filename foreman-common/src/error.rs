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

use crate::SafeDisplay;

/// The kind of entity an error refers to; carried so that `Gone` errors can
/// name what was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Namespace,
    WorkSpec,
    WorkUnit,
    Worker,
    Attempt,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Namespace => write!(f, "namespace"),
            EntityKind::WorkSpec => write!(f, "work spec"),
            EntityKind::WorkUnit => write!(f, "work unit"),
            EntityKind::Worker => write!(f, "worker"),
            EntityKind::Attempt => write!(f, "attempt"),
        }
    }
}

/// Error taxonomy of the coordinator core. Every failure is returned
/// explicitly as one of these kinds; the core never signals out of band.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinateError {
    /// The addressed entity has been tombstoned; the caller should discard
    /// its handle.
    #[error("{kind} {name} is gone")]
    Gone { kind: EntityKind, name: String },

    #[error("no such namespace: {name}")]
    NoSuchNamespace { name: String },

    #[error("no such work spec: {name}")]
    NoSuchWorkSpec { name: String },

    #[error("no such work unit: {name}")]
    NoSuchWorkUnit { name: String },

    /// The attempt is no longer the active attempt of its work unit.
    #[error("lost lease on work unit {work_unit}")]
    LostLease { work_unit: String },

    /// A state-machine violation, e.g. renewing a finished attempt.
    #[error("attempt is in state {actual}, not pending")]
    NotPending { actual: crate::model::AttemptStatus },

    #[error("work spec name may not change (was {current}, got {proposed})")]
    ChangedName { current: String, proposed: String },

    #[error("invalid work spec data: {reason}")]
    BadWorkSpec { reason: String },

    #[error("work spec data has no name")]
    NoWorkSpecName,

    /// The entity handle belongs to a different backend instance.
    #[error("entity belongs to a different backend")]
    WrongBackend,
}

impl CoordinateError {
    pub fn gone(kind: EntityKind, name: impl Into<String>) -> Self {
        Self::Gone {
            kind,
            name: name.into(),
        }
    }

    pub fn bad_work_spec(reason: impl Into<String>) -> Self {
        Self::BadWorkSpec {
            reason: reason.into(),
        }
    }

    /// Whether this error is the stale-handle signal the caching proxy
    /// consumes and retries on.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone { .. })
    }

    pub fn is_lookup_miss(&self) -> bool {
        matches!(
            self,
            Self::NoSuchNamespace { .. } | Self::NoSuchWorkSpec { .. } | Self::NoSuchWorkUnit { .. }
        )
    }
}

impl SafeDisplay for CoordinateError {
    fn to_safe_string(&self) -> String {
        // No variant wraps internal state; all messages are already safe.
        self.to_string()
    }
}
