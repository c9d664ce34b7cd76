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

use foreman_common::clock::Clock;
use foreman_common::error::CoordinateError;
use foreman_common::model::Dict;
use foreman_common::SafeDisplay;
use foreman_core::backend::Namespace;
use std::sync::Arc;

/// Default lease length applied at this layer when a request does not
/// carry one; the core's own default (15 minutes) only applies below it.
pub const DEFAULT_RPC_LEASE_SECONDS: i64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum JobServerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Coordinate(#[from] CoordinateError),
}

impl JobServerError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

impl SafeDisplay for JobServerError {
    fn to_safe_string(&self) -> String {
        match self {
            Self::InvalidRequest(_) => self.to_string(),
            Self::Coordinate(inner) => inner.to_safe_string(),
        }
    }
}

/// Result shape of every jobserver method: the primary value plus a soft
/// error message (empty when the call fully succeeded).
pub type MethodResult<T> = Result<(T, String), JobServerError>;

/// One dispatched work unit as it crosses the wire: spec name, unit key as
/// bytes, and the attempt's data dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkUnitTriple {
    pub work_spec: String,
    pub work_unit_key: Vec<u8>,
    pub data: Dict,
}

/// `get_work` with `max_jobs == 1` keeps the legacy single-triple shape;
/// larger requests return a sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum GetWorkResponse {
    Single(Option<WorkUnitTriple>),
    Multiple(Vec<WorkUnitTriple>),
}

/// The snake_case method facade over one namespace.
pub struct JobServer {
    pub(crate) namespace: Arc<dyn Namespace>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl JobServer {
    pub fn new(namespace: Arc<dyn Namespace>, clock: Arc<dyn Clock>) -> Self {
        Self { namespace, clock }
    }

    /// The namespace this server is bound to.
    pub fn namespace_handle(&self) -> Arc<dyn Namespace> {
        self.namespace.clone()
    }
}

pub(crate) fn ok<T>(value: T) -> (T, String) {
    (value, String::new())
}

/// A lookup miss on the method's principal argument is reported in the
/// message instead of as a hard error, so scripted clients can probe.
pub(crate) fn soft<T: Default>(error: CoordinateError) -> MethodResult<T> {
    if error.is_lookup_miss() {
        Ok((T::default(), error.to_safe_string()))
    } else {
        Err(error.into())
    }
}
