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

//! Work dispatch and work unit status changes.

use crate::decode;
use crate::server::{
    ok, soft, GetWorkResponse, JobServer, JobServerError, MethodResult, WorkUnitTriple,
    DEFAULT_RPC_LEASE_SECONDS,
};
use chrono::Duration;
use foreman_common::model::{AttemptRequest, Dict};
use serde_json::Value;
use tracing::debug;

impl JobServer {
    /// Asks the scheduler for work on behalf of a worker. With
    /// `max_jobs == 1` the response keeps the legacy single-triple shape;
    /// an empty batch is a valid outcome.
    pub async fn get_work(
        &self,
        worker_name: &str,
        options: &Dict,
    ) -> MethodResult<GetWorkResponse> {
        let max_jobs = match options.get("max_jobs") {
            Some(value) => decode::integer(value)
                .ok_or_else(|| JobServerError::invalid("max_jobs must be an integer"))?
                .max(1) as usize,
            None => 1,
        };
        let lease_seconds = match options.get("lease_time") {
            Some(value) => decode::number(value)
                .ok_or_else(|| JobServerError::invalid("lease_time must be a number"))?,
            None => DEFAULT_RPC_LEASE_SECONDS as f64,
        };
        let available_gb = match options.get("available_gb") {
            Some(value) => decode::number(value)
                .ok_or_else(|| JobServerError::invalid("available_gb must be a number"))?,
            None => 0.0,
        };
        let work_specs = match options.get("work_spec_names") {
            Some(value) => Some(decode::name_list(value)?),
            None => None,
        };
        let runtimes = match options.get("runtimes") {
            Some(value) => Some(decode::name_list(value)?),
            None => None,
        };

        let request = AttemptRequest {
            available_gb,
            lease_time: Some(Duration::milliseconds((lease_seconds * 1000.0) as i64)),
            number_of_work_units: max_jobs,
            runtimes,
            work_specs,
        };

        let worker = self.namespace.worker(worker_name).await?;
        let attempts = worker.request_attempts(request).await?;

        let mut triples = Vec::with_capacity(attempts.len());
        for attempt in &attempts {
            let unit = attempt.work_unit().await?;
            let data = attempt.data().await?.unwrap_or_default();
            triples.push(WorkUnitTriple {
                work_spec: unit.work_spec_name().to_string(),
                work_unit_key: unit.name().as_bytes().to_vec(),
                data,
            });
        }
        debug!(worker = worker_name, count = triples.len(), "get_work");
        if max_jobs == 1 {
            Ok(ok(GetWorkResponse::Single(triples.into_iter().next())))
        } else {
            Ok(ok(GetWorkResponse::Multiple(triples)))
        }
    }

    /// Applies a status change or lease renewal to one work unit's active
    /// attempt.
    pub async fn update_work_unit(
        &self,
        work_spec_name: &str,
        work_unit_key: &str,
        options: &Dict,
    ) -> MethodResult<bool> {
        let spec = match self.namespace.work_spec(work_spec_name).await {
            Ok(spec) => spec,
            Err(error) => return soft(error),
        };
        let unit = match spec.work_unit(work_unit_key).await {
            Ok(unit) => unit,
            Err(error) => return soft(error),
        };

        let status = match options.get("status") {
            Some(value) => Some(
                decode::integer(value)
                    .ok_or_else(|| JobServerError::invalid("status must be an integer"))?,
            ),
            None => None,
        };
        let lease_time = match options.get("lease_time") {
            Some(value) => Some(
                decode::number(value)
                    .ok_or_else(|| JobServerError::invalid("lease_time must be a number"))?,
            ),
            None => None,
        };
        let data = match options.get("data") {
            Some(Value::Object(map)) => Some(map.clone()),
            Some(_) => return Err(JobServerError::invalid("data must be a mapping")),
            None => None,
        };
        let lease = Duration::milliseconds(
            (lease_time.unwrap_or(DEFAULT_RPC_LEASE_SECONDS as f64) * 1000.0) as i64,
        );

        let attempt = unit.active_attempt().await?;
        match (attempt, status) {
            (Some(attempt), None) => {
                attempt.renew(lease, data).await?;
                Ok(ok(true))
            }
            (Some(attempt), Some(decode::WIRE_AVAILABLE)) => {
                attempt.expire(data).await?;
                Ok(ok(true))
            }
            (Some(attempt), Some(decode::WIRE_PENDING)) => {
                attempt.renew(lease, data).await?;
                Ok(ok(true))
            }
            (Some(attempt), Some(decode::WIRE_FINISHED)) => {
                attempt.finish(data).await?;
                Ok(ok(true))
            }
            (Some(attempt), Some(decode::WIRE_FAILED)) => {
                attempt.fail(data).await?;
                Ok(ok(true))
            }
            (Some(_), Some(other)) => Err(JobServerError::invalid(format!(
                "unknown work unit status {other}"
            ))),
            // with nothing to lease there is nothing to renew or expire
            (None, None) | (None, Some(decode::WIRE_AVAILABLE)) => Ok(ok(true)),
            (None, Some(_)) => Ok((
                false,
                format!("work unit {work_unit_key} has no active attempt"),
            )),
        }
    }
}
