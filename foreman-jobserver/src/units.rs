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

//! Bulk work unit administration.

use crate::decode;
use crate::server::{ok, soft, JobServer, JobServerError, MethodResult};
use chrono::{DateTime, Duration, Utc};
use foreman_common::model::{Dict, WorkUnitMeta, WorkUnitQuery};
use serde_json::Value;
use std::collections::HashMap;

/// One incoming work unit: a bare name, a `[name, data, meta?]` sequence,
/// or a `{name, data?, meta?}` mapping.
fn decode_unit_entry(
    entry: &Value,
    now: DateTime<Utc>,
) -> Result<(String, Dict, WorkUnitMeta), JobServerError> {
    match entry {
        Value::Array(items) if decode::text(entry).is_none() => {
            let name = items
                .first()
                .and_then(decode::text)
                .ok_or_else(|| JobServerError::invalid("work unit entry has no name"))?;
            let data = match items.get(1) {
                None | Some(Value::Null) => Dict::new(),
                Some(Value::Object(map)) => map.clone(),
                Some(_) => {
                    return Err(JobServerError::invalid("work unit data must be a mapping"))
                }
            };
            let meta = match items.get(2) {
                None | Some(Value::Null) => WorkUnitMeta::default(),
                Some(value) => decode_unit_meta(value, now)?,
            };
            Ok((name, data, meta))
        }
        Value::Object(map) => {
            let name = map
                .get("name")
                .and_then(decode::text)
                .ok_or_else(|| JobServerError::invalid("work unit entry has no name"))?;
            let data = match map.get("data") {
                None | Some(Value::Null) => Dict::new(),
                Some(Value::Object(data)) => data.clone(),
                Some(_) => {
                    return Err(JobServerError::invalid("work unit data must be a mapping"))
                }
            };
            let meta = match map.get("meta") {
                None | Some(Value::Null) => WorkUnitMeta::default(),
                Some(value) => decode_unit_meta(value, now)?,
            };
            Ok((name, data, meta))
        }
        other => match decode::text(other) {
            Some(name) => Ok((name, Dict::new(), WorkUnitMeta::default())),
            None => Err(JobServerError::invalid("unrecognized work unit entry")),
        },
    }
}

fn decode_unit_meta(value: &Value, now: DateTime<Utc>) -> Result<WorkUnitMeta, JobServerError> {
    let Value::Object(map) = value else {
        return Err(JobServerError::invalid("work unit meta must be a mapping"));
    };
    let mut meta = WorkUnitMeta::default();
    if let Some(priority) = map.get("priority") {
        meta.priority = decode::number(priority)
            .ok_or_else(|| JobServerError::invalid("priority must be a number"))?;
    }
    if let Some(delay) = map.get("delay") {
        let seconds = decode::number(delay)
            .ok_or_else(|| JobServerError::invalid("delay must be a number"))?;
        meta.not_before = Some(now + Duration::milliseconds((seconds * 1000.0) as i64));
    }
    Ok(meta)
}

/// Builds a core query from `work_unit_keys` / `state` / `limit` / `start`
/// options.
fn query_from_options(options: &Dict) -> Result<WorkUnitQuery, JobServerError> {
    let mut query = WorkUnitQuery::default();
    if let Some(keys) = options.get("work_unit_keys") {
        query.names = decode::name_list(keys)?;
    }
    if let Some(state) = options.get("state") {
        let wire_values: Vec<i64> = match state {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    decode::integer(item)
                        .ok_or_else(|| JobServerError::invalid("state must be an integer"))
                })
                .collect::<Result<_, _>>()?,
            other => vec![decode::integer(other)
                .ok_or_else(|| JobServerError::invalid("state must be an integer"))?],
        };
        for wire_value in wire_values {
            query.statuses.extend(decode::statuses_from_wire(wire_value)?);
        }
    }
    if let Some(limit) = options.get("limit") {
        query.limit = decode::integer(limit)
            .ok_or_else(|| JobServerError::invalid("limit must be an integer"))?
            .max(0) as usize;
    }
    if let Some(start) = options.get("start") {
        query.previous_name = decode::text(start);
    }
    Ok(query)
}

impl JobServer {
    pub async fn add_work_units(
        &self,
        work_spec_name: &str,
        units: &[Value],
    ) -> MethodResult<usize> {
        let spec = match self.namespace.work_spec(work_spec_name).await {
            Ok(spec) => spec,
            Err(error) => return soft(error),
        };
        let now = self.clock.now();
        let mut added = 0;
        for entry in units {
            let (name, data, meta) = decode_unit_entry(entry, now)?;
            spec.add_work_unit(&name, data, meta).await?;
            added += 1;
        }
        Ok(ok(added))
    }

    pub async fn get_work_units(
        &self,
        work_spec_name: &str,
        options: &Dict,
    ) -> MethodResult<Vec<(Vec<u8>, Dict)>> {
        let spec = match self.namespace.work_spec(work_spec_name).await {
            Ok(spec) => spec,
            Err(error) => return soft(error),
        };
        let query = query_from_options(options)?;
        let units = spec.work_units(&query).await?;
        let mut result = Vec::with_capacity(units.len());
        for unit in units {
            result.push((unit.name().as_bytes().to_vec(), unit.data().await?));
        }
        Ok(ok(result))
    }

    pub async fn del_work_units(
        &self,
        work_spec_name: &str,
        options: &Dict,
    ) -> MethodResult<usize> {
        let spec = match self.namespace.work_spec(work_spec_name).await {
            Ok(spec) => spec,
            Err(error) => return soft(error),
        };
        let query = query_from_options(options)?;
        let deleted = spec.delete_work_units(&query).await?;
        Ok(ok(deleted))
    }

    /// Sets or shifts the priority of the named work units.
    pub async fn prioritize_work_units(
        &self,
        work_spec_name: &str,
        options: &Dict,
    ) -> MethodResult<bool> {
        let spec = match self.namespace.work_spec(work_spec_name).await {
            Ok(spec) => spec,
            Err(error) => return soft(error),
        };
        let keys = options
            .get("work_unit_keys")
            .ok_or_else(|| JobServerError::invalid("work_unit_keys is required"))?;
        let query = WorkUnitQuery {
            names: decode::name_list(keys)?,
            ..WorkUnitQuery::default()
        };
        if let Some(priority) = options.get("priority") {
            let priority = decode::number(priority)
                .ok_or_else(|| JobServerError::invalid("priority must be a number"))?;
            spec.set_work_unit_priorities(&query, priority).await?;
        } else if let Some(adjustment) = options.get("adjustment") {
            let adjustment = decode::number(adjustment)
                .ok_or_else(|| JobServerError::invalid("adjustment must be a number"))?;
            spec.adjust_work_unit_priorities(&query, adjustment).await?;
        } else {
            return Err(JobServerError::invalid(
                "either priority or adjustment is required",
            ));
        }
        Ok(ok(true))
    }

    /// Folds unit status counts, reported in wire values (Delayed counts
    /// as available on the wire).
    pub async fn count_work_unit_status(
        &self,
        work_spec_name: &str,
    ) -> MethodResult<HashMap<i64, usize>> {
        let spec = match self.namespace.work_spec(work_spec_name).await {
            Ok(spec) => spec,
            Err(error) => return soft(error),
        };
        let counts = spec.count_work_unit_status().await?;
        let mut wire_counts: HashMap<i64, usize> = HashMap::new();
        for (status, count) in counts {
            *wire_counts.entry(decode::wire_status(status)).or_insert(0) += count;
        }
        Ok(ok(wire_counts))
    }

    pub async fn get_work_unit_status(
        &self,
        work_spec_name: &str,
        work_unit_keys: &[String],
    ) -> MethodResult<Vec<i64>> {
        let spec = match self.namespace.work_spec(work_spec_name).await {
            Ok(spec) => spec,
            Err(error) => return soft(error),
        };
        let mut statuses = Vec::with_capacity(work_unit_keys.len());
        for key in work_unit_keys {
            match spec.work_unit(key).await {
                Ok(unit) => statuses.push(decode::wire_status(unit.status().await?)),
                Err(error) if error.is_lookup_miss() => statuses.push(0),
                Err(error) => return Err(error.into()),
            }
        }
        Ok(ok(statuses))
    }
}
