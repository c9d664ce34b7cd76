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

//! Extraction of scheduling metadata from a work spec's data dictionary.
//!
//! The dictionary is user-controlled and loosely typed; well-known keys are
//! interpreted here and everything else is preserved verbatim on the spec.

use chrono::Duration;
use foreman_common::error::CoordinateError;
use foreman_common::model::{Dict, WorkSpecMeta, DEFAULT_WEIGHT};
use serde_json::Value;

pub(crate) fn spec_name(data: &Dict) -> Result<String, CoordinateError> {
    match data.get("name") {
        None | Some(Value::Null) => Err(CoordinateError::NoWorkSpecName),
        Some(Value::String(name)) if !name.is_empty() => Ok(name.clone()),
        Some(Value::String(_)) => Err(CoordinateError::NoWorkSpecName),
        Some(_) => Err(CoordinateError::bad_work_spec("name must be a string")),
    }
}

pub(crate) fn meta_from_data(data: &Dict) -> Result<WorkSpecMeta, CoordinateError> {
    let mut meta = WorkSpecMeta::default();

    meta.paused = get_bool(data, "disabled")?.unwrap_or(false);

    let continuous = get_bool(data, "continuous")?.unwrap_or(false);
    meta.continuous = continuous;
    meta.can_be_continuous = continuous;

    if let Some(interval) = get_f64(data, "interval")? {
        if interval < 0.0 {
            return Err(CoordinateError::bad_work_spec("interval must not be negative"));
        }
        meta.interval = Duration::milliseconds((interval * 1000.0) as i64);
    }

    if let Some(priority) = get_i64(data, "priority")? {
        meta.priority = priority as i32;
    }

    meta.weight = match get_i64(data, "weight")? {
        Some(weight) if weight > 0 => weight as i32,
        Some(_) => return Err(CoordinateError::bad_work_spec("weight must be positive")),
        None => match get_i64(data, "nice")? {
            Some(nice) => (DEFAULT_WEIGHT as i64 - nice).max(1) as i32,
            None => DEFAULT_WEIGHT,
        },
    };

    if let Some(max_running) = get_i64(data, "max_running")? {
        meta.max_running = max_running.max(0) as usize;
    }

    if let Some(max_getwork) = get_i64(data, "max_getwork")? {
        meta.max_attempts_returned = max_getwork.max(0) as usize;
    }

    if let Some(max_retries) = get_i64(data, "max_retries")? {
        meta.max_retries = max_retries.max(0) as usize;
    }

    if let Some(min_gb) = get_f64(data, "min_gb")? {
        meta.min_memory_gb = min_gb;
    }

    if let Some(then) = get_string(data, "then")? {
        meta.next_work_spec = then;
    }

    meta.next_work_spec_preempts = get_bool(data, "then_preempts")?.unwrap_or(true);

    if let Some(runtime) = get_string(data, "runtime")? {
        meta.runtime = runtime;
    }

    Ok(meta)
}

fn get_bool(data: &Dict, key: &str) -> Result<Option<bool>, CoordinateError> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(value)) => Ok(Some(*value)),
        Some(_) => Err(CoordinateError::bad_work_spec(format!(
            "{key} must be a boolean"
        ))),
    }
}

fn get_i64(data: &Dict, key: &str) -> Result<Option<i64>, CoordinateError> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(value)) => match value.as_i64() {
            Some(value) => Ok(Some(value)),
            None => match value.as_f64() {
                Some(value) if value.fract() == 0.0 => Ok(Some(value as i64)),
                _ => Err(CoordinateError::bad_work_spec(format!(
                    "{key} must be an integer"
                ))),
            },
        },
        Some(_) => Err(CoordinateError::bad_work_spec(format!(
            "{key} must be an integer"
        ))),
    }
}

fn get_f64(data: &Dict, key: &str) -> Result<Option<f64>, CoordinateError> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(value)) => Ok(value.as_f64()),
        Some(_) => Err(CoordinateError::bad_work_spec(format!(
            "{key} must be a number"
        ))),
    }
}

fn get_string(data: &Dict, key: &str) -> Result<Option<String>, CoordinateError> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(CoordinateError::bad_work_spec(format!(
            "{key} must be a string"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::{check, let_assert};
    use serde_json::json;
    use test_r::test;

    fn dict(value: serde_json::Value) -> Dict {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn defaults() {
        let meta = meta_from_data(&dict(json!({"name": "s"}))).unwrap();
        check!(meta.weight == DEFAULT_WEIGHT);
        check!(meta.priority == 0);
        check!(!meta.paused);
        check!(!meta.continuous);
        check!(!meta.can_be_continuous);
        check!(meta.next_work_spec_preempts);
    }

    #[test]
    fn weight_from_nice() {
        let meta = meta_from_data(&dict(json!({"name": "s", "nice": 5}))).unwrap();
        check!(meta.weight == 15);
        let meta = meta_from_data(&dict(json!({"name": "s", "nice": 100}))).unwrap();
        check!(meta.weight == 1);
    }

    #[test]
    fn explicit_weight_wins_over_nice() {
        let meta = meta_from_data(&dict(json!({"name": "s", "weight": 7, "nice": 5}))).unwrap();
        check!(meta.weight == 7);
    }

    #[test]
    fn non_positive_weight_is_rejected() {
        let result = meta_from_data(&dict(json!({"name": "s", "weight": 0})));
        let_assert!(Err(CoordinateError::BadWorkSpec { .. }) = result);
    }

    #[test]
    fn continuous_implies_can_be_continuous() {
        let meta = meta_from_data(&dict(json!({"name": "s", "continuous": true}))).unwrap();
        check!(meta.continuous);
        check!(meta.can_be_continuous);
    }

    #[test]
    fn recognized_keys() {
        let meta = meta_from_data(&dict(json!({
            "name": "s",
            "disabled": true,
            "interval": 1.5,
            "priority": 3,
            "max_running": 10,
            "max_getwork": 2,
            "min_gb": 4.0,
            "then": "next",
            "then_preempts": false,
            "runtime": "python_3",
        })))
        .unwrap();
        check!(meta.paused);
        check!(meta.interval == Duration::milliseconds(1500));
        check!(meta.priority == 3);
        check!(meta.max_running == 10);
        check!(meta.max_attempts_returned == 2);
        check!(meta.min_memory_gb == 4.0);
        check!(meta.next_work_spec == "next");
        check!(!meta.next_work_spec_preempts);
        check!(meta.runtime == "python_3");
    }

    #[test]
    fn missing_name_is_rejected() {
        let_assert!(Err(CoordinateError::NoWorkSpecName) = spec_name(&dict(json!({"x": 1}))));
        let_assert!(
            Err(CoordinateError::BadWorkSpec { .. }) = spec_name(&dict(json!({"name": 3})))
        );
    }
}
