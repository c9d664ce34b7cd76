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

//! Boundary decoding of loosely typed RPC values.
//!
//! The wire side speaks in arbitrary maps and sequences; text may arrive
//! as byte strings (rendered here as arrays of byte values), and numbers
//! in any numeric shape. The core only ever sees the strongly typed
//! results of these helpers.

use crate::server::JobServerError;
use foreman_common::model::WorkUnitStatus;
use serde_json::Value;

/// Wire values of the work unit status enumeration. Value 2 ("blocked")
/// is reserved and unused; the wire has no value for Delayed, which
/// reports as available.
pub const WIRE_AVAILABLE: i64 = 1;
pub const WIRE_BLOCKED: i64 = 2;
pub const WIRE_PENDING: i64 = 3;
pub const WIRE_FINISHED: i64 = 4;
pub const WIRE_FAILED: i64 = 5;

pub fn wire_status(status: WorkUnitStatus) -> i64 {
    match status {
        WorkUnitStatus::Available | WorkUnitStatus::Delayed => WIRE_AVAILABLE,
        WorkUnitStatus::Pending => WIRE_PENDING,
        WorkUnitStatus::Finished => WIRE_FINISHED,
        WorkUnitStatus::Failed => WIRE_FAILED,
    }
}

/// Decodes one wire status value into the core statuses it covers.
pub fn statuses_from_wire(value: i64) -> Result<Vec<WorkUnitStatus>, JobServerError> {
    match value {
        WIRE_AVAILABLE => Ok(vec![WorkUnitStatus::Available, WorkUnitStatus::Delayed]),
        WIRE_PENDING => Ok(vec![WorkUnitStatus::Pending]),
        WIRE_FINISHED => Ok(vec![WorkUnitStatus::Finished]),
        WIRE_FAILED => Ok(vec![WorkUnitStatus::Failed]),
        WIRE_BLOCKED => Err(JobServerError::invalid(
            "work unit status 2 (blocked) is reserved",
        )),
        other => Err(JobServerError::invalid(format!(
            "unknown work unit status {other}"
        ))),
    }
}

/// Reinterprets a value as text. Byte strings cross this boundary as
/// arrays of byte values and are decoded as UTF-8 here.
pub fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => {
            let mut bytes = Vec::with_capacity(items.len());
            for item in items {
                let byte = item.as_u64().filter(|byte| *byte <= 255)?;
                bytes.push(byte as u8);
            }
            String::from_utf8(bytes).ok()
        }
        _ => None,
    }
}

pub fn number(value: &Value) -> Option<f64> {
    value.as_f64()
}

pub fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        _ => None,
    }
}

pub fn boolean(value: &Value) -> Option<bool> {
    value.as_bool()
}

/// A list of names, each of which may itself be a byte string.
pub fn name_list(value: &Value) -> Result<Vec<String>, JobServerError> {
    match value {
        Value::Array(items) => {
            let mut names = Vec::with_capacity(items.len());
            for item in items {
                match text(item) {
                    Some(name) => names.push(name),
                    None => {
                        return Err(JobServerError::invalid(
                            "expected a sequence of names",
                        ))
                    }
                }
            }
            Ok(names)
        }
        _ => Err(JobServerError::invalid("expected a sequence of names")),
    }
}
