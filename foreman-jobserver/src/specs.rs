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

//! Work spec administration.

use crate::decode;
use crate::server::{ok, soft, JobServer, JobServerError, MethodResult};
use chrono::Duration;
use foreman_common::model::{Dict, WorkSpecMeta};
use serde_json::json;

fn meta_to_dict(meta: &WorkSpecMeta) -> Dict {
    let mut dict = Dict::new();
    dict.insert("priority".to_string(), json!(meta.priority));
    dict.insert("weight".to_string(), json!(meta.weight));
    dict.insert("paused".to_string(), json!(meta.paused));
    dict.insert("continuous".to_string(), json!(meta.continuous));
    dict.insert(
        "can_be_continuous".to_string(),
        json!(meta.can_be_continuous),
    );
    dict.insert("min_gb".to_string(), json!(meta.min_memory_gb));
    dict.insert("interval".to_string(), json!(meta.interval.num_seconds()));
    dict.insert("max_running".to_string(), json!(meta.max_running));
    dict.insert(
        "max_getwork".to_string(),
        json!(meta.max_attempts_returned),
    );
    dict.insert("max_retries".to_string(), json!(meta.max_retries));
    dict.insert("then".to_string(), json!(meta.next_work_spec));
    dict.insert(
        "then_preempts".to_string(),
        json!(meta.next_work_spec_preempts),
    );
    dict.insert("runtime".to_string(), json!(meta.runtime));
    dict.insert(
        "available_count".to_string(),
        json!(meta.available_count),
    );
    dict.insert("pending_count".to_string(), json!(meta.pending_count));
    dict
}

/// Applies recognized keys of a loose options map onto a meta snapshot.
/// `status` takes the control-channel strings; everything else is the
/// regular meta vocabulary.
fn apply_meta_options(meta: &mut WorkSpecMeta, options: &Dict) -> Result<(), JobServerError> {
    if let Some(status) = options.get("status") {
        let status = decode::text(status)
            .ok_or_else(|| JobServerError::invalid("status must be a string"))?;
        match status.to_ascii_lowercase().as_str() {
            "paused" => meta.paused = true,
            "runnable" => meta.paused = false,
            other => {
                return Err(JobServerError::invalid(format!(
                    "unknown work spec status {other:?}"
                )))
            }
        }
    }
    if let Some(paused) = options.get("paused") {
        meta.paused = decode::boolean(paused)
            .ok_or_else(|| JobServerError::invalid("paused must be a boolean"))?;
    }
    if let Some(priority) = options.get("priority") {
        meta.priority = decode::integer(priority)
            .ok_or_else(|| JobServerError::invalid("priority must be an integer"))?
            as i32;
    }
    if let Some(weight) = options.get("weight") {
        let weight = decode::integer(weight)
            .ok_or_else(|| JobServerError::invalid("weight must be an integer"))?;
        if weight <= 0 {
            return Err(JobServerError::invalid("weight must be positive"));
        }
        meta.weight = weight as i32;
    }
    if let Some(continuous) = options.get("continuous") {
        meta.continuous = decode::boolean(continuous)
            .ok_or_else(|| JobServerError::invalid("continuous must be a boolean"))?;
    }
    if let Some(interval) = options.get("interval") {
        let seconds = decode::number(interval)
            .ok_or_else(|| JobServerError::invalid("interval must be a number"))?;
        meta.interval = Duration::milliseconds((seconds * 1000.0) as i64);
    }
    if let Some(max_running) = options.get("max_running") {
        meta.max_running = decode::integer(max_running)
            .ok_or_else(|| JobServerError::invalid("max_running must be an integer"))?
            .max(0) as usize;
    }
    if let Some(max_getwork) = options.get("max_getwork") {
        meta.max_attempts_returned = decode::integer(max_getwork)
            .ok_or_else(|| JobServerError::invalid("max_getwork must be an integer"))?
            .max(0) as usize;
    }
    if let Some(max_retries) = options.get("max_retries") {
        meta.max_retries = decode::integer(max_retries)
            .ok_or_else(|| JobServerError::invalid("max_retries must be an integer"))?
            .max(0) as usize;
    }
    Ok(())
}

impl JobServer {
    pub async fn set_work_spec(&self, data: Dict) -> MethodResult<bool> {
        self.namespace.set_work_spec(data).await?;
        Ok(ok(true))
    }

    pub async fn get_work_spec(&self, work_spec_name: &str) -> MethodResult<Option<Dict>> {
        let spec = match self.namespace.work_spec(work_spec_name).await {
            Ok(spec) => spec,
            Err(error) => return soft(error),
        };
        Ok(ok(Some(spec.data().await?)))
    }

    pub async fn del_work_spec(&self, work_spec_name: &str) -> MethodResult<bool> {
        match self.namespace.destroy_work_spec(work_spec_name).await {
            Ok(()) => Ok(ok(true)),
            Err(error) => soft(error),
        }
    }

    pub async fn list_work_specs(&self) -> MethodResult<Vec<Dict>> {
        let names = self.namespace.work_spec_names().await?;
        let mut specs = Vec::with_capacity(names.len());
        for name in names {
            match self.namespace.work_spec(&name).await {
                Ok(spec) => specs.push(spec.data().await?),
                // destroyed between listing and fetch
                Err(error) if error.is_lookup_miss() || error.is_gone() => continue,
                Err(error) => return Err(error.into()),
            }
        }
        Ok(ok(specs))
    }

    pub async fn get_work_spec_meta(&self, work_spec_name: &str) -> MethodResult<Option<Dict>> {
        let spec = match self.namespace.work_spec(work_spec_name).await {
            Ok(spec) => spec,
            Err(error) => return soft(error),
        };
        let meta = spec.meta(true).await?;
        Ok(ok(Some(meta_to_dict(&meta))))
    }

    pub async fn set_work_spec_meta(
        &self,
        work_spec_name: &str,
        options: &Dict,
    ) -> MethodResult<bool> {
        let spec = match self.namespace.work_spec(work_spec_name).await {
            Ok(spec) => spec,
            Err(error) => return soft(error),
        };
        let mut meta = spec.meta(false).await?;
        apply_meta_options(&mut meta, options)?;
        spec.set_meta(meta).await?;
        Ok(ok(true))
    }

    /// Pauses, resumes or retunes a work spec. Accepts the same vocabulary
    /// as `set_work_spec_meta`.
    pub async fn control_work_spec(
        &self,
        work_spec_name: &str,
        options: &Dict,
    ) -> MethodResult<bool> {
        self.set_work_spec_meta(work_spec_name, options).await
    }

    pub async fn list_work_spec_names(&self) -> MethodResult<Vec<String>> {
        Ok(ok(self.namespace.work_spec_names().await?))
    }
}
