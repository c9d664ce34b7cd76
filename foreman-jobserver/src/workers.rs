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

//! Worker liveness surface.

use crate::server::{ok, JobServer, MethodResult};
use chrono::Duration;
use foreman_common::model::{Dict, DEFAULT_WORKER_LIFETIME_SECONDS};
use tracing::debug;

impl JobServer {
    /// Registers or refreshes a worker: stores its payload, extends its
    /// lifetime, re-activates it and (when given) re-links its parent.
    pub async fn worker_heartbeat(
        &self,
        worker_name: &str,
        mode: &str,
        expire_seconds: f64,
        data: Option<Dict>,
        parent: Option<&str>,
    ) -> MethodResult<bool> {
        let now = self.clock.now();
        let lifetime = if expire_seconds > 0.0 {
            Duration::milliseconds((expire_seconds * 1000.0) as i64)
        } else {
            Duration::seconds(DEFAULT_WORKER_LIFETIME_SECONDS)
        };
        let worker = self.namespace.worker(worker_name).await?;
        worker.update(data, now, now + lifetime, mode).await?;
        match parent {
            Some(parent_name) if !parent_name.is_empty() => {
                let parent = self.namespace.worker(parent_name).await?;
                worker.set_parent(Some(&parent)).await?;
            }
            _ => {}
        }
        debug!(worker = worker_name, mode, "worker heartbeat");
        Ok(ok(true))
    }

    pub async fn worker_unheartbeat(&self, worker_name: &str) -> MethodResult<bool> {
        let worker = self.namespace.worker(worker_name).await?;
        worker.deactivate().await?;
        Ok(ok(true))
    }
}
