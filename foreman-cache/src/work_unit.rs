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

use crate::attempt::CachedAttempt;
use crate::cell::UpstreamCell;
use crate::namespace::CachedNamespace;
use crate::work_spec::CachedWorkSpec;
use foreman_common::error::CoordinateError;
use foreman_common::model::{Dict, WorkUnitMeta, WorkUnitStatus};
use foreman_core::backend::{Attempt, WorkUnit};
use std::any::Any;
use std::sync::{Arc, Weak};
use tracing::debug;

pub(crate) struct CachedWorkUnit {
    spec: Weak<CachedWorkSpec>,
    namespace: Weak<CachedNamespace>,
    name: String,
    work_spec_name: String,
    cell: UpstreamCell<dyn WorkUnit>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl CachedWorkUnit {
    pub fn create(
        spec: Weak<CachedWorkSpec>,
        namespace: Weak<CachedNamespace>,
        name: &str,
        work_spec_name: &str,
        upstream: Arc<dyn WorkUnit>,
    ) -> Arc<CachedWorkUnit> {
        Arc::new(CachedWorkUnit {
            spec,
            namespace,
            name: name.to_string(),
            work_spec_name: work_spec_name.to_string(),
            cell: UpstreamCell::new(upstream),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// The raw upstream handle, for callers that must unwrap this proxy
    /// before passing the unit back into a backend.
    pub fn upstream(&self) -> Arc<dyn WorkUnit> {
        self.cell.handle()
    }

    async fn refresh(&self, seen_generation: u64) -> Result<(), CoordinateError> {
        let _guard = self.refresh_lock.lock().await;
        if self.cell.generation() != seen_generation {
            return Ok(());
        }
        let spec = self
            .spec
            .upgrade()
            .ok_or(CoordinateError::NoSuchWorkSpec {
                name: self.work_spec_name.clone(),
            })?;
        let fresh = spec.upstream_work_unit(&self.name).await?;
        self.cell.replace(fresh);
        debug!(work_unit = %self.name, "refreshed stale work unit handle");
        Ok(())
    }

    fn invalidate(&self) {
        if let Some(spec) = self.spec.upgrade() {
            spec.evict_work_unit(&self.name);
        }
    }

    async fn recover(
        &self,
        seen_generation: u64,
        original: &CoordinateError,
    ) -> Result<(), CoordinateError> {
        match self.refresh(seen_generation).await {
            Ok(()) => Ok(()),
            Err(_) => {
                self.invalidate();
                Err(original.clone())
            }
        }
    }

    fn wrap_attempt(&self, attempt: Arc<dyn Attempt>) -> Arc<dyn Attempt> {
        CachedAttempt::create(attempt, self.namespace.clone())
    }
}

#[async_trait::async_trait]
impl WorkUnit for CachedWorkUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn work_spec_name(&self) -> &str {
        &self.work_spec_name
    }

    async fn data(&self) -> Result<Dict, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.data().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().data().await
            }
            result => result,
        }
    }

    async fn status(&self) -> Result<WorkUnitStatus, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.status().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().status().await
            }
            result => result,
        }
    }

    async fn meta(&self) -> Result<WorkUnitMeta, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.meta().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().meta().await
            }
            result => result,
        }
    }

    async fn set_meta(&self, meta: WorkUnitMeta) -> Result<(), CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.set_meta(meta.clone()).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().set_meta(meta).await
            }
            result => result,
        }
    }

    async fn priority(&self) -> Result<f64, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.priority().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().priority().await
            }
            result => result,
        }
    }

    async fn set_priority(&self, priority: f64) -> Result<(), CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.set_priority(priority).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().set_priority(priority).await
            }
            result => result,
        }
    }

    async fn active_attempt(&self) -> Result<Option<Arc<dyn Attempt>>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        let attempt = match upstream.active_attempt().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().active_attempt().await
            }
            result => result,
        }?;
        Ok(attempt.map(|attempt| self.wrap_attempt(attempt)))
    }

    async fn attempts(&self) -> Result<Vec<Arc<dyn Attempt>>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        let attempts = match upstream.attempts().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().attempts().await
            }
            result => result,
        }?;
        Ok(attempts
            .into_iter()
            .map(|attempt| self.wrap_attempt(attempt))
            .collect())
    }

    async fn attempt_count(&self) -> Result<usize, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.attempt_count().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().attempt_count().await
            }
            result => result,
        }
    }

    async fn clear_active_attempt(&self) -> Result<(), CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.clear_active_attempt().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().clear_active_attempt().await
            }
            result => result,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
