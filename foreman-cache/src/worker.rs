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
use crate::work_unit::CachedWorkUnit;
use chrono::{DateTime, Duration, Utc};
use foreman_common::error::CoordinateError;
use foreman_common::model::{AttemptRequest, Dict};
use foreman_core::backend::{Attempt, WorkUnit, Worker};
use std::any::Any;
use std::sync::{Arc, Weak};
use tracing::debug;

pub(crate) struct CachedWorker {
    namespace: Weak<CachedNamespace>,
    name: String,
    cell: UpstreamCell<dyn Worker>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl CachedWorker {
    pub fn create(
        namespace: Weak<CachedNamespace>,
        name: &str,
        upstream: Arc<dyn Worker>,
    ) -> Arc<CachedWorker> {
        Arc::new(CachedWorker {
            namespace,
            name: name.to_string(),
            cell: UpstreamCell::new(upstream),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn refresh(&self, seen_generation: u64) -> Result<(), CoordinateError> {
        let _guard = self.refresh_lock.lock().await;
        if self.cell.generation() != seen_generation {
            return Ok(());
        }
        let namespace = self
            .namespace
            .upgrade()
            .ok_or(CoordinateError::NoSuchNamespace {
                name: String::new(),
            })?;
        let fresh = namespace.upstream_worker(&self.name).await?;
        self.cell.replace(fresh);
        debug!(worker = %self.name, "refreshed stale worker handle");
        Ok(())
    }

    fn invalidate(&self) {
        if let Some(namespace) = self.namespace.upgrade() {
            namespace.evict_worker(&self.name);
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

    fn wrap_attempts(&self, attempts: Vec<Arc<dyn Attempt>>) -> Vec<Arc<dyn Attempt>> {
        attempts
            .into_iter()
            .map(|attempt| CachedAttempt::create(attempt, self.namespace.clone()))
            .collect()
    }

    /// Any wrapped entity handed in as a parameter is unwrapped to its
    /// upstream handle before the call crosses into the backend.
    fn unwrap_unit(work_unit: &Arc<dyn WorkUnit>) -> Arc<dyn WorkUnit> {
        match work_unit.as_any().downcast_ref::<CachedWorkUnit>() {
            Some(cached) => cached.upstream(),
            None => work_unit.clone(),
        }
    }

    fn unwrap_worker(worker: &Arc<dyn Worker>) -> Arc<dyn Worker> {
        match worker.as_any().downcast_ref::<CachedWorker>() {
            Some(cached) => cached.cell.handle(),
            None => worker.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Worker for CachedWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn parent(&self) -> Result<Option<Arc<dyn Worker>>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        let parent = match upstream.parent().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().parent().await
            }
            result => result,
        }?;
        match (parent, self.namespace.upgrade()) {
            (Some(parent), Some(namespace)) => {
                Ok(Some(namespace.cached_worker(parent.name()).await?))
            }
            (parent, _) => Ok(parent),
        }
    }

    async fn set_parent(&self, parent: Option<&Arc<dyn Worker>>) -> Result<(), CoordinateError> {
        let unwrapped = parent.map(Self::unwrap_worker);
        let (generation, upstream) = self.cell.get();
        match upstream.set_parent(unwrapped.as_ref()).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().set_parent(unwrapped.as_ref()).await
            }
            result => result,
        }
    }

    async fn children(&self) -> Result<Vec<Arc<dyn Worker>>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        let children = match upstream.children().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().children().await
            }
            result => result,
        }?;
        match self.namespace.upgrade() {
            Some(namespace) => {
                let mut result: Vec<Arc<dyn Worker>> = Vec::new();
                for child in children {
                    result.push(namespace.cached_worker(child.name()).await?);
                }
                Ok(result)
            }
            None => Ok(children),
        }
    }

    async fn active(&self) -> Result<bool, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.active().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().active().await
            }
            result => result,
        }
    }

    async fn deactivate(&self) -> Result<(), CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.deactivate().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().deactivate().await
            }
            result => result,
        }
    }

    async fn mode(&self) -> Result<String, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.mode().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().mode().await
            }
            result => result,
        }
    }

    async fn data(&self) -> Result<Option<Dict>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.data().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().data().await
            }
            result => result,
        }
    }

    async fn expiration(&self) -> Result<DateTime<Utc>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.expiration().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().expiration().await
            }
            result => result,
        }
    }

    async fn last_update(&self) -> Result<DateTime<Utc>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.last_update().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().last_update().await
            }
            result => result,
        }
    }

    async fn update(
        &self,
        data: Option<Dict>,
        now: DateTime<Utc>,
        expiration: DateTime<Utc>,
        mode: &str,
    ) -> Result<(), CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.update(data.clone(), now, expiration, mode).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().update(data, now, expiration, mode).await
            }
            result => result,
        }
    }

    async fn active_attempts(&self) -> Result<Vec<Arc<dyn Attempt>>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        let attempts = match upstream.active_attempts().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().active_attempts().await
            }
            result => result,
        }?;
        Ok(self.wrap_attempts(attempts))
    }

    async fn all_attempts(&self) -> Result<Vec<Arc<dyn Attempt>>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        let attempts = match upstream.all_attempts().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().all_attempts().await
            }
            result => result,
        }?;
        Ok(self.wrap_attempts(attempts))
    }

    async fn child_attempts(&self) -> Result<Vec<Arc<dyn Attempt>>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        let attempts = match upstream.child_attempts().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().child_attempts().await
            }
            result => result,
        }?;
        Ok(self.wrap_attempts(attempts))
    }

    async fn request_attempts(
        &self,
        request: AttemptRequest,
    ) -> Result<Vec<Arc<dyn Attempt>>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        let attempts = match upstream.request_attempts(request.clone()).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().request_attempts(request).await
            }
            result => result,
        }?;
        Ok(self.wrap_attempts(attempts))
    }

    async fn make_attempt(
        &self,
        work_unit: &Arc<dyn WorkUnit>,
        lifetime: Option<Duration>,
    ) -> Result<Arc<dyn Attempt>, CoordinateError> {
        let unwrapped = Self::unwrap_unit(work_unit);
        let (generation, upstream) = self.cell.get();
        let attempt = match upstream.make_attempt(&unwrapped, lifetime).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().make_attempt(&unwrapped, lifetime).await
            }
            result => result,
        }?;
        Ok(CachedAttempt::create(attempt, self.namespace.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
