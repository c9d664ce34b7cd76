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

use crate::cell::{lru_get, lru_peek, lru_remove, UpstreamCell};
use crate::config::CacheConfig;
use crate::namespace::CachedNamespace;
use crate::work_unit::CachedWorkUnit;
use foreman_common::error::CoordinateError;
use foreman_common::model::{
    Dict, Summary, WorkSpecMeta, WorkUnitMeta, WorkUnitQuery, WorkUnitStatus,
};
use foreman_core::backend::{WorkSpec, WorkUnit};
use lru::LruCache;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use tracing::debug;

pub(crate) struct CachedWorkSpec {
    namespace: Weak<CachedNamespace>,
    name: String,
    namespace_name: String,
    cell: UpstreamCell<dyn WorkSpec>,
    refresh_lock: tokio::sync::Mutex<()>,
    units: Arc<RwLock<LruCache<String, Arc<CachedWorkUnit>>>>,
    self_weak: Weak<CachedWorkSpec>,
}

impl CachedWorkSpec {
    pub fn create(
        namespace: Weak<CachedNamespace>,
        name: &str,
        namespace_name: &str,
        upstream: Arc<dyn WorkSpec>,
        config: &CacheConfig,
    ) -> Arc<CachedWorkSpec> {
        Arc::new_cyclic(|self_weak| CachedWorkSpec {
            namespace,
            name: name.to_string(),
            namespace_name: namespace_name.to_string(),
            cell: UpstreamCell::new(upstream),
            refresh_lock: tokio::sync::Mutex::new(()),
            units: Arc::new(RwLock::new(LruCache::new(config.work_unit_capacity()))),
            self_weak: self_weak.clone(),
        })
    }

    /// Refetches the upstream spec handle through the namespace (which
    /// recovers itself if needed) and drops the unit cache.
    async fn refresh(&self, seen_generation: u64) -> Result<(), CoordinateError> {
        let _guard = self.refresh_lock.lock().await;
        if self.cell.generation() != seen_generation {
            return Ok(());
        }
        let namespace = self.namespace.upgrade().ok_or(CoordinateError::NoSuchNamespace {
            name: self.namespace_name.clone(),
        })?;
        let fresh = namespace.upstream_work_spec(&self.name).await?;
        self.cell.replace(fresh);
        self.units.write().unwrap().clear();
        debug!(work_spec = %self.name, "refreshed stale work spec handle");
        Ok(())
    }

    fn invalidate(&self) {
        if let Some(namespace) = self.namespace.upgrade() {
            namespace.evict_work_spec(&self.name);
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

    /// Fetches a raw upstream unit handle with spec-level recovery.
    pub async fn upstream_work_unit(
        &self,
        name: &str,
    ) -> Result<Arc<dyn WorkUnit>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.work_unit(name).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().work_unit(name).await
            }
            result => result,
        }
    }

    pub async fn cached_work_unit(
        &self,
        name: &str,
    ) -> Result<Arc<CachedWorkUnit>, CoordinateError> {
        if let Some(cached) = lru_get(&self.units, &name.to_string()) {
            return Ok(cached);
        }
        let upstream = self.upstream_work_unit(name).await?;
        Ok(self.insert_unit(name, upstream))
    }

    fn insert_unit(&self, name: &str, upstream: Arc<dyn WorkUnit>) -> Arc<CachedWorkUnit> {
        let cached = CachedWorkUnit::create(
            self.self_weak.clone(),
            self.namespace.clone(),
            name,
            &self.name,
            upstream,
        );
        let mut cache = self.units.write().unwrap();
        if let Some(existing) = cache.get(&name.to_string()) {
            return existing.clone();
        }
        cache.put(name.to_string(), cached.clone());
        cached
    }

    pub fn evict_work_unit(&self, name: &str) {
        lru_remove(&self.units, &name.to_string());
    }
}

#[async_trait::async_trait]
impl WorkSpec for CachedWorkSpec {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace_name(&self) -> &str {
        &self.namespace_name
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

    async fn set_data(&self, data: Dict) -> Result<(), CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.set_data(data.clone()).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().set_data(data).await
            }
            result => result,
        }
    }

    async fn meta(&self, with_counts: bool) -> Result<WorkSpecMeta, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.meta(with_counts).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().meta(with_counts).await
            }
            result => result,
        }
    }

    async fn set_meta(&self, meta: WorkSpecMeta) -> Result<(), CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.set_meta(meta.clone()).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().set_meta(meta).await
            }
            result => result,
        }
    }

    async fn add_work_unit(
        &self,
        name: &str,
        data: Dict,
        meta: WorkUnitMeta,
    ) -> Result<Arc<dyn WorkUnit>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        let created = match upstream.add_work_unit(name, data.clone(), meta.clone()).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().add_work_unit(name, data, meta).await
            }
            result => result,
        }?;
        Ok(self.insert_unit(name, created))
    }

    async fn work_unit(&self, name: &str) -> Result<Arc<dyn WorkUnit>, CoordinateError> {
        Ok(self.cached_work_unit(name).await?)
    }

    async fn work_units(
        &self,
        query: &WorkUnitQuery,
    ) -> Result<Vec<Arc<dyn WorkUnit>>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        let raw = match upstream.work_units(query).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().work_units(query).await
            }
            result => result,
        }?;
        let mut result: Vec<Arc<dyn WorkUnit>> = Vec::new();
        for unit in raw {
            let name = unit.name().to_string();
            // bulk listing observes without promoting recency
            if let Some(cached) = lru_peek(&self.units, &name) {
                result.push(cached);
                continue;
            }
            result.push(self.insert_unit(&name, unit));
        }
        Ok(result)
    }

    async fn count_work_unit_status(
        &self,
    ) -> Result<HashMap<WorkUnitStatus, usize>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.count_work_unit_status().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().count_work_unit_status().await
            }
            result => result,
        }
    }

    async fn set_work_unit_priorities(
        &self,
        query: &WorkUnitQuery,
        priority: f64,
    ) -> Result<(), CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.set_work_unit_priorities(query, priority).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell
                    .handle()
                    .set_work_unit_priorities(query, priority)
                    .await
            }
            result => result,
        }
    }

    async fn adjust_work_unit_priorities(
        &self,
        query: &WorkUnitQuery,
        adjustment: f64,
    ) -> Result<(), CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.adjust_work_unit_priorities(query, adjustment).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell
                    .handle()
                    .adjust_work_unit_priorities(query, adjustment)
                    .await
            }
            result => result,
        }
    }

    async fn delete_work_units(&self, query: &WorkUnitQuery) -> Result<usize, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        let deleted = match upstream.delete_work_units(query).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().delete_work_units(query).await
            }
            result => result,
        }?;
        // deleted units will fail revalidation anyway; dropping the whole
        // unit cache is simpler than re-running the query here
        if deleted > 0 {
            self.units.write().unwrap().clear();
        }
        Ok(deleted)
    }

    async fn summarize(&self) -> Result<Summary, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.summarize().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().summarize().await
            }
            result => result,
        }
    }
}
