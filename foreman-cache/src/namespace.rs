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
use crate::work_spec::CachedWorkSpec;
use crate::worker::CachedWorker;
use foreman_common::error::CoordinateError;
use foreman_common::model::{Dict, Summary};
use foreman_core::backend::{Coordinate, Namespace, WorkSpec, Worker};
use lru::LruCache;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use tracing::debug;

pub(crate) struct CachedNamespace {
    root: Arc<dyn Coordinate>,
    parent_cache: Weak<RwLock<LruCache<String, Arc<CachedNamespace>>>>,
    name: String,
    cell: UpstreamCell<dyn Namespace>,
    refresh_lock: tokio::sync::Mutex<()>,
    config: CacheConfig,
    specs: Arc<RwLock<LruCache<String, Arc<CachedWorkSpec>>>>,
    workers: Arc<RwLock<LruCache<String, Arc<CachedWorker>>>>,
    self_weak: Weak<CachedNamespace>,
}

impl CachedNamespace {
    pub fn create(
        root: Arc<dyn Coordinate>,
        parent_cache: Weak<RwLock<LruCache<String, Arc<CachedNamespace>>>>,
        name: &str,
        upstream: Arc<dyn Namespace>,
        config: &CacheConfig,
    ) -> Arc<CachedNamespace> {
        Arc::new_cyclic(|self_weak| CachedNamespace {
            root,
            parent_cache,
            name: name.to_string(),
            cell: UpstreamCell::new(upstream),
            refresh_lock: tokio::sync::Mutex::new(()),
            config: config.clone(),
            specs: Arc::new(RwLock::new(LruCache::new(config.work_spec_capacity()))),
            workers: Arc::new(RwLock::new(LruCache::new(config.worker_capacity()))),
            self_weak: self_weak.clone(),
        })
    }

    /// Refetches this namespace from the root and drops the contained
    /// caches, whose upstream handles may have gone stale transitively.
    /// Serialized so a fleet of callers observing one torn handle issues a
    /// single upstream refetch.
    pub async fn refresh(&self, seen_generation: u64) -> Result<(), CoordinateError> {
        let _guard = self.refresh_lock.lock().await;
        if self.cell.generation() != seen_generation {
            return Ok(());
        }
        let fresh = self.root.namespace(&self.name).await?;
        self.cell.replace(fresh);
        self.specs.write().unwrap().clear();
        self.workers.write().unwrap().clear();
        debug!(namespace = %self.name, "refreshed stale namespace handle");
        Ok(())
    }

    pub fn invalidate(&self) {
        if let Some(parent) = self.parent_cache.upgrade() {
            lru_remove(&parent, &self.name);
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
                // the refetch error is less informative than the original
                self.invalidate();
                Err(original.clone())
            }
        }
    }

    /// Fetches a raw upstream work spec handle, recovering the namespace
    /// handle once if the upstream reports it stale.
    pub async fn upstream_work_spec(
        &self,
        name: &str,
    ) -> Result<Arc<dyn WorkSpec>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.work_spec(name).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().work_spec(name).await
            }
            result => result,
        }
    }

    pub async fn upstream_worker(&self, name: &str) -> Result<Arc<dyn Worker>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.worker(name).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().worker(name).await
            }
            result => result,
        }
    }

    pub async fn cached_work_spec(
        &self,
        name: &str,
    ) -> Result<Arc<CachedWorkSpec>, CoordinateError> {
        if let Some(cached) = lru_get(&self.specs, &name.to_string()) {
            return Ok(cached);
        }
        let upstream = self.upstream_work_spec(name).await?;
        self.insert_spec(name, upstream)
    }

    pub async fn cached_worker(&self, name: &str) -> Result<Arc<CachedWorker>, CoordinateError> {
        if let Some(cached) = lru_get(&self.workers, &name.to_string()) {
            return Ok(cached);
        }
        let upstream = self.upstream_worker(name).await?;
        self.insert_worker(name, upstream)
    }

    fn insert_spec(
        &self,
        name: &str,
        upstream: Arc<dyn WorkSpec>,
    ) -> Result<Arc<CachedWorkSpec>, CoordinateError> {
        let cached = CachedWorkSpec::create(
            self.self_weak.clone(),
            name,
            &self.name,
            upstream,
            &self.config,
        );
        let mut cache = self.specs.write().unwrap();
        if let Some(existing) = cache.get(&name.to_string()) {
            return Ok(existing.clone());
        }
        cache.put(name.to_string(), cached.clone());
        Ok(cached)
    }

    fn insert_worker(
        &self,
        name: &str,
        upstream: Arc<dyn Worker>,
    ) -> Result<Arc<CachedWorker>, CoordinateError> {
        let cached = CachedWorker::create(self.self_weak.clone(), name, upstream);
        let mut cache = self.workers.write().unwrap();
        if let Some(existing) = cache.get(&name.to_string()) {
            return Ok(existing.clone());
        }
        cache.put(name.to_string(), cached.clone());
        Ok(cached)
    }

    pub fn evict_work_spec(&self, name: &str) {
        lru_remove(&self.specs, &name.to_string());
    }

    pub fn evict_worker(&self, name: &str) {
        lru_remove(&self.workers, &name.to_string());
    }
}

#[async_trait::async_trait]
impl Namespace for CachedNamespace {
    fn name(&self) -> &str {
        &self.name
    }

    async fn destroy(&self) -> Result<(), CoordinateError> {
        let (generation, upstream) = self.cell.get();
        let result = match upstream.destroy().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().destroy().await
            }
            result => result,
        };
        if result.is_ok() {
            self.invalidate();
        }
        result
    }

    async fn set_work_spec(&self, data: Dict) -> Result<Arc<dyn WorkSpec>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        let created = match upstream.set_work_spec(data.clone()).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().set_work_spec(data).await
            }
            result => result,
        }?;
        let name = created.name().to_string();
        Ok(self.insert_spec(&name, created)?)
    }

    async fn work_spec(&self, name: &str) -> Result<Arc<dyn WorkSpec>, CoordinateError> {
        Ok(self.cached_work_spec(name).await?)
    }

    async fn destroy_work_spec(&self, name: &str) -> Result<(), CoordinateError> {
        let (generation, upstream) = self.cell.get();
        let result = match upstream.destroy_work_spec(name).await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().destroy_work_spec(name).await
            }
            result => result,
        };
        if result.is_ok() {
            self.evict_work_spec(name);
        }
        result
    }

    async fn work_spec_names(&self) -> Result<Vec<String>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        match upstream.work_spec_names().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().work_spec_names().await
            }
            result => result,
        }
    }

    async fn worker(&self, name: &str) -> Result<Arc<dyn Worker>, CoordinateError> {
        Ok(self.cached_worker(name).await?)
    }

    async fn workers(&self) -> Result<HashMap<String, Arc<dyn Worker>>, CoordinateError> {
        let (generation, upstream) = self.cell.get();
        let raw = match upstream.workers().await {
            Err(error) if error.is_gone() => {
                self.recover(generation, &error).await?;
                self.cell.handle().workers().await
            }
            result => result,
        }?;
        let mut result: HashMap<String, Arc<dyn Worker>> = HashMap::new();
        for (name, upstream_worker) in raw {
            // bulk listing observes without promoting recency
            if let Some(cached) = lru_peek(&self.workers, &name) {
                result.insert(name, cached);
                continue;
            }
            let cached = self.insert_worker(&name, upstream_worker)?;
            result.insert(name, cached);
        }
        Ok(result)
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
