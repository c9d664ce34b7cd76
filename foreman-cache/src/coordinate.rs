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

use crate::cell::lru_get;
use crate::config::CacheConfig;
use crate::namespace::CachedNamespace;
use foreman_common::error::CoordinateError;
use foreman_common::model::Summary;
use foreman_core::backend::{Coordinate, Namespace};
use lru::LruCache;
use std::sync::{Arc, RwLock};

/// Entry point of the proxy: wraps a backend root and caches namespace
/// handles by name.
pub struct CachedCoordinate {
    inner: Arc<dyn Coordinate>,
    config: CacheConfig,
    namespaces: Arc<RwLock<LruCache<String, Arc<CachedNamespace>>>>,
}

impl CachedCoordinate {
    pub fn new(inner: Arc<dyn Coordinate>, config: CacheConfig) -> Self {
        let namespaces = Arc::new(RwLock::new(LruCache::new(config.namespace_capacity())));
        Self {
            inner,
            config,
            namespaces,
        }
    }

    async fn cached_namespace(
        &self,
        name: &str,
    ) -> Result<Arc<CachedNamespace>, CoordinateError> {
        if let Some(cached) = lru_get(&self.namespaces, &name.to_string()) {
            return Ok(cached);
        }
        let upstream = self.inner.namespace(name).await?;
        let cached = CachedNamespace::create(
            self.inner.clone(),
            Arc::downgrade(&self.namespaces),
            name,
            upstream,
            &self.config,
        );
        // two racing callers may both build an entry; the second check
        // keeps exactly one alive
        {
            let mut cache = self.namespaces.write().unwrap();
            if let Some(existing) = cache.get(&name.to_string()) {
                return Ok(existing.clone());
            }
            cache.put(name.to_string(), cached.clone());
        }
        Ok(cached)
    }
}

#[async_trait::async_trait]
impl Coordinate for CachedCoordinate {
    async fn namespace(&self, name: &str) -> Result<Arc<dyn Namespace>, CoordinateError> {
        Ok(self.cached_namespace(name).await?)
    }

    async fn namespaces(&self) -> Result<Vec<Arc<dyn Namespace>>, CoordinateError> {
        let upstream = self.inner.namespaces().await?;
        let mut result: Vec<Arc<dyn Namespace>> = Vec::new();
        for namespace in upstream {
            result.push(self.cached_namespace(namespace.name()).await?);
        }
        Ok(result)
    }

    async fn summarize(&self) -> Result<Summary, CoordinateError> {
        self.inner.summarize().await
    }
}
