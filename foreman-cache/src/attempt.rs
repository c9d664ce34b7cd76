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

use crate::namespace::CachedNamespace;
use chrono::{DateTime, Duration, Utc};
use foreman_common::error::CoordinateError;
use foreman_common::model::{AttemptStatus, Dict};
use foreman_core::backend::{Attempt, WorkUnit, Worker};
use std::sync::{Arc, Weak};

/// Thin wrapper around an upstream attempt. Attempts have no name to
/// refetch by, so their operations pass through without stale-handle
/// recovery; the wrapper only routes entity lookups back through the
/// caches.
pub(crate) struct CachedAttempt {
    inner: Arc<dyn Attempt>,
    namespace: Weak<CachedNamespace>,
}

impl CachedAttempt {
    pub fn create(inner: Arc<dyn Attempt>, namespace: Weak<CachedNamespace>) -> Arc<dyn Attempt> {
        Arc::new(CachedAttempt { inner, namespace })
    }
}

#[async_trait::async_trait]
impl Attempt for CachedAttempt {
    async fn work_unit(&self) -> Result<Arc<dyn WorkUnit>, CoordinateError> {
        let upstream = self.inner.work_unit().await?;
        match self.namespace.upgrade() {
            Some(namespace) => {
                let spec = namespace.cached_work_spec(upstream.work_spec_name()).await?;
                Ok(spec.cached_work_unit(upstream.name()).await?)
            }
            None => Ok(upstream),
        }
    }

    async fn worker(&self) -> Result<Arc<dyn Worker>, CoordinateError> {
        let upstream = self.inner.worker().await?;
        match self.namespace.upgrade() {
            Some(namespace) => Ok(namespace.cached_worker(upstream.name()).await?),
            None => Ok(upstream),
        }
    }

    async fn status(&self) -> Result<AttemptStatus, CoordinateError> {
        self.inner.status().await
    }

    async fn data(&self) -> Result<Option<Dict>, CoordinateError> {
        self.inner.data().await
    }

    async fn start_time(&self) -> Result<DateTime<Utc>, CoordinateError> {
        self.inner.start_time().await
    }

    async fn end_time(&self) -> Result<Option<DateTime<Utc>>, CoordinateError> {
        self.inner.end_time().await
    }

    async fn expiration_time(&self) -> Result<DateTime<Utc>, CoordinateError> {
        self.inner.expiration_time().await
    }

    async fn renew(&self, extend: Duration, data: Option<Dict>) -> Result<(), CoordinateError> {
        self.inner.renew(extend, data).await
    }

    async fn expire(&self, data: Option<Dict>) -> Result<(), CoordinateError> {
        self.inner.expire(data).await
    }

    async fn finish(&self, data: Option<Dict>) -> Result<(), CoordinateError> {
        self.inner.finish(data).await
    }

    async fn fail(&self, data: Option<Dict>) -> Result<(), CoordinateError> {
        self.inner.fail(data).await
    }

    async fn retry(&self, data: Option<Dict>, delay: Duration) -> Result<(), CoordinateError> {
        self.inner.retry(data, delay).await
    }
}
