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

//! Stale-handle recovery and cache behavior of the proxy layer.
//!
//! Each test drives a proxied root and mutates the backing store through a
//! separate raw handle, the way a remote client and the server disagree in
//! production.

use foreman_cache::{CacheConfig, CachedCoordinate};
use foreman_common::clock::MockClock;
use foreman_common::error::CoordinateError;
use foreman_common::model::{AttemptRequest, Dict, WorkUnitMeta, WorkUnitQuery};
use foreman_common::tracing::{init_tracing_with_default_debug_env_filter, TracingConfig};
use foreman_core::backend::Coordinate;
use foreman_core::config::MemoryBackendConfig;
use foreman_core::memory::MemoryBackend;
use assert2::{check, let_assert};
use serde_json::json;
use std::sync::Arc;
use test_r::{test, test_dep};

test_r::enable!();

#[derive(Debug)]
pub struct Tracing;

impl Tracing {
    pub fn init() -> Self {
        init_tracing_with_default_debug_env_filter(
            &TracingConfig::test_pretty_without_time("foreman-cache-tests").with_env_overrides(),
        );
        Self
    }
}

#[test_dep]
fn tracing() -> Tracing {
    Tracing::init()
}

fn dict(value: serde_json::Value) -> Dict {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

/// A raw backend plus a proxied view of it.
fn proxied() -> (Arc<dyn Coordinate>, Arc<dyn Coordinate>) {
    let clock = Arc::new(MockClock::default());
    let config = MemoryBackendConfig {
        random_seed: Some(7),
        ..MemoryBackendConfig::default()
    };
    let raw: Arc<dyn Coordinate> = Arc::new(MemoryBackend::new(config, clock));
    let cached: Arc<dyn Coordinate> =
        Arc::new(CachedCoordinate::new(raw.clone(), CacheConfig::default()));
    (raw, cached)
}

#[test]
async fn recreated_work_spec_recovers_transparently(_tracing: &Tracing) {
    let (raw, cached) = proxied();
    let cached_ns = cached.namespace("ns").await.unwrap();
    let spec = cached_ns
        .set_work_spec(dict(json!({"name": "s", "priority": 1})))
        .await
        .unwrap();
    check!(spec.data().await.unwrap() == dict(json!({"name": "s", "priority": 1})));

    // the server destroys and recreates the spec behind the proxy's back
    let raw_ns = raw.namespace("ns").await.unwrap();
    raw_ns.destroy_work_spec("s").await.unwrap();
    raw_ns
        .set_work_spec(dict(json!({"name": "s", "priority": 2})))
        .await
        .unwrap();

    // the stale cached handle refetches by name and retries once
    check!(spec.data().await.unwrap() == dict(json!({"name": "s", "priority": 2})));
}

#[test]
async fn destroyed_namespace_leaves_spec_handles_gone(_tracing: &Tracing) {
    let (raw, cached) = proxied();
    let cached_ns = cached.namespace("ns").await.unwrap();
    let spec = cached_ns
        .set_work_spec(dict(json!({"name": "s"})))
        .await
        .unwrap();

    raw.namespace("ns").await.unwrap().destroy().await.unwrap();

    // the namespace refetch succeeds (a fresh empty namespace), but the
    // spec does not exist there, so the caller sees the original signal
    let_assert!(Err(CoordinateError::Gone { .. }) = spec.data().await);
    let_assert!(Err(CoordinateError::NoSuchWorkSpec { .. }) = cached_ns.work_spec("s").await);

    // the namespace handle itself recovered
    check!(cached_ns.work_spec_names().await.unwrap().is_empty());
}

#[test]
async fn recreated_work_unit_recovers_transparently(_tracing: &Tracing) {
    let (raw, cached) = proxied();
    let cached_ns = cached.namespace("ns").await.unwrap();
    let spec = cached_ns
        .set_work_spec(dict(json!({"name": "s"})))
        .await
        .unwrap();
    let unit = spec
        .add_work_unit("u", dict(json!({"v": 1})), WorkUnitMeta::default())
        .await
        .unwrap();

    let raw_ns = raw.namespace("ns").await.unwrap();
    raw_ns.destroy_work_spec("s").await.unwrap();
    let raw_spec = raw_ns
        .set_work_spec(dict(json!({"name": "s"})))
        .await
        .unwrap();
    raw_spec
        .add_work_unit("u", dict(json!({"v": 2})), WorkUnitMeta::default())
        .await
        .unwrap();

    // recovery cascades: unit refetch goes through the spec, which itself
    // refetches through the namespace
    check!(unit.data().await.unwrap() == dict(json!({"v": 2})));
}

#[test]
async fn missing_unit_after_recreation_reports_original_gone(_tracing: &Tracing) {
    let (raw, cached) = proxied();
    let cached_ns = cached.namespace("ns").await.unwrap();
    let spec = cached_ns
        .set_work_spec(dict(json!({"name": "s"})))
        .await
        .unwrap();
    let unit = spec
        .add_work_unit("u", dict(json!({})), WorkUnitMeta::default())
        .await
        .unwrap();

    let raw_ns = raw.namespace("ns").await.unwrap();
    raw_ns.destroy_work_spec("s").await.unwrap();
    raw_ns
        .set_work_spec(dict(json!({"name": "s"})))
        .await
        .unwrap();

    let_assert!(Err(CoordinateError::Gone { .. }) = unit.status().await);
    let_assert!(Err(CoordinateError::NoSuchWorkUnit { .. }) = spec.work_unit("u").await);
}

#[test]
async fn attempts_route_entities_through_the_cache(_tracing: &Tracing) {
    let (_raw, cached) = proxied();
    let ns = cached.namespace("ns").await.unwrap();
    let spec = ns.set_work_spec(dict(json!({"name": "s"}))).await.unwrap();
    spec.add_work_unit("u", dict(json!({"k": "v"})), WorkUnitMeta::default())
        .await
        .unwrap();
    let worker = ns.worker("w").await.unwrap();

    let attempts = worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap();
    check!(attempts.len() == 1);

    let unit = attempts[0].work_unit().await.unwrap();
    check!(unit.name() == "u");
    check!(unit.work_spec_name() == "s");
    let via_attempt = attempts[0].worker().await.unwrap();
    check!(via_attempt.name() == "w");

    attempts[0].finish(None).await.unwrap();
    check!(worker.active_attempts().await.unwrap().is_empty());
}

#[test]
async fn wrapped_unit_is_unwrapped_for_make_attempt(_tracing: &Tracing) {
    let (_raw, cached) = proxied();
    let ns = cached.namespace("ns").await.unwrap();
    let spec = ns.set_work_spec(dict(json!({"name": "s"}))).await.unwrap();
    let unit = spec
        .add_work_unit("u", dict(json!({})), WorkUnitMeta::default())
        .await
        .unwrap();
    let worker = ns.worker("w").await.unwrap();

    let attempt = worker.make_attempt(&unit, None).await.unwrap();
    check!(attempt.work_unit().await.unwrap().name() == "u");
}

#[test]
async fn wrapped_worker_is_unwrapped_for_set_parent(_tracing: &Tracing) {
    let (_raw, cached) = proxied();
    let ns = cached.namespace("ns").await.unwrap();
    let parent = ns.worker("parent").await.unwrap();
    let child = ns.worker("child").await.unwrap();

    child.set_parent(Some(&parent)).await.unwrap();
    check!(child.parent().await.unwrap().unwrap().name() == "parent");
    check!(parent.children().await.unwrap().len() == 1);
}

#[test]
async fn eviction_only_drops_cache_entries(_tracing: &Tracing) {
    // a unit cache of two entries forces evictions immediately
    let clock = Arc::new(MockClock::default());
    let raw: Arc<dyn Coordinate> =
        Arc::new(MemoryBackend::new(MemoryBackendConfig::default(), clock));
    let cached: Arc<dyn Coordinate> = Arc::new(CachedCoordinate::new(
        raw,
        CacheConfig {
            work_unit_cache_size: 2,
            ..CacheConfig::default()
        },
    ));

    let ns = cached.namespace("ns").await.unwrap();
    let spec = ns.set_work_spec(dict(json!({"name": "s"}))).await.unwrap();
    for name in ["a", "b", "c", "d"] {
        spec.add_work_unit(name, dict(json!({"n": name})), WorkUnitMeta::default())
            .await
            .unwrap();
    }

    // every unit keeps working whether or not its handle is still cached
    for name in ["a", "b", "c", "d"] {
        let unit = spec.work_unit(name).await.unwrap();
        check!(unit.data().await.unwrap() == dict(json!({"n": name})));
    }
    let all = spec.work_units(&WorkUnitQuery::default()).await.unwrap();
    check!(all.len() == 4);
}

#[test]
async fn destroyed_namespace_recovers_through_the_root(_tracing: &Tracing) {
    let (raw, cached) = proxied();
    let ns = cached.namespace("ns").await.unwrap();
    ns.set_work_spec(dict(json!({"name": "s"}))).await.unwrap();

    raw.namespace("ns").await.unwrap().destroy().await.unwrap();

    // the cached namespace transparently binds to the fresh incarnation
    let spec = ns.set_work_spec(dict(json!({"name": "t"}))).await.unwrap();
    check!(spec.name() == "t");
    check!(ns.work_spec_names().await.unwrap() == vec!["t".to_string()]);
}
