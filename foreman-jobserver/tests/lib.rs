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

//! End-to-end scenarios through the jobserver method surface, on a mock
//! clock and a seeded scheduler.

use assert2::{check, let_assert};
use foreman_common::clock::{Clock, MockClock};
use foreman_common::model::Dict;
use foreman_common::tracing::{init_tracing_with_default_debug_env_filter, TracingConfig};
use foreman_core::backend::Coordinate;
use foreman_core::config::MemoryBackendConfig;
use foreman_core::memory::MemoryBackend;
use foreman_jobserver::{GetWorkResponse, JobServer};
use serde_json::json;
use std::sync::Arc;
use test_r::{test, test_dep};

test_r::enable!();

mod methods;

#[derive(Debug)]
pub struct Tracing;

impl Tracing {
    pub fn init() -> Self {
        init_tracing_with_default_debug_env_filter(
            &TracingConfig::test_pretty_without_time("foreman-jobserver-tests")
                .with_env_overrides(),
        );
        Self
    }
}

#[test_dep]
fn tracing() -> Tracing {
    Tracing::init()
}

pub fn dict(value: serde_json::Value) -> Dict {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

pub async fn server() -> (JobServer, Arc<MockClock>) {
    let clock = Arc::new(MockClock::default());
    let config = MemoryBackendConfig {
        random_seed: Some(7),
        ..MemoryBackendConfig::default()
    };
    let backend: Arc<dyn Coordinate> = Arc::new(MemoryBackend::new(config, clock.clone()));
    let namespace = backend.namespace("default").await.unwrap();
    let server_clock: Arc<dyn Clock> = clock.clone();
    (JobServer::new(namespace, server_clock), clock)
}

/// Unwraps a single-triple `get_work` response.
pub fn single(response: GetWorkResponse) -> Option<(String, Vec<u8>, Dict)> {
    match response {
        GetWorkResponse::Single(triple) => {
            triple.map(|t| (t.work_spec, t.work_unit_key, t.data))
        }
        GetWorkResponse::Multiple(_) => panic!("expected a single-triple response"),
    }
}

#[test]
async fn empty_namespace_returns_empty_triple(_tracing: &Tracing) {
    let (server, _clock) = server().await;
    let (response, message) = server.get_work("w", &dict(json!({}))).await.unwrap();
    check!(message == "");
    check!(single(response) == None);
}

#[test]
async fn missing_spec_is_a_soft_error(_tracing: &Tracing) {
    let (server, _clock) = server().await;
    let (data, message) = server.get_work_spec("nope").await.unwrap();
    check!(data == None);
    check!(message.contains("no such work spec"));

    let (added, message) = server.add_work_units("nope", &[json!("u")]).await.unwrap();
    check!(added == 0);
    check!(!message.is_empty());
}

#[test]
async fn malformed_spec_data_is_a_hard_error(_tracing: &Tracing) {
    let (server, _clock) = server().await;
    let_assert!(Err(_) = server.set_work_spec(dict(json!({"weight": 10}))).await);
}
