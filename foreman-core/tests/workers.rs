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

//! Worker registration, the parent/child tree and attempt bookkeeping.

use crate::{dict, test_backend, Tracing};
use assert2::check;
use chrono::Duration;
use foreman_common::clock::Clock;
use foreman_common::model::{AttemptRequest, WorkUnitMeta};
use serde_json::json;
use test_r::{inherit_test_dep, test};

inherit_test_dep!(Tracing);

#[test]
async fn worker_is_registered_on_first_sight(_tracing: &Tracing) {
    let (backend, clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    let worker = ns.worker("w").await.unwrap();

    check!(worker.active().await.unwrap());
    check!(worker.mode().await.unwrap() == "");
    check!(worker.data().await.unwrap().is_none());
    // default lifetime is fifteen minutes
    check!(worker.expiration().await.unwrap() == clock.now() + Duration::seconds(15 * 60));
}

#[test]
async fn update_stores_heartbeat_and_reactivates(_tracing: &Tracing) {
    let (backend, clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    let worker = ns.worker("w").await.unwrap();

    worker.deactivate().await.unwrap();
    check!(!worker.active().await.unwrap());

    let now = clock.now();
    worker
        .update(
            Some(dict(json!({"host": "example"}))),
            now,
            now + Duration::seconds(600),
            "run",
        )
        .await
        .unwrap();

    check!(worker.active().await.unwrap());
    check!(worker.mode().await.unwrap() == "run");
    check!(worker.data().await.unwrap() == Some(dict(json!({"host": "example"}))));
    check!(worker.last_update().await.unwrap() == now);
    check!(worker.expiration().await.unwrap() == now + Duration::seconds(600));
}

#[test]
async fn parent_links_are_bidirectional(_tracing: &Tracing) {
    let (backend, _clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    let parent = ns.worker("parent").await.unwrap();
    let child = ns.worker("child").await.unwrap();

    child.set_parent(Some(&parent)).await.unwrap();
    check!(child.parent().await.unwrap().unwrap().name() == "parent");
    let children = parent.children().await.unwrap();
    check!(children.len() == 1);
    check!(children[0].name() == "child");

    // re-linking moves both edges
    let other = ns.worker("other").await.unwrap();
    child.set_parent(Some(&other)).await.unwrap();
    check!(parent.children().await.unwrap().is_empty());
    check!(other.children().await.unwrap().len() == 1);

    child.set_parent(None).await.unwrap();
    check!(child.parent().await.unwrap().is_none());
    check!(other.children().await.unwrap().is_empty());
}

#[test]
async fn child_attempts_collects_from_children(_tracing: &Tracing) {
    let (backend, _clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    let spec = ns.set_work_spec(dict(json!({"name": "s"}))).await.unwrap();
    for name in ["a", "b"] {
        spec.add_work_unit(name, dict(json!({})), WorkUnitMeta::default())
            .await
            .unwrap();
    }
    let parent = ns.worker("parent").await.unwrap();
    let child = ns.worker("child").await.unwrap();
    child.set_parent(Some(&parent)).await.unwrap();

    let attempts = child
        .request_attempts(AttemptRequest {
            number_of_work_units: 2,
            ..AttemptRequest::default()
        })
        .await
        .unwrap();
    check!(attempts.len() == 2);

    let seen = parent.child_attempts().await.unwrap();
    check!(seen.len() == 2);
    check!(parent.active_attempts().await.unwrap().is_empty());
    check!(child.active_attempts().await.unwrap().len() == 2);
    check!(child.all_attempts().await.unwrap().len() == 2);
}

#[test]
async fn finished_attempts_leave_the_active_list(_tracing: &Tracing) {
    let (backend, _clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    let spec = ns.set_work_spec(dict(json!({"name": "s"}))).await.unwrap();
    spec.add_work_unit("u", dict(json!({})), WorkUnitMeta::default())
        .await
        .unwrap();
    let worker = ns.worker("w").await.unwrap();
    let attempts = worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap();

    attempts[0].finish(None).await.unwrap();
    check!(worker.active_attempts().await.unwrap().is_empty());
    check!(worker.all_attempts().await.unwrap().len() == 1);
}
