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

//! Scheduler behavior through `request_attempts`: filters, caps,
//! continuous generation, retries and preemption.

use crate::{dict, test_backend, Tracing};
use assert2::check;
use chrono::Duration;
use foreman_common::clock::Clock;
use foreman_common::model::{AttemptRequest, WorkUnitMeta, WorkUnitStatus};
use serde_json::json;
use test_r::{inherit_test_dep, test};

inherit_test_dep!(Tracing);

#[test]
async fn basic_flow_dispatches_and_finishes(_tracing: &Tracing) {
    let (backend, _clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    let spec = ns
        .set_work_spec(dict(json!({"name": "s", "min_gb": 1})))
        .await
        .unwrap();
    spec.add_work_unit("u", dict(json!({"k": "v"})), WorkUnitMeta::default())
        .await
        .unwrap();

    let worker = ns.worker("w").await.unwrap();
    let attempts = worker
        .request_attempts(AttemptRequest {
            available_gb: 1.0,
            ..AttemptRequest::default()
        })
        .await
        .unwrap();
    check!(attempts.len() == 1);

    let unit = attempts[0].work_unit().await.unwrap();
    check!(unit.work_spec_name() == "s");
    check!(unit.name() == "u");
    check!(attempts[0].data().await.unwrap() == Some(dict(json!({"k": "v"}))));

    attempts[0]
        .finish(Some(dict(json!({"k": "v", "output": null}))))
        .await
        .unwrap();
    check!(unit.status().await.unwrap() == WorkUnitStatus::Finished);
}

#[test]
async fn insufficient_memory_gets_nothing(_tracing: &Tracing) {
    let (backend, _clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    let spec = ns
        .set_work_spec(dict(json!({"name": "s", "min_gb": 8})))
        .await
        .unwrap();
    spec.add_work_unit("u", dict(json!({})), WorkUnitMeta::default())
        .await
        .unwrap();

    let worker = ns.worker("w").await.unwrap();
    let attempts = worker
        .request_attempts(AttemptRequest {
            available_gb: 4.0,
            ..AttemptRequest::default()
        })
        .await
        .unwrap();
    check!(attempts.is_empty());
}

#[test]
async fn equal_priority_pops_by_name(_tracing: &Tracing) {
    let (backend, _clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    let spec = ns.set_work_spec(dict(json!({"name": "s"}))).await.unwrap();
    for name in ["a", "b", "c"] {
        spec.add_work_unit(name, dict(json!({})), WorkUnitMeta::default())
            .await
            .unwrap();
    }
    let worker = ns.worker("w").await.unwrap();

    let first = worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap();
    check!(first[0].work_unit().await.unwrap().name() == "a");

    // raising c's priority reorders the queue
    spec.work_unit("c")
        .await
        .unwrap()
        .set_priority(1.0)
        .await
        .unwrap();

    let second = worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap();
    check!(second[0].work_unit().await.unwrap().name() == "c");

    let third = worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap();
    check!(third[0].work_unit().await.unwrap().name() == "b");

    let empty = worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap();
    check!(empty.is_empty());
}

#[test]
async fn paused_spec_yields_empty_batch(_tracing: &Tracing) {
    let (backend, _clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    let spec = ns.set_work_spec(dict(json!({"name": "s"}))).await.unwrap();
    spec.add_work_unit("u", dict(json!({})), WorkUnitMeta::default())
        .await
        .unwrap();
    let worker = ns.worker("w").await.unwrap();

    let mut meta = spec.meta(false).await.unwrap();
    meta.paused = true;
    spec.set_meta(meta).await.unwrap();
    check!(worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap()
        .is_empty());

    let mut meta = spec.meta(false).await.unwrap();
    meta.paused = false;
    spec.set_meta(meta).await.unwrap();
    let attempts = worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap();
    check!(attempts.len() == 1);
}

#[test]
async fn weighted_selection_prefers_heavy_spec(_tracing: &Tracing) {
    let (backend, _clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    let light = ns
        .set_work_spec(dict(json!({"name": "light", "weight": 1})))
        .await
        .unwrap();
    for index in 1..=100 {
        light
            .add_work_unit(
                &format!("u{index:03}"),
                dict(json!({})),
                WorkUnitMeta::default(),
            )
            .await
            .unwrap();
    }
    let heavy = ns
        .set_work_spec(dict(json!({"name": "heavy", "weight": 3000})))
        .await
        .unwrap();
    for index in 1..=4 {
        heavy
            .add_work_unit(
                &format!("z{index:03}"),
                dict(json!({})),
                WorkUnitMeta::default(),
            )
            .await
            .unwrap();
    }

    let worker = ns.worker("w").await.unwrap();
    let attempts = worker
        .request_attempts(AttemptRequest {
            number_of_work_units: 10,
            ..AttemptRequest::default()
        })
        .await
        .unwrap();

    // one spec per request: the heavy spec wins the draw and its four
    // units do not spill over into the light one
    check!(attempts.len() == 4);
    for attempt in &attempts {
        check!(attempt.work_unit().await.unwrap().work_spec_name() == "heavy");
    }
}

#[test]
async fn runtime_filter_matches_tags(_tracing: &Tracing) {
    let (backend, _clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    let spec = ns
        .set_work_spec(dict(json!({"name": "s", "runtime": "python_2"})))
        .await
        .unwrap();
    spec.add_work_unit("u", dict(json!({})), WorkUnitMeta::default())
        .await
        .unwrap();
    let worker = ns.worker("w").await.unwrap();

    let wrong = worker
        .request_attempts(AttemptRequest {
            runtimes: Some(vec!["go".to_string()]),
            ..AttemptRequest::default()
        })
        .await
        .unwrap();
    check!(wrong.is_empty());

    let matching = worker
        .request_attempts(AttemptRequest {
            runtimes: Some(vec!["python_2".to_string()]),
            ..AttemptRequest::default()
        })
        .await
        .unwrap();
    check!(matching.len() == 1);
}

#[test]
async fn work_spec_whitelist_is_honored(_tracing: &Tracing) {
    let (backend, _clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    for name in ["one", "two"] {
        let spec = ns
            .set_work_spec(dict(json!({"name": name})))
            .await
            .unwrap();
        spec.add_work_unit("u", dict(json!({})), WorkUnitMeta::default())
            .await
            .unwrap();
    }
    let worker = ns.worker("w").await.unwrap();

    let attempts = worker
        .request_attempts(AttemptRequest {
            work_specs: Some(vec!["two".to_string()]),
            ..AttemptRequest::default()
        })
        .await
        .unwrap();
    check!(attempts.len() == 1);
    check!(attempts[0].work_unit().await.unwrap().work_spec_name() == "two");
}

#[test]
async fn max_running_caps_concurrent_attempts(_tracing: &Tracing) {
    let (backend, _clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    let spec = ns
        .set_work_spec(dict(json!({"name": "s", "max_running": 2})))
        .await
        .unwrap();
    for name in ["a", "b", "c", "d", "e"] {
        spec.add_work_unit(name, dict(json!({})), WorkUnitMeta::default())
            .await
            .unwrap();
    }
    let worker = ns.worker("w").await.unwrap();

    let first = worker
        .request_attempts(AttemptRequest {
            number_of_work_units: 10,
            ..AttemptRequest::default()
        })
        .await
        .unwrap();
    check!(first.len() == 2);

    // the cap is already saturated
    let second = worker
        .request_attempts(AttemptRequest {
            number_of_work_units: 10,
            ..AttemptRequest::default()
        })
        .await
        .unwrap();
    check!(second.is_empty());

    // finishing one frees one slot
    first[0].finish(None).await.unwrap();
    let third = worker
        .request_attempts(AttemptRequest {
            number_of_work_units: 10,
            ..AttemptRequest::default()
        })
        .await
        .unwrap();
    check!(third.len() == 1);
}

#[test]
async fn max_attempts_returned_limits_batches(_tracing: &Tracing) {
    let (backend, _clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    let spec = ns
        .set_work_spec(dict(json!({"name": "s", "max_getwork": 2})))
        .await
        .unwrap();
    for name in ["a", "b", "c"] {
        spec.add_work_unit(name, dict(json!({})), WorkUnitMeta::default())
            .await
            .unwrap();
    }
    let worker = ns.worker("w").await.unwrap();
    let attempts = worker
        .request_attempts(AttemptRequest {
            number_of_work_units: 10,
            ..AttemptRequest::default()
        })
        .await
        .unwrap();
    check!(attempts.len() == 2);
}

#[test]
async fn exhausted_retries_fail_the_unit(_tracing: &Tracing) {
    let (backend, _clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    let spec = ns
        .set_work_spec(dict(json!({"name": "s", "max_retries": 1})))
        .await
        .unwrap();
    spec.add_work_unit("u", dict(json!({})), WorkUnitMeta::default())
        .await
        .unwrap();
    let worker = ns.worker("w").await.unwrap();

    let first = worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap();
    check!(first.len() == 1);
    first[0].retry(None, Duration::zero()).await.unwrap();

    // history is now one attempt, exactly at the limit
    let second = worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap();
    check!(second.len() == 1);
    second[0].retry(None, Duration::zero()).await.unwrap();

    // history exceeds the limit: the would-be attempt fails on the spot
    // and is not part of the batch
    let third = worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap();
    check!(third.is_empty());
    let unit = spec.work_unit("u").await.unwrap();
    check!(unit.status().await.unwrap() == WorkUnitStatus::Failed);
    check!(unit.attempt_count().await.unwrap() == 3);
}

#[test]
async fn continuous_spec_synthesizes_units(_tracing: &Tracing) {
    let (backend, clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    ns.set_work_spec(dict(
        json!({"name": "s", "continuous": true, "interval": 10}),
    ))
    .await
    .unwrap();
    let worker = ns.worker("w").await.unwrap();

    let first = worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap();
    check!(first.len() == 1);
    check!(first[0].work_unit().await.unwrap().name() == "0.000");

    // inside the interval nothing is due
    clock.advance(Duration::seconds(5));
    let quiet = worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap();
    check!(quiet.is_empty());

    clock.advance(Duration::seconds(5));
    let second = worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap();
    check!(second.len() == 1);
    check!(second[0].work_unit().await.unwrap().name() == "10.000");
}

#[test]
async fn delayed_unit_waits_for_its_time(_tracing: &Tracing) {
    let (backend, clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    let spec = ns.set_work_spec(dict(json!({"name": "s"}))).await.unwrap();
    let not_before = clock.now() + Duration::seconds(90);
    spec.add_work_unit(
        "u",
        dict(json!({})),
        WorkUnitMeta {
            priority: 0.0,
            not_before: Some(not_before),
        },
    )
    .await
    .unwrap();
    let worker = ns.worker("w").await.unwrap();

    check!(worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap()
        .is_empty());

    clock.advance(Duration::seconds(60));
    check!(worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap()
        .is_empty());

    clock.advance(Duration::seconds(60));
    let attempts = worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap();
    check!(attempts.len() == 1);
}

#[test]
async fn successor_with_work_preempts(_tracing: &Tracing) {
    let (backend, _clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    let first = ns
        .set_work_spec(dict(json!({"name": "first", "then": "second", "priority": 10})))
        .await
        .unwrap();
    first
        .add_work_unit("f", dict(json!({})), WorkUnitMeta::default())
        .await
        .unwrap();
    let second = ns
        .set_work_spec(dict(json!({"name": "second"})))
        .await
        .unwrap();
    second
        .add_work_unit("s", dict(json!({})), WorkUnitMeta::default())
        .await
        .unwrap();

    let worker = ns.worker("w").await.unwrap();
    let attempts = worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap();
    check!(attempts[0].work_unit().await.unwrap().work_spec_name() == "second");

    // with the successor drained, the predecessor runs again
    attempts[0].finish(None).await.unwrap();
    let attempts = worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap();
    check!(attempts[0].work_unit().await.unwrap().work_spec_name() == "first");
}

#[test]
async fn lease_time_is_clamped(_tracing: &Tracing) {
    let (backend, clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    let spec = ns.set_work_spec(dict(json!({"name": "s"}))).await.unwrap();
    spec.add_work_unit("u", dict(json!({})), WorkUnitMeta::default())
        .await
        .unwrap();
    let worker = ns.worker("w").await.unwrap();

    let attempts = worker
        .request_attempts(AttemptRequest {
            lease_time: Some(Duration::days(30)),
            ..AttemptRequest::default()
        })
        .await
        .unwrap();
    let expiration = attempts[0].expiration_time().await.unwrap();
    check!(expiration == clock.now() + Duration::hours(24));
}
