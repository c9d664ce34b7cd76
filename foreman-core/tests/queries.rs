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

//! Work unit queries, bulk prioritization and status counting.

use crate::{dict, test_backend, Tracing};
use assert2::check;
use chrono::Duration;
use foreman_common::clock::Clock;
use foreman_common::model::{
    AttemptRequest, WorkUnitMeta, WorkUnitQuery, WorkUnitStatus,
};
use foreman_core::backend::{Coordinate, Namespace, WorkSpec};
use serde_json::json;
use std::sync::Arc;
use test_r::{inherit_test_dep, test};

inherit_test_dep!(Tracing);

/// A spec with one pending unit (`a`), two available (`b`, `c`) and one
/// delayed (`d`).
async fn mixed_spec(
    backend: &Arc<dyn Coordinate>,
    delay_base: chrono::DateTime<chrono::Utc>,
) -> (Arc<dyn Namespace>, Arc<dyn WorkSpec>) {
    let ns = backend.namespace("ns").await.unwrap();
    let spec = ns.set_work_spec(dict(json!({"name": "s"}))).await.unwrap();
    for name in ["a", "b", "c"] {
        spec.add_work_unit(name, dict(json!({})), WorkUnitMeta::default())
            .await
            .unwrap();
    }
    spec.add_work_unit(
        "d",
        dict(json!({})),
        WorkUnitMeta {
            priority: 0.0,
            not_before: Some(delay_base + Duration::seconds(600)),
        },
    )
    .await
    .unwrap();
    let worker = ns.worker("w").await.unwrap();
    let attempts = worker
        .request_attempts(AttemptRequest::default())
        .await
        .unwrap();
    check!(attempts[0].work_unit().await.unwrap().name() == "a");
    (ns, spec)
}

fn names(units: &[Arc<dyn foreman_core::backend::WorkUnit>]) -> Vec<String> {
    units.iter().map(|unit| unit.name().to_string()).collect()
}

#[test]
async fn status_filter_selects_matching_units(_tracing: &Tracing) {
    let (backend, clock) = test_backend();
    let (_ns, spec) = mixed_spec(&backend, clock.now()).await;

    let available = spec
        .work_units(&WorkUnitQuery {
            statuses: vec![WorkUnitStatus::Available],
            ..WorkUnitQuery::default()
        })
        .await
        .unwrap();
    check!(names(&available) == vec!["b", "c"]);

    let pending = spec
        .work_units(&WorkUnitQuery {
            statuses: vec![WorkUnitStatus::Pending],
            ..WorkUnitQuery::default()
        })
        .await
        .unwrap();
    check!(names(&pending) == vec!["a"]);

    let delayed = spec
        .work_units(&WorkUnitQuery {
            statuses: vec![WorkUnitStatus::Delayed],
            ..WorkUnitQuery::default()
        })
        .await
        .unwrap();
    check!(names(&delayed) == vec!["d"]);
}

#[test]
async fn names_and_statuses_intersect(_tracing: &Tracing) {
    let (backend, clock) = test_backend();
    let (_ns, spec) = mixed_spec(&backend, clock.now()).await;

    let result = spec
        .work_units(&WorkUnitQuery {
            names: vec!["a".to_string(), "b".to_string()],
            statuses: vec![WorkUnitStatus::Available],
            ..WorkUnitQuery::default()
        })
        .await
        .unwrap();
    check!(names(&result) == vec!["b"]);
}

#[test]
async fn previous_name_and_limit_paginate(_tracing: &Tracing) {
    let (backend, clock) = test_backend();
    let (_ns, spec) = mixed_spec(&backend, clock.now()).await;

    let page = spec
        .work_units(&WorkUnitQuery {
            previous_name: Some("a".to_string()),
            limit: 2,
            ..WorkUnitQuery::default()
        })
        .await
        .unwrap();
    check!(names(&page) == vec!["b", "c"]);

    let next = spec
        .work_units(&WorkUnitQuery {
            previous_name: Some("c".to_string()),
            limit: 2,
            ..WorkUnitQuery::default()
        })
        .await
        .unwrap();
    check!(names(&next) == vec!["d"]);
}

#[test]
async fn count_work_unit_status_folds_counts(_tracing: &Tracing) {
    let (backend, clock) = test_backend();
    let (_ns, spec) = mixed_spec(&backend, clock.now()).await;

    let counts = spec.count_work_unit_status().await.unwrap();
    check!(counts.get(&WorkUnitStatus::Pending) == Some(&1));
    check!(counts.get(&WorkUnitStatus::Available) == Some(&2));
    check!(counts.get(&WorkUnitStatus::Delayed) == Some(&1));
    check!(counts.get(&WorkUnitStatus::Finished).is_none());
}

#[test]
async fn bulk_priorities_reorder_the_queue(_tracing: &Tracing) {
    let (backend, _clock) = test_backend();
    let ns = backend.namespace("ns").await.unwrap();
    let spec = ns.set_work_spec(dict(json!({"name": "s"}))).await.unwrap();
    for name in ["a", "b", "c"] {
        spec.add_work_unit(name, dict(json!({})), WorkUnitMeta::default())
            .await
            .unwrap();
    }

    spec.set_work_unit_priorities(&WorkUnitQuery::by_name("c"), 10.0)
        .await
        .unwrap();
    spec.adjust_work_unit_priorities(&WorkUnitQuery::by_name("b"), 5.0)
        .await
        .unwrap();

    let worker = ns.worker("w").await.unwrap();
    let mut order = Vec::new();
    loop {
        let attempts = worker
            .request_attempts(AttemptRequest::default())
            .await
            .unwrap();
        if attempts.is_empty() {
            break;
        }
        order.push(attempts[0].work_unit().await.unwrap().name().to_string());
    }
    check!(order == vec!["c", "b", "a"]);
}

#[test]
async fn meta_with_counts_reports_live_numbers(_tracing: &Tracing) {
    let (backend, clock) = test_backend();
    let (_ns, spec) = mixed_spec(&backend, clock.now()).await;

    let meta = spec.meta(true).await.unwrap();
    check!(meta.available_count == 2);
    check!(meta.pending_count == 1);

    let bare = spec.meta(false).await.unwrap();
    check!(bare.available_count == 0);
    check!(bare.pending_count == 0);
}
