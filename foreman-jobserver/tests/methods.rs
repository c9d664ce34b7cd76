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

//! Individual jobserver methods outside the big scenarios.

use crate::{dict, server, single, Tracing};
use assert2::{check, let_assert};
use foreman_common::clock::Clock;
use foreman_jobserver::JobServerError;
use serde_json::json;
use test_r::{inherit_test_dep, test};

inherit_test_dep!(Tracing);

#[test]
async fn spec_administration_round_trip(_tracing: &Tracing) {
    let (server, _clock) = server().await;
    server
        .set_work_spec(dict(json!({"name": "s", "priority": 3, "weight": 7})))
        .await
        .unwrap();

    let (specs, _) = server.list_work_specs().await.unwrap();
    check!(specs.len() == 1);
    check!(specs[0].get("name") == Some(&json!("s")));

    let (names, _) = server.list_work_spec_names().await.unwrap();
    check!(names == vec!["s".to_string()]);

    let (meta, _) = server.get_work_spec_meta("s").await.unwrap();
    let meta = meta.unwrap();
    check!(meta.get("priority") == Some(&json!(3)));
    check!(meta.get("weight") == Some(&json!(7)));

    server
        .set_work_spec_meta("s", &dict(json!({"weight": 9, "max_running": 4})))
        .await
        .unwrap();
    let (meta, _) = server.get_work_spec_meta("s").await.unwrap();
    let meta = meta.unwrap();
    check!(meta.get("weight") == Some(&json!(9)));
    check!(meta.get("max_running") == Some(&json!(4)));

    let (deleted, _) = server.del_work_spec("s").await.unwrap();
    check!(deleted);
    let (specs, _) = server.list_work_specs().await.unwrap();
    check!(specs.is_empty());
}

#[test]
async fn unit_administration_round_trip(_tracing: &Tracing) {
    let (server, _clock) = server().await;
    server.set_work_spec(dict(json!({"name": "s"}))).await.unwrap();
    let (added, _) = server
        .add_work_units(
            "s",
            &[
                json!("plain"),
                json!(["tuple", {"v": 1}]),
                json!({"name": "mapped", "data": {"v": 2}, "meta": {"priority": 5}}),
            ],
        )
        .await
        .unwrap();
    check!(added == 3);

    let (counts, _) = server.count_work_unit_status("s").await.unwrap();
    check!(counts.get(&1) == Some(&3));

    let (units, _) = server
        .get_work_units("s", &dict(json!({"limit": 2})))
        .await
        .unwrap();
    check!(units.len() == 2);
    check!(units[0].0 == b"mapped".to_vec());
    check!(units[1].0 == b"plain".to_vec());

    let (removed, _) = server
        .del_work_units("s", &dict(json!({"work_unit_keys": ["plain"]})))
        .await
        .unwrap();
    check!(removed == 1);
    let (counts, _) = server.count_work_unit_status("s").await.unwrap();
    check!(counts.get(&1) == Some(&2));
}

#[test]
async fn update_without_attempt_reports_soft_message(_tracing: &Tracing) {
    let (server, _clock) = server().await;
    server.set_work_spec(dict(json!({"name": "s"}))).await.unwrap();
    server.add_work_units("s", &[json!("u")]).await.unwrap();

    let (updated, message) = server
        .update_work_unit("s", "u", &dict(json!({"status": 4})))
        .await
        .unwrap();
    check!(!updated);
    check!(message.contains("no active attempt"));

    // marking an idle unit available is a harmless no-op
    let (updated, message) = server
        .update_work_unit("s", "u", &dict(json!({"status": 1})))
        .await
        .unwrap();
    check!(updated);
    check!(message == "");
}

#[test]
async fn renew_via_update_extends_the_lease(_tracing: &Tracing) {
    let (server, _clock) = server().await;
    server.set_work_spec(dict(json!({"name": "s"}))).await.unwrap();
    server.add_work_units("s", &[json!("u")]).await.unwrap();
    let (response, _) = server.get_work("w", &dict(json!({}))).await.unwrap();
    check!(single(response).is_some());

    let (renewed, _) = server
        .update_work_unit("s", "u", &dict(json!({"lease_time": 600})))
        .await
        .unwrap();
    check!(renewed);
    let (statuses, _) = server
        .get_work_unit_status("s", &["u".to_string()])
        .await
        .unwrap();
    check!(statuses == vec![3]);
}

#[test]
async fn blocked_status_filter_is_rejected(_tracing: &Tracing) {
    let (server, _clock) = server().await;
    server.set_work_spec(dict(json!({"name": "s"}))).await.unwrap();
    let_assert!(
        Err(JobServerError::InvalidRequest(_)) = server
            .get_work_units("s", &dict(json!({"state": 2})))
            .await
    );
}

#[test]
async fn heartbeat_registers_and_links_workers(_tracing: &Tracing) {
    let (server, clock) = server().await;
    let (beaten, _) = server
        .worker_heartbeat(
            "child",
            "run",
            600.0,
            Some(dict(json!({"host": "example"}))),
            Some("parent"),
        )
        .await
        .unwrap();
    check!(beaten);

    let namespace = server.namespace_handle();
    let child = namespace.worker("child").await.unwrap();
    check!(child.active().await.unwrap());
    check!(child.mode().await.unwrap() == "run");
    check!(child.expiration().await.unwrap() == clock.now() + chrono::Duration::seconds(600));
    check!(child.parent().await.unwrap().unwrap().name() == "parent");

    let (unbeaten, _) = server.worker_unheartbeat("child").await.unwrap();
    check!(unbeaten);
    check!(!child.active().await.unwrap());
}
