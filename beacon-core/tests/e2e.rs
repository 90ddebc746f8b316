// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios driving the SDK through its public surface, with a
//! recording uploader standing in for the network. The synchronous dispatch
//! mode keeps everything deterministic.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::Value;

use beacon_core::core_metrics::{self, KNOWN_CLIENT_ID};
use beacon_core::metrics::{BooleanMetric, CommonMetricData, CounterMetric, LabeledMetric, Lifetime};
use beacon_core::upload::{PingRecorder, RecordedRequest};
use beacon_core::{Configuration, Core, DispatchMode, PingType, Platform};

const SERVER: &str = "http://localhost:9090";

fn new_core(recorder: &PingRecorder) -> Core {
    Core::new(
        Platform::with_uploader(Arc::new(recorder.clone())),
        DispatchMode::Synchronous,
    )
}

fn config() -> Configuration {
    Configuration::with_server_endpoint(SERVER).unwrap()
}

fn first_open_metric() -> BooleanMetric {
    BooleanMetric::new(CommonMetricData {
        name: "first_open".into(),
        category: "ui".into(),
        send_in_pings: vec!["baseline".into()],
        lifetime: Lifetime::Ping,
        ..Default::default()
    })
}

fn calls_metric() -> CounterMetric {
    CounterMetric::new(CommonMetricData {
        name: "calls".into(),
        category: "api".into(),
        send_in_pings: vec!["metrics".into()],
        lifetime: Lifetime::Application,
        ..Default::default()
    })
}

fn body(request: &RecordedRequest) -> Value {
    serde_json::from_slice(&request.body).unwrap()
}

#[test]
fn test_happy_path_boolean_to_wire() {
    let recorder = PingRecorder::default();
    let core = new_core(&recorder);
    core.initialize("demo-app", true, config());
    core.register_ping_type(PingType::new("baseline", true, false, vec![]));

    let metric = first_open_metric();
    core.execute(move |ctx| metric.set(ctx, true));
    core.submit_ping("baseline", None);
    core.block_on_dispatcher();

    let requests = recorder.requests();
    assert_eq!(requests.len(), 1);
    let url = requests[0].url.to_string();
    assert!(
        url.starts_with(&format!("{SERVER}/submit/demo-app/baseline/1/")),
        "unexpected url {url}"
    );
    // The trailing segment is a UUID document id.
    let document_id = url.rsplit('/').next().unwrap();
    assert_eq!(document_id.len(), 36);

    let payload = body(&requests[0]);
    assert_eq!(payload["metrics"]["boolean"]["ui.first_open"], Value::Bool(true));
    assert_eq!(payload["ping_info"]["seq"], serde_json::json!(0));
    assert_eq!(
        payload["client_info"]["telemetry_sdk_build"],
        serde_json::json!(beacon_core::TELEMETRY_SDK_BUILD)
    );
}

#[test]
fn test_sequence_advances_and_windows_chain() {
    let recorder = PingRecorder::default();
    let core = new_core(&recorder);
    core.initialize("demo-app", true, config());
    core.register_ping_type(PingType::new("baseline", true, false, vec![]));

    for _ in 0..2 {
        let metric = first_open_metric();
        core.execute(move |ctx| metric.set(ctx, true));
        core.submit_ping("baseline", None);
    }
    core.block_on_dispatcher();

    let requests = recorder.requests();
    assert_eq!(requests.len(), 2);
    let first = body(&requests[0]);
    let second = body(&requests[1]);
    assert_eq!(first["ping_info"]["seq"], serde_json::json!(0));
    assert_eq!(second["ping_info"]["seq"], serde_json::json!(1));
    assert_eq!(
        second["ping_info"]["start_time"],
        first["ping_info"]["end_time"]
    );
}

#[test]
fn test_upload_disable_flow() {
    let recorder = PingRecorder::default();
    let core = new_core(&recorder);
    core.initialize("demo-app", true, config());

    let counter = calls_metric();
    core.execute(move |ctx| counter.add(ctx, 7));
    core.block_on_dispatcher();
    let live_client_id = core.with_context(core_metrics::stored_client_id).unwrap();

    core.set_upload_enabled(false);
    core.block_on_dispatcher();

    // Exactly one outbound ping, and it is the deletion request, carrying
    // the pre-reset client id.
    let requests = recorder.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].url.path().contains("/deletion-request/"));
    let payload = body(&requests[0]);
    assert_eq!(
        payload["client_info"]["client_id"],
        serde_json::json!(live_client_id)
    );

    // The counter is gone and the sentinel is in place.
    let counter = calls_metric();
    assert_eq!(
        core.with_context(|ctx| counter.test_get_value(ctx, "metrics")),
        None
    );
    assert_eq!(
        core.with_context(core_metrics::stored_client_id).as_deref(),
        Some(KNOWN_CLIENT_ID)
    );

    // Recording is now inert.
    let counter = calls_metric();
    core.execute(move |ctx| counter.add(ctx, 1));
    core.block_on_dispatcher();
    let counter = calls_metric();
    assert_eq!(
        core.with_context(|ctx| counter.test_get_value(ctx, "metrics")),
        None
    );
}

#[test]
fn test_first_run_disabled_sends_nothing() {
    let recorder = PingRecorder::default();
    let core = new_core(&recorder);
    core.initialize("demo-app", false, config());
    core.block_on_dispatcher();

    assert!(recorder.requests().is_empty());
    assert_eq!(
        core.with_context(core_metrics::stored_client_id).as_deref(),
        Some(KNOWN_CLIENT_ID)
    );
    assert!(core
        .with_context(core_metrics::stored_first_run_date)
        .is_some());
}

#[test]
fn test_empty_ping_is_not_enqueued() {
    let recorder = PingRecorder::default();
    let core = new_core(&recorder);
    core.initialize("demo-app", true, config());
    core.register_ping_type(PingType::new("baseline", true, false, vec![]));
    core.submit_ping("baseline", None);
    core.block_on_dispatcher();

    assert!(recorder.requests().is_empty());
}

#[test]
fn test_labeled_counter_unfolds_in_payload() {
    let recorder = PingRecorder::default();
    let core = new_core(&recorder);
    core.initialize("demo-app", true, config());
    core.register_ping_type(PingType::new("metrics", true, false, vec![]));

    let errors: LabeledMetric<CounterMetric> = LabeledMetric::new(
        CommonMetricData {
            name: "errors".into(),
            category: "".into(),
            send_in_pings: vec!["metrics".into()],
            lifetime: Lifetime::Ping,
            ..Default::default()
        },
        None,
    );
    core.execute(move |ctx| {
        errors.get(ctx, "net").add(ctx, 1);
        errors.get(ctx, "fs").add(ctx, 2);
    });
    core.submit_ping("metrics", None);
    core.block_on_dispatcher();

    let requests = recorder.requests();
    assert_eq!(requests.len(), 1);
    let payload = body(&requests[0]);
    assert_eq!(
        payload["metrics"]["labeled_counter"]["errors"],
        serde_json::json!({"net": 1, "fs": 2})
    );
    assert!(payload["metrics"].get("counter").is_none());
}

#[test]
fn test_debug_annotations_ride_along_as_headers() {
    let recorder = PingRecorder::default();
    let core = new_core(&recorder);
    // Debug options buffered before initialize apply afterwards.
    core.set_debug_view_tag("session-42");
    core.set_source_tags(vec!["automation".into()]);
    core.initialize("demo-app", true, config());
    core.register_ping_type(PingType::new("baseline", true, true, vec![]));
    core.submit_ping("baseline", None);
    core.block_on_dispatcher();

    let requests = recorder.requests();
    assert_eq!(requests.len(), 1);
    let headers = &requests[0].headers;
    let get = |name: &str| {
        headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    };
    assert_eq!(get("X-Debug-ID").as_deref(), Some("session-42"));
    assert_eq!(get("X-Source-Tags").as_deref(), Some("automation"));
    assert_eq!(get("Content-Type").as_deref(), Some("application/json"));
    assert!(get("Date").is_some());
    assert!(get("X-Telemetry-Agent").is_some());
}

#[test]
fn test_reenabling_upload_rotates_client_id() {
    let recorder = PingRecorder::default();
    let core = new_core(&recorder);
    core.initialize("demo-app", true, config());
    core.block_on_dispatcher();
    let original = core.with_context(core_metrics::stored_client_id).unwrap();

    core.set_upload_enabled(false);
    core.set_upload_enabled(true);
    core.block_on_dispatcher();

    let rotated = core.with_context(core_metrics::stored_client_id).unwrap();
    assert_ne!(rotated, KNOWN_CLIENT_ID);
    assert_ne!(rotated, original);
}
