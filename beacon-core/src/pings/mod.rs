// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ping registry and assembler.
//!
//! Submission snapshots the ping's metrics and events, wraps them in the
//! wire envelope with sequence and window bookkeeping, and persists the
//! result for the upload manager. Snapshot and clear run as one unit on the
//! dispatcher, so nothing records into a ping while it is being collected.

use chrono::{DateTime, FixedOffset, Local, Utc};
use serde_json::Value;

use crate::context::Context;
use crate::core_metrics;
use crate::data::{ClientInfo, PingInfo, PingPayload};
use crate::database::PingRequest;
use crate::metrics::{Datetime, TimeUnit};
use crate::upload::header;

/// Schema version segment of the submission path.
pub const SCHEMA_VERSION: u32 = 1;

/// The ping submitted when the user disables upload.
pub const DELETION_REQUEST_PING_NAME: &str = "deletion-request";

/// A registered ping kind.
#[derive(Debug, Clone)]
pub struct PingType {
    pub name: String,
    /// Strip `client_id` from the envelope when false.
    pub include_client_id: bool,
    /// Submit even when no metrics or events were collected.
    pub send_if_empty: bool,
    /// Accepted `reason` values; anything else is dropped.
    pub reason_codes: Vec<String>,
}

impl PingType {
    pub fn new(
        name: impl Into<String>,
        include_client_id: bool,
        send_if_empty: bool,
        reason_codes: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            include_client_id,
            send_if_empty,
            reason_codes,
        }
    }
}

/// Event-hook observer, configured through `Configuration::plugins`.
pub trait Plugin: Send + Sync {
    /// Called after a ping was collected, before it is persisted for upload.
    fn after_ping_collection(&self, ping_name: &str, payload: &PingPayload);
}

fn minute_precision(value: &DateTime<FixedOffset>) -> String {
    Datetime::from_chrono(value, TimeUnit::Minute).render()
}

/// Load-and-increment the per-ping sequence counter.
fn next_seq(ctx: &mut Context, ping_name: &str) -> u64 {
    let current = ctx
        .ping_info
        .get(&[ping_name, "seq"])
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    if let Err(e) = ctx
        .ping_info
        .update(&[ping_name, "seq"], &|_| Value::from(current + 1))
    {
        tracing::error!(ping.name = %ping_name, error = %e, "Failed to advance sequence number");
    }
    current
}

/// The submission window: previously persisted start (process start on the
/// first submission) and now. Now becomes the next window's start.
fn submission_window(ctx: &mut Context, ping_name: &str) -> (String, String) {
    let start_time = ctx
        .ping_info
        .get(&[ping_name, "start_time"])
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| minute_precision(&ctx.start_time));
    let end_time = minute_precision(&Local::now().fixed_offset());
    if let Err(e) = ctx.ping_info.update(&[ping_name, "start_time"], &|_| {
        Value::from(end_time.clone())
    }) {
        tracing::error!(ping.name = %ping_name, error = %e, "Failed to persist submission window");
    }
    (start_time, end_time)
}

pub(crate) fn build_client_info(ctx: &mut Context, ping: &PingType) -> ClientInfo {
    let client_id = if ping.include_client_id {
        core_metrics::stored_client_id(ctx)
    } else {
        None
    };
    let first_run_date = core_metrics::stored_first_run_date(ctx)
        .map(|d| d.render())
        .unwrap_or_else(|| Datetime::now(TimeUnit::Day).render());
    ClientInfo {
        telemetry_sdk_build: crate::TELEMETRY_SDK_BUILD.to_string(),
        client_id,
        first_run_date,
        os: ctx.platform_info.os(),
        os_version: ctx.platform_info.os_version(),
        architecture: ctx.platform_info.architecture(),
        locale: ctx.platform_info.locale(),
        app_build: ctx.config.app_build.clone(),
        app_display_version: ctx.config.app_display_version.clone(),
        app_channel: ctx.config.channel.clone(),
        build_date: ctx.config.build_date.clone(),
    }
}

/// Submit a registered ping. Returns whether an envelope was queued.
pub fn submit_ping(
    ctx: &mut Context,
    ping_name: &str,
    reason: Option<&str>,
) -> anyhow::Result<bool> {
    let Some(ping) = ctx.get_ping_type(ping_name).cloned() else {
        tracing::error!(ping.name = %ping_name, "Submitting an unregistered ping is a no-op");
        return Ok(false);
    };
    if !ctx.upload_enabled {
        tracing::info!(ping.name = %ping_name, "Upload disabled, dropping submission");
        return Ok(false);
    }
    collect_and_store(ctx, &ping, reason)
}

/// Assemble and persist an envelope for `ping`.
///
/// Also the entry point for the deletion-request ping, which bypasses the
/// registry and the dispatcher.
pub(crate) fn collect_and_store(
    ctx: &mut Context,
    ping: &PingType,
    reason: Option<&str>,
) -> anyhow::Result<bool> {
    let reason = reason.filter(|r| {
        let known = ping.reason_codes.iter().any(|c| c == r);
        if !known {
            tracing::warn!(ping.name = %ping.name, ping.reason = %r, "Dropping unknown reason");
        }
        known
    });

    let seq = next_seq(ctx, &ping.name);
    let (start_time, end_time) = submission_window(ctx, &ping.name);
    let metrics = ctx.metrics.get_ping_metrics(&ping.name, true);
    let events = ctx.events.get_ping_events(&ping.name, true);

    if metrics.is_none() && events.is_none() && !ping.send_if_empty {
        tracing::debug!(ping.name = %ping.name, "Nothing to submit, dropping empty ping");
        return Ok(false);
    }

    let payload = PingPayload {
        client_info: build_client_info(ctx, ping),
        ping_info: PingInfo {
            seq,
            start_time,
            end_time,
            reason: reason.map(str::to_string),
        },
        metrics,
        events,
    };

    let document_id = uuid::Uuid::new_v4().to_string();
    let path = format!(
        "/submit/{}/{}/{SCHEMA_VERSION}/{document_id}",
        ctx.application_id, ping.name
    );

    if ctx.config.log_pings {
        match serde_json::to_string_pretty(&payload) {
            Ok(pretty) => tracing::info!(ping.name = %ping.name, ping.path = %path, "{pretty}"),
            Err(e) => tracing::warn!(error = %e, "Failed to render ping for logging"),
        }
    }
    for plugin in &ctx.config.plugins {
        plugin.after_ping_collection(&ping.name, &payload);
    }

    let mut headers = std::collections::BTreeMap::new();
    if let Some(tag) = &ctx.config.debug_view_tag {
        headers.insert(header::DEBUG_ID.to_string(), tag.clone());
    }
    if let Some(tags) = &ctx.config.source_tags {
        headers.insert(header::SOURCE_TAGS.to_string(), tags.join(","));
    }

    let request = PingRequest {
        document_id,
        path,
        payload: serde_json::to_value(&payload)?,
        headers,
        submitted_at: Utc::now().timestamp_micros() as u64,
    };
    tracing::debug!(
        ping.name = %ping.name,
        ping.document_id = %request.document_id,
        ping.seq = seq,
        "Queueing assembled ping"
    );
    {
        use beacon_common::MutexExt;
        ctx.pings.lock_or_panic().record_ping(&request);
    }
    Ok(true)
}

/// Submit the deletion-request ping. Runs undispatched while upload is still
/// (or temporarily) enabled; carries only client information.
pub(crate) fn submit_deletion_request(ctx: &mut Context) -> anyhow::Result<bool> {
    let ping = PingType::new(DELETION_REQUEST_PING_NAME, true, true, Vec::new());
    collect_and_store(ctx, &ping, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;
    use crate::metrics::{BooleanMetric, CommonMetricData, Lifetime};
    use beacon_common::MutexExt;

    fn register_baseline(ctx: &mut Context) {
        ctx.register_ping_type(PingType::new("baseline", true, false, vec![]));
    }

    fn record_flag(ctx: &mut Context) {
        BooleanMetric::new(CommonMetricData {
            name: "first_open".into(),
            category: "ui".into(),
            send_in_pings: vec!["baseline".into()],
            lifetime: Lifetime::Ping,
            ..Default::default()
        })
        .set(ctx, true);
    }

    #[test]
    fn test_empty_ping_is_dropped() {
        let mut ctx = test_context();
        register_baseline(&mut ctx);
        assert!(!submit_ping(&mut ctx, "baseline", None).unwrap());
        assert_eq!(ctx.pings.lock_or_panic().pending_count(), 0);
    }

    #[test]
    fn test_send_if_empty_overrides() {
        let mut ctx = test_context();
        ctx.register_ping_type(PingType::new("heartbeat", false, true, vec![]));
        assert!(submit_ping(&mut ctx, "heartbeat", None).unwrap());
        assert_eq!(ctx.pings.lock_or_panic().pending_count(), 1);
    }

    #[test]
    fn test_unregistered_ping_is_a_noop() {
        let mut ctx = test_context();
        assert!(!submit_ping(&mut ctx, "nope", None).unwrap());
    }

    #[test]
    fn test_sequence_advances_and_windows_chain() {
        let mut ctx = test_context();
        ctx.application_id = "demo-app".into();
        register_baseline(&mut ctx);

        record_flag(&mut ctx);
        assert!(submit_ping(&mut ctx, "baseline", None).unwrap());
        record_flag(&mut ctx);
        assert!(submit_ping(&mut ctx, "baseline", None).unwrap());

        let pending = ctx.pings.lock_or_panic().scan_pending_pings();
        assert_eq!(pending.len(), 2);
        let first = &pending[0].payload["ping_info"];
        let second = &pending[1].payload["ping_info"];
        assert_eq!(first["seq"], serde_json::json!(0));
        assert_eq!(second["seq"], serde_json::json!(1));
        assert_eq!(second["start_time"], first["end_time"]);
    }

    #[test]
    fn test_submission_path_shape() {
        let mut ctx = test_context();
        ctx.application_id = "demo-app".into();
        register_baseline(&mut ctx);
        record_flag(&mut ctx);
        assert!(submit_ping(&mut ctx, "baseline", None).unwrap());

        let pending = ctx.pings.lock_or_panic().scan_pending_pings();
        let segments: Vec<&str> = pending[0].path.split('/').collect();
        assert_eq!(segments[1], "submit");
        assert_eq!(segments[2], "demo-app");
        assert_eq!(segments[3], "baseline");
        assert_eq!(segments[4], "1");
        assert_eq!(segments[5], pending[0].document_id);
        assert_eq!(
            pending[0].payload["metrics"]["boolean"]["ui.first_open"],
            serde_json::json!(true)
        );
    }

    #[test]
    fn test_include_client_id_false_strips_it() {
        let mut ctx = test_context();
        core_metrics::ensure_core_metrics(&mut ctx);
        ctx.register_ping_type(PingType::new("anon", false, true, vec![]));
        assert!(submit_ping(&mut ctx, "anon", None).unwrap());
        let pending = ctx.pings.lock_or_panic().scan_pending_pings();
        assert!(pending[0].payload["client_info"].get("client_id").is_none());
    }

    #[test]
    fn test_unknown_reason_is_dropped() {
        let mut ctx = test_context();
        ctx.register_ping_type(PingType::new(
            "events",
            true,
            true,
            vec!["max_capacity".into()],
        ));
        assert!(submit_ping(&mut ctx, "events", Some("because")).unwrap());
        assert!(submit_ping(&mut ctx, "events", Some("max_capacity")).unwrap());

        let pending = ctx.pings.lock_or_panic().scan_pending_pings();
        assert!(pending[0].payload["ping_info"].get("reason").is_none());
        assert_eq!(
            pending[1].payload["ping_info"]["reason"],
            serde_json::json!("max_capacity")
        );
    }

    #[test]
    fn test_submit_while_disabled_is_dropped() {
        let mut ctx = test_context();
        register_baseline(&mut ctx);
        record_flag(&mut ctx);
        ctx.upload_enabled = false;
        assert!(!submit_ping(&mut ctx, "baseline", None).unwrap());
    }

    #[test]
    fn test_deletion_request_queues_even_without_registry() {
        let mut ctx = test_context();
        core_metrics::ensure_core_metrics(&mut ctx);
        assert!(submit_deletion_request(&mut ctx).unwrap());
        let pending = ctx.pings.lock_or_panic().scan_pending_pings();
        assert!(pending[0].is_deletion_request());
        assert!(pending[0].payload["client_info"].get("client_id").is_some());
    }

    struct CountingPlugin(std::sync::Arc<std::sync::atomic::AtomicUsize>);
    impl Plugin for CountingPlugin {
        fn after_ping_collection(&self, _ping_name: &str, _payload: &PingPayload) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn test_plugins_observe_collections() {
        let mut ctx = test_context();
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        ctx.config
            .plugins
            .push(Box::new(CountingPlugin(seen.clone())));
        ctx.register_ping_type(PingType::new("heartbeat", false, true, vec![]));
        assert!(submit_ping(&mut ctx, "heartbeat", None).unwrap());
        assert!(submit_ping(&mut ctx, "heartbeat", None).unwrap());
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
