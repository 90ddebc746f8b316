// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The SDK's own metrics: client id and first run date.
//!
//! Both live under the reserved identifier prefix in a dedicated store, so
//! they are readable by the ping assembler but never serialized into the
//! `metrics` section of a payload.

use crate::context::Context;
use crate::metrics::{
    CommonMetricData, Datetime, DatetimeMetric, Lifetime, TimeUnit, UuidMetric,
};

/// The pseudo-ping bucket client-info metrics are stored under.
pub const CLIENT_INFO_STORAGE: &str = "beacon_client_info";

/// Sentinel client id stored while upload is disabled: the nil UUID.
pub const KNOWN_CLIENT_ID: &str = "00000000-0000-0000-0000-000000000000";

pub(crate) fn client_id_metric() -> UuidMetric {
    UuidMetric::new(CommonMetricData {
        name: "client_id".into(),
        category: "beacon.internal".into(),
        send_in_pings: vec![CLIENT_INFO_STORAGE.into()],
        lifetime: Lifetime::User,
        ..Default::default()
    })
}

pub(crate) fn first_run_date_metric() -> DatetimeMetric {
    DatetimeMetric::new(
        CommonMetricData {
            name: "first_run_date".into(),
            category: "beacon.internal".into(),
            send_in_pings: vec![CLIENT_INFO_STORAGE.into()],
            lifetime: Lifetime::User,
            ..Default::default()
        },
        TimeUnit::Day,
    )
}

/// The client id currently in storage, if any.
pub fn stored_client_id(ctx: &mut Context) -> Option<String> {
    client_id_metric().test_get_value(ctx, CLIENT_INFO_STORAGE)
}

/// The first run date currently in storage, if any.
pub fn stored_first_run_date(ctx: &mut Context) -> Option<Datetime> {
    first_run_date_metric().test_get_value(ctx, CLIENT_INFO_STORAGE)
}

/// Ensure the client id and first run date exist, generating them on a
/// first run (or after an upload re-enable).
pub(crate) fn ensure_core_metrics(ctx: &mut Context) {
    let client_id = client_id_metric();
    match stored_client_id(ctx) {
        Some(id) if id != KNOWN_CLIENT_ID => {}
        _ => {
            let new_id = client_id.generate_and_set(ctx);
            tracing::debug!(client.id = %new_id, "Generated new client id");
        }
    }
    if stored_first_run_date(ctx).is_none() {
        first_run_date_metric().set(ctx, None);
    }
}
