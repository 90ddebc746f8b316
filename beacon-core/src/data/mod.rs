// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The wire envelope serialized into every submitted ping.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::metrics::RecordedEvent;

/// Client, OS and application identification, present in every ping.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ClientInfo {
    pub telemetry_sdk_build: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub first_run_date: String,
    pub os: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    pub architecture: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_build: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_display_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_date: Option<String>,
}

/// Per-submission bookkeeping: sequence number and the window the ping
/// covers, rendered at minute precision with timezone offset.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PingInfo {
    pub seq: u64,
    pub start_time: String,
    pub end_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The assembled ping envelope.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PingPayload {
    pub client_info: ClientInfo,
    pub ping_info: PingInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<RecordedEvent>>,
}
