// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client-side telemetry SDK core.
//!
//! Collects strongly-typed measurements, groups them into structured pings
//! and reliably uploads them to a collection endpoint. Hosts bind a
//! [`platform::Platform`] (storage, uploader, platform info) and drive the
//! SDK through [`Core`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod context;
mod core;
pub mod core_metrics;
pub mod data;
pub mod database;
pub mod dispatcher;
pub mod error_recording;
pub mod histogram;
pub mod metrics;
pub mod pings;
pub mod platform;
pub mod storage;
pub mod upload;

/// Version reported as `telemetry_sdk_build` in every ping.
pub const TELEMETRY_SDK_BUILD: &str = env!("CARGO_PKG_VERSION");

pub use self::core::Core;
pub use config::Configuration;
pub use context::Context;
pub use dispatcher::DispatchMode;
pub use pings::{PingType, Plugin};
pub use platform::Platform;
