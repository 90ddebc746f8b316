// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The shared state every dispatched task operates on.
//!
//! All mutable SDK state lives behind one context struct handed to
//! components explicitly, so nothing needs process-global slots. Mutation is
//! serialized by the dispatcher; the upload worker only shares the pending
//! pings database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, FixedOffset, Local};

use crate::config::Configuration;
use crate::database::{EventsDatabase, MetricsDatabase, PingsDatabase};
use crate::metrics::CommonMetricData;
use crate::pings::PingType;
use crate::platform::{Platform, PlatformInfo};
use crate::storage::Store;

/// Storage sub-store root keys.
pub const USER_LIFETIME_STORE: &str = "userLifetimeMetrics";
pub const PING_LIFETIME_STORE: &str = "pingLifetimeMetrics";
pub const APP_LIFETIME_STORE: &str = "appLifetimeMetrics";
pub const EVENTS_STORE: &str = "events";
pub const PENDING_PINGS_STORE: &str = "pendingPings";
pub const PING_INFO_STORE: &str = "pingInfo";

pub struct Context {
    pub config: Configuration,
    pub application_id: String,
    pub upload_enabled: bool,
    pub metrics: MetricsDatabase,
    pub events: EventsDatabase,
    pub pings: Arc<Mutex<PingsDatabase>>,
    /// Per-ping sequence numbers and submission windows.
    pub ping_info: Box<dyn Store>,
    pub ping_registry: HashMap<String, PingType>,
    pub platform_info: Box<dyn PlatformInfo>,
    /// Process start, used as the first submission window boundary.
    pub start_time: DateTime<FixedOffset>,
    /// Monotonic epoch for event timestamps.
    process_epoch: Instant,
}

impl Context {
    pub fn new(platform: Platform, config: Configuration) -> Self {
        let Platform {
            store_factory,
            info,
            ..
        } = platform;
        let mut ping_registry = HashMap::new();
        // The events ping ships with the SDK; everything else is registered
        // by the embedding application.
        let events_ping = PingType::new(
            "events",
            true,
            false,
            vec!["startup".into(), "max_capacity".into()],
        );
        ping_registry.insert(events_ping.name.clone(), events_ping);
        Self {
            config,
            application_id: String::new(),
            upload_enabled: true,
            metrics: MetricsDatabase::new(
                store_factory(USER_LIFETIME_STORE),
                store_factory(PING_LIFETIME_STORE),
                store_factory(APP_LIFETIME_STORE),
            ),
            events: EventsDatabase::new(store_factory(EVENTS_STORE)),
            pings: Arc::new(Mutex::new(PingsDatabase::new(store_factory(
                PENDING_PINGS_STORE,
            )))),
            ping_info: store_factory(PING_INFO_STORE),
            ping_registry,
            platform_info: info,
            start_time: Local::now().fixed_offset(),
            process_epoch: Instant::now(),
        }
    }

    /// Whether `meta` may record right now. Disabled metrics are inert, and
    /// nothing records while upload is disabled.
    pub fn should_record(&self, meta: &CommonMetricData) -> bool {
        !meta.disabled && self.upload_enabled
    }

    /// Milliseconds since the process epoch. Monotonic across wall clock
    /// adjustments.
    pub fn next_event_timestamp(&self) -> u64 {
        self.process_epoch.elapsed().as_millis() as u64
    }

    pub fn register_ping_type(&mut self, ping: PingType) {
        self.ping_registry.insert(ping.name.clone(), ping);
    }

    pub fn get_ping_type(&self, name: &str) -> Option<&PingType> {
        self.ping_registry.get(name)
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> Context {
    use crate::upload::PingRecorder;
    let platform = Platform::with_uploader(Arc::new(PingRecorder::default()));
    Context::new(platform, Configuration::default())
}
