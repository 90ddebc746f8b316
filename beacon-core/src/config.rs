// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use beacon_common::Endpoint;

use crate::pings::Plugin;

/// Default collection endpoint, overridable via `server_endpoint`.
pub const DEFAULT_TELEMETRY_ENDPOINT: &str = "https://incoming.telemetry.beacon.dev";

/// Events-list length that triggers an eager events-ping submission.
pub const DEFAULT_MAX_EVENTS: usize = 500;

/// At most this many source tags are accepted.
pub const MAX_SOURCE_TAGS: usize = 5;

/// Debug view tags and source tags share one shape.
fn tag_is_valid(tag: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The pattern is a literal; it cannot fail to compile.
    #[allow(clippy::unwrap_used)]
    let re = RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9-]{1,20}$").unwrap());
    re.is_match(tag)
}

/// SDK configuration, fixed at initialization except for the debug options.
pub struct Configuration {
    /// Base URL pings are submitted to.
    pub server_endpoint: Endpoint,
    /// Release channel, emitted as `app_channel` when set.
    pub channel: Option<String>,
    pub app_build: Option<String>,
    pub app_display_version: Option<String>,
    pub build_date: Option<String>,
    pub max_events: usize,
    /// Log every outgoing envelope before it is queued.
    pub log_pings: bool,
    /// Sent as `X-Debug-ID` on every upload when set.
    pub debug_view_tag: Option<String>,
    /// Sent as `X-Source-Tags` on every upload when set.
    pub source_tags: Option<Vec<String>>,
    pub enable_auto_page_load_events: bool,
    pub enable_auto_element_click_events: bool,
    /// Observers invoked after every ping collection.
    pub plugins: Vec<Box<dyn Plugin>>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            // The default endpoint is a compile-time constant and always parses.
            server_endpoint: Endpoint::from_url_str(DEFAULT_TELEMETRY_ENDPOINT)
                .unwrap_or_default(),
            channel: None,
            app_build: None,
            app_display_version: None,
            build_date: None,
            max_events: DEFAULT_MAX_EVENTS,
            log_pings: false,
            debug_view_tag: None,
            source_tags: None,
            enable_auto_page_load_events: false,
            enable_auto_element_click_events: false,
            plugins: Vec::new(),
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("server_endpoint", &self.server_endpoint)
            .field("channel", &self.channel)
            .field("app_build", &self.app_build)
            .field("app_display_version", &self.app_display_version)
            .field("build_date", &self.build_date)
            .field("max_events", &self.max_events)
            .field("log_pings", &self.log_pings)
            .field("debug_view_tag", &self.debug_view_tag)
            .field("source_tags", &self.source_tags)
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

impl Configuration {
    /// Configuration pointing at `server_endpoint`. Fails on an invalid URL.
    pub fn with_server_endpoint(server_endpoint: &str) -> anyhow::Result<Self> {
        Ok(Self {
            server_endpoint: Endpoint::from_url_str(server_endpoint)?,
            ..Default::default()
        })
    }

    /// Set the debug view tag. Tags violating the shape are ignored.
    /// Returns whether the tag was accepted.
    pub fn set_debug_view_tag(&mut self, tag: &str) -> bool {
        if !tag_is_valid(tag) {
            tracing::debug!(debug.tag = %tag, "Ignoring invalid debug view tag");
            return false;
        }
        self.debug_view_tag = Some(tag.to_string());
        true
    }

    /// Set the source tags. The whole set is ignored when it is empty, too
    /// large, or contains an invalid tag. Returns whether it was accepted.
    pub fn set_source_tags(&mut self, tags: Vec<String>) -> bool {
        if tags.is_empty() || tags.len() > MAX_SOURCE_TAGS {
            tracing::debug!(tags.count = tags.len(), "Ignoring source tags");
            return false;
        }
        if let Some(bad) = tags.iter().find(|t| !tag_is_valid(t)) {
            tracing::debug!(debug.tag = %bad, "Ignoring source tags with invalid entry");
            return false;
        }
        self.source_tags = Some(tags);
        true
    }
}
