// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The append-only events store.
//!
//! One list of recorded events per ping. On initialization a synthetic
//! restart marker is appended to every non-empty list, separating event
//! sequences from different process lifetimes.

use serde_json::{json, Value};

use crate::metrics::RecordedEvent;
use crate::storage::Store;

/// Category and name of the synthetic restart marker event.
pub const RESTART_EVENT_CATEGORY: &str = "beacon";
pub const RESTART_EVENT_NAME: &str = "restarted";

pub struct EventsDatabase {
    store: Box<dyn Store>,
}

impl EventsDatabase {
    pub fn new(store: Box<dyn Store>) -> Self {
        Self { store }
    }

    /// Mark the process restart.
    ///
    /// Appends a restart event to every ping that carried events over from a
    /// previous process lifetime. Returns the pings whose list now exceeds
    /// `max_events` and must be submitted immediately.
    pub fn initialize(&mut self, max_events: usize) -> Vec<String> {
        let Some(Value::Object(stores)) = self.store.get(&[]) else {
            return Vec::new();
        };

        let mut overflowing = Vec::new();
        for (ping, events) in stores {
            let Value::Array(events) = events else {
                tracing::warn!(ping.name = %ping, "Dropping invalid events list");
                let _ = self.store.delete(&[&ping]);
                continue;
            };
            if events.is_empty() {
                continue;
            }
            let last_timestamp = events
                .iter()
                .filter_map(|e| e.get("timestamp"))
                .filter_map(Value::as_u64)
                .max()
                .unwrap_or(0);
            let restart = RecordedEvent {
                timestamp: last_timestamp + 1,
                category: RESTART_EVENT_CATEGORY.into(),
                name: RESTART_EVENT_NAME.into(),
                extra: None,
            };
            let len = self.append(&ping, &restart);
            if len >= max_events {
                overflowing.push(ping);
            }
        }
        overflowing
    }

    /// Append one event to `ping`'s list. Returns the new list length.
    pub fn record(&mut self, ping: &str, event: &RecordedEvent) -> usize {
        self.append(ping, event)
    }

    fn append(&mut self, ping: &str, event: &RecordedEvent) -> usize {
        let mut new_len = 0;
        let result = self.store.update(&[ping], &|current| {
            let mut events = match current {
                Some(Value::Array(events)) => events.clone(),
                _ => Vec::new(),
            };
            events.push(json!(event));
            Value::Array(events)
        });
        if let Err(e) = result {
            tracing::error!(ping.name = %ping, error = %e, "Failed to append event");
            return 0;
        }
        if let Some(Value::Array(events)) = self.store.get(&[ping]) {
            new_len = events.len();
        }
        new_len
    }

    /// The `events` section of a ping payload: all recorded events in
    /// timestamp order. Corrupt entries are dropped.
    pub fn get_ping_events(&mut self, ping: &str, clear: bool) -> Option<Vec<RecordedEvent>> {
        let raw = self.store.get(&[ping]);
        if clear {
            if let Err(e) = self.store.delete(&[ping]) {
                tracing::error!(ping.name = %ping, error = %e, "Failed to clear events");
            }
        }
        let Some(Value::Array(raw)) = raw else {
            return None;
        };
        let mut events: Vec<RecordedEvent> = raw
            .into_iter()
            .filter_map(|e| match serde_json::from_value(e) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!(ping.name = %ping, error = %e, "Dropping invalid stored event");
                    None
                }
            })
            .collect();
        if events.is_empty() {
            return None;
        }
        events.sort_by_key(|e| e.timestamp);
        Some(events)
    }

    /// All stored events for `ping`, without clearing. Test-only.
    pub fn test_get_events(&mut self, ping: &str) -> Vec<RecordedEvent> {
        match self.store.get(&[ping]) {
            Some(Value::Array(raw)) => raw
                .into_iter()
                .filter_map(|e| serde_json::from_value(e).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn clear_all(&mut self) {
        if let Err(e) = self.store.delete(&[]) {
            tracing::error!(error = %e, "Failed to clear events store");
        }
    }
}
