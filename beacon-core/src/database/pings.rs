// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The durable queue of assembled pings awaiting upload.
//!
//! Layout: `<document id> → {path, payload, headers, submittedAt}`. Entries
//! are presented to the upload manager in submission order. An observer
//! (the upload manager) is woken whenever a new ping is recorded.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::storage::Store;

/// One assembled ping, ready for upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingRequest {
    #[serde(skip)]
    pub document_id: String,
    pub path: String,
    pub payload: Value,
    /// Headers fixed at assembly time (debug annotations). Per-attempt
    /// headers like `Date` are added by the uploader.
    pub headers: BTreeMap<String, String>,
    #[serde(rename = "submittedAt")]
    pub submitted_at: u64,
}

impl PingRequest {
    /// The ping name is the third path segment of
    /// `/submit/<application id>/<ping name>/<schema version>/<document id>`.
    pub fn ping_name(&self) -> Option<&str> {
        self.path.split('/').nth(3)
    }

    pub fn is_deletion_request(&self) -> bool {
        self.ping_name() == Some(crate::pings::DELETION_REQUEST_PING_NAME)
    }
}

pub struct PingsDatabase {
    store: Box<dyn Store>,
    observer: Option<Arc<Notify>>,
}

impl PingsDatabase {
    pub fn new(store: Box<dyn Store>) -> Self {
        Self {
            store,
            observer: None,
        }
    }

    /// Register the observer woken on every new ping.
    pub fn register_observer(&mut self, observer: Arc<Notify>) {
        self.observer = Some(observer);
    }

    pub fn record_ping(&mut self, request: &PingRequest) {
        let result = self.store.update(&[&request.document_id], &|_| {
            json!({
                "path": request.path,
                "payload": request.payload,
                "headers": request.headers,
                "submittedAt": request.submitted_at,
            })
        });
        if let Err(e) = result {
            tracing::error!(
                ping.document_id = %request.document_id,
                error = %e,
                "Failed to persist pending ping"
            );
            return;
        }
        if let Some(observer) = &self.observer {
            observer.notify_one();
        }
    }

    pub fn delete_ping(&mut self, document_id: &str) {
        if let Err(e) = self.store.delete(&[document_id]) {
            tracing::error!(ping.document_id = %document_id, error = %e, "Failed to delete ping");
        }
    }

    /// All pending pings in submission order. Entries that fail to
    /// deserialize are deleted and logged.
    pub fn scan_pending_pings(&mut self) -> Vec<PingRequest> {
        let Some(Value::Object(entries)) = self.store.get(&[]) else {
            return Vec::new();
        };
        let mut pending = Vec::with_capacity(entries.len());
        for (document_id, raw) in entries {
            match serde_json::from_value::<PingRequest>(raw) {
                Ok(mut request) => {
                    request.document_id = document_id;
                    pending.push(request);
                }
                Err(e) => {
                    tracing::warn!(
                        ping.document_id = %document_id,
                        error = %e,
                        "Deleting corrupt pending ping"
                    );
                    self.delete_ping(&document_id);
                }
            }
        }
        // Document id as tiebreak keeps the order deterministic for pings
        // recorded within the same clock tick.
        pending.sort_by(|a, b| {
            (a.submitted_at, &a.document_id).cmp(&(b.submitted_at, &b.document_id))
        });
        pending
    }

    /// The oldest pending ping, if any.
    pub fn next_ping(&mut self) -> Option<PingRequest> {
        self.scan_pending_pings().into_iter().next()
    }

    pub fn pending_count(&mut self) -> usize {
        self.scan_pending_pings().len()
    }

    /// Drop every pending ping except deletion requests, which must survive
    /// an upload-disable.
    pub fn clear_pending_pings(&mut self) {
        for request in self.scan_pending_pings() {
            if !request.is_deletion_request() {
                self.delete_ping(&request.document_id);
            }
        }
    }

    pub fn clear_all(&mut self) {
        if let Err(e) = self.store.delete(&[]) {
            tracing::error!(error = %e, "Failed to clear pending pings store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn request(document_id: &str, ping: &str, submitted_at: u64) -> PingRequest {
        PingRequest {
            document_id: document_id.into(),
            path: format!("/submit/demo-app/{ping}/1/{document_id}"),
            payload: json!({"ping_info": {"seq": 0}}),
            headers: BTreeMap::new(),
            submitted_at,
        }
    }

    #[test]
    fn test_record_scan_delete() {
        let mut db = PingsDatabase::new(Box::new(MemoryStore::new()));
        db.record_ping(&request("doc-2", "baseline", 20));
        db.record_ping(&request("doc-1", "baseline", 10));

        let pending = db.scan_pending_pings();
        assert_eq!(pending.len(), 2);
        // Insertion order by submission time, not key order.
        assert_eq!(pending[0].document_id, "doc-1");
        assert_eq!(pending[1].document_id, "doc-2");

        db.delete_ping("doc-1");
        assert_eq!(db.pending_count(), 1);
    }

    #[test]
    fn test_corrupt_entries_are_dropped() {
        let mut db = PingsDatabase::new(Box::new(MemoryStore::new()));
        db.record_ping(&request("doc-ok", "baseline", 10));
        db.store
            .update(&["doc-bad"], &|_| json!("not a ping record"))
            .unwrap();

        let pending = db.scan_pending_pings();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].document_id, "doc-ok");
        // The corrupt entry is gone now.
        assert_eq!(db.store.get(&["doc-bad"]), None);
    }

    #[test]
    fn test_observer_is_notified() {
        let mut db = PingsDatabase::new(Box::new(MemoryStore::new()));
        let observer = Arc::new(Notify::new());
        db.register_observer(observer.clone());
        db.record_ping(&request("doc-1", "baseline", 10));

        // A permit was stored for the next waiter.
        futures::executor::block_on(observer.notified());
    }

    #[test]
    fn test_clear_keeps_deletion_requests() {
        let mut db = PingsDatabase::new(Box::new(MemoryStore::new()));
        db.record_ping(&request("doc-1", "baseline", 10));
        db.record_ping(&request("doc-2", "deletion-request", 20));
        db.clear_pending_pings();

        let pending = db.scan_pending_pings();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].is_deletion_request());
    }

    #[test]
    fn test_ping_name_extraction() {
        let request = request("doc-1", "baseline", 10);
        assert_eq!(request.ping_name(), Some("baseline"));
        assert!(!request.is_deletion_request());
    }
}
