// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The lifetime-partitioned metrics store.
//!
//! Three sub-stores, one per [`Lifetime`], each laid out as
//! `<ping> / <kind> / <identifier> → stored value`. Reads are tolerant of
//! out-of-band corruption: a stored value that fails its kind's validation
//! is deleted and reported as absent.

use serde_json::{Map, Value};

use crate::metrics::{is_reserved_identifier, CommonMetricData, Lifetime, Metric, LABEL_SEPARATOR};
use crate::storage::Store;

pub struct MetricsDatabase {
    user: Box<dyn Store>,
    ping: Box<dyn Store>,
    app: Box<dyn Store>,
}

impl MetricsDatabase {
    pub fn new(user: Box<dyn Store>, ping: Box<dyn Store>, app: Box<dyn Store>) -> Self {
        Self { user, ping, app }
    }

    fn store_for(&mut self, lifetime: Lifetime) -> &mut Box<dyn Store> {
        match lifetime {
            Lifetime::User => &mut self.user,
            Lifetime::Ping => &mut self.ping,
            Lifetime::Application => &mut self.app,
        }
    }

    /// Overwrite the stored value. Shorthand for a constant transform.
    pub fn record(&mut self, meta: &CommonMetricData, metric: &Metric) {
        self.transform(meta, metric.kind(), &|_| metric.clone());
    }

    /// Apply `transform` to the stored value under every ping the metric is
    /// bound to. Disabled metrics are inert.
    pub fn transform(
        &mut self,
        meta: &CommonMetricData,
        kind: &str,
        transform: &dyn Fn(Option<Metric>) -> Metric,
    ) {
        if meta.disabled {
            return;
        }
        let id = meta.identifier();
        let store = self.store_for(meta.lifetime);
        for ping in &meta.send_in_pings {
            let result = store.update(&[ping, kind, &id], &|current| {
                let decoded = current.and_then(|v| Metric::from_stored(kind, v));
                transform(decoded).stored()
            });
            if let Err(e) = result {
                tracing::error!(
                    metric.id = %id,
                    ping.name = %ping,
                    error = %e,
                    "Failed to update stored metric"
                );
            }
        }
    }

    /// The stored metric for `ping`, decoded and validated.
    ///
    /// A stored value that fails validation is deleted, so corrupt storage
    /// degrades to "not recorded" instead of poisoning the payload.
    pub fn get_metric(
        &mut self,
        ping: &str,
        meta: &CommonMetricData,
        kind: &str,
    ) -> Option<Metric> {
        let id = meta.identifier();
        let store = self.store_for(meta.lifetime);
        let raw = store.get(&[ping, kind, &id])?;
        match Metric::from_stored(kind, &raw) {
            Some(metric) => Some(metric),
            None => {
                tracing::warn!(
                    metric.id = %id,
                    ping.name = %ping,
                    "Deleting invalid stored value"
                );
                if let Err(e) = store.delete(&[ping, kind, &id]) {
                    tracing::error!(metric.id = %id, error = %e, "Failed to delete invalid value");
                }
                None
            }
        }
    }

    /// Labels currently stored for the labeled metric `base` of `kind`,
    /// across all lifetimes.
    pub fn stored_labels(&mut self, ping: &str, kind: &str, base: &str) -> Vec<String> {
        let prefix = format!("{base}{LABEL_SEPARATOR}");
        let mut labels = Vec::new();
        for lifetime in [Lifetime::User, Lifetime::Ping, Lifetime::Application] {
            let store = self.store_for(lifetime);
            let Some(Value::Object(entries)) = store.get(&[ping, kind]) else {
                continue;
            };
            for id in entries.keys() {
                if let Some(label) = id.strip_prefix(&prefix) {
                    if !labels.iter().any(|l| l == label) {
                        labels.push(label.to_string());
                    }
                }
            }
        }
        labels
    }

    /// The `metrics` section of a ping payload: all lifetimes merged,
    /// reserved identifiers skipped, labeled entries unfolded, every value
    /// run through its payload projection.
    pub fn get_ping_metrics(
        &mut self,
        ping: &str,
        clear_ping_lifetime: bool,
    ) -> Option<Map<String, Value>> {
        let mut result: Map<String, Value> = Map::new();
        for lifetime in [Lifetime::User, Lifetime::Ping, Lifetime::Application] {
            let snapshot = {
                let store = self.store_for(lifetime);
                store.get(&[ping])
            };
            let Some(Value::Object(kinds)) = snapshot else {
                continue;
            };
            let mut invalid: Vec<(String, String)> = Vec::new();
            for (kind, entries) in &kinds {
                let Value::Object(entries) = entries else {
                    invalid.push((kind.clone(), String::new()));
                    continue;
                };
                for (id, raw) in entries {
                    if is_reserved_identifier(id) {
                        continue;
                    }
                    let Some(metric) = Metric::from_stored(kind, raw) else {
                        invalid.push((kind.clone(), id.clone()));
                        continue;
                    };
                    insert_payload(&mut result, kind, id, metric.payload());
                }
            }
            let store = self.store_for(lifetime);
            for (kind, id) in invalid {
                tracing::warn!(
                    ping.name = %ping,
                    metric.kind = %kind,
                    metric.id = %id,
                    "Dropping invalid stored value during collection"
                );
                let index: Vec<&str> = if id.is_empty() {
                    vec![ping, &kind]
                } else {
                    vec![ping, &kind, &id]
                };
                if let Err(e) = store.delete(&index) {
                    tracing::error!(error = %e, "Failed to drop invalid stored value");
                }
            }
        }

        if clear_ping_lifetime {
            if let Err(e) = self.ping.delete(&[ping]) {
                tracing::error!(ping.name = %ping, error = %e, "Failed to clear ping lifetime");
            }
        }

        if result.is_empty() {
            None
        } else {
            Some(result)
        }
    }

    /// Erase one lifetime, optionally scoped to a single ping.
    pub fn clear(&mut self, lifetime: Lifetime, ping: Option<&str>) {
        let store = self.store_for(lifetime);
        let result = match ping {
            Some(ping) => store.delete(&[ping]),
            None => store.delete(&[]),
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "Failed to clear metrics store");
        }
    }

    pub fn clear_all(&mut self) {
        for lifetime in [Lifetime::User, Lifetime::Ping, Lifetime::Application] {
            self.clear(lifetime, None);
        }
    }
}

/// Place one payload into the result map, unfolding `<id>/<label>` into
/// `labeled_<kind> / <id> / <label>`.
fn insert_payload(result: &mut Map<String, Value>, kind: &str, id: &str, payload: Value) {
    match id.split_once(LABEL_SEPARATOR) {
        Some((base, label)) => {
            let section = result
                .entry(format!("labeled_{kind}"))
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(section) = section.as_object_mut() {
                let entry = section
                    .entry(base.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Some(entry) = entry.as_object_mut() {
                    entry.insert(label.to_string(), payload);
                }
            }
        }
        None => {
            let section = result
                .entry(kind.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(section) = section.as_object_mut() {
                section.insert(id.to_string(), payload);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn database() -> MetricsDatabase {
        MetricsDatabase::new(
            Box::new(MemoryStore::new()),
            Box::new(MemoryStore::new()),
            Box::new(MemoryStore::new()),
        )
    }

    fn meta(name: &str, lifetime: Lifetime) -> CommonMetricData {
        CommonMetricData {
            name: name.into(),
            category: "test".into(),
            send_in_pings: vec!["baseline".into()],
            lifetime,
            ..Default::default()
        }
    }

    #[test]
    fn test_record_lands_in_lifetime_store() {
        let mut db = database();
        db.record(&meta("a", Lifetime::User), &Metric::Boolean(true));
        db.record(&meta("b", Lifetime::Ping), &Metric::Counter(2));

        assert_eq!(
            db.get_metric("baseline", &meta("a", Lifetime::User), "boolean"),
            Some(Metric::Boolean(true))
        );
        assert_eq!(
            db.get_metric("baseline", &meta("b", Lifetime::Ping), "counter"),
            Some(Metric::Counter(2))
        );
        // Wrong lifetime: nothing there.
        assert_eq!(
            db.get_metric("baseline", &meta("a", Lifetime::Ping), "boolean"),
            None
        );
    }

    #[test]
    fn test_disabled_metric_is_inert() {
        let mut db = database();
        let disabled = CommonMetricData {
            disabled: true,
            ..meta("a", Lifetime::Ping)
        };
        db.record(&disabled, &Metric::Boolean(true));
        db.transform(&disabled, "counter", &|_| Metric::Counter(1));
        assert_eq!(db.get_ping_metrics("baseline", false), None);
    }

    #[test]
    fn test_corrupt_value_is_deleted_on_read() {
        let mut db = database();
        // Pre-seed garbage: a number where a boolean belongs.
        db.user
            .update(&["baseline", "boolean", "test.a"], &|_| json!(42))
            .unwrap();

        assert_eq!(
            db.get_metric("baseline", &meta("a", Lifetime::User), "boolean"),
            None
        );
        // And it is gone from storage now.
        assert_eq!(db.user.get(&["baseline", "boolean", "test.a"]), None);
    }

    #[test]
    fn test_get_ping_metrics_merges_lifetimes() {
        let mut db = database();
        db.record(&meta("u", Lifetime::User), &Metric::Boolean(true));
        db.record(&meta("p", Lifetime::Ping), &Metric::Counter(3));
        db.record(&meta("a", Lifetime::Application), &Metric::Quantity(9));

        let metrics = db.get_ping_metrics("baseline", true).unwrap();
        assert_eq!(metrics["boolean"]["test.u"], json!(true));
        assert_eq!(metrics["counter"]["test.p"], json!(3));
        assert_eq!(metrics["quantity"]["test.a"], json!(9));

        // Ping lifetime was cleared by collection, the others remain.
        let metrics = db.get_ping_metrics("baseline", true).unwrap();
        assert!(metrics.get("counter").is_none());
        assert_eq!(metrics["boolean"]["test.u"], json!(true));
    }

    #[test]
    fn test_reserved_identifiers_are_hidden() {
        let mut db = database();
        let reserved = CommonMetricData {
            name: "client_id".into(),
            category: "beacon.internal".into(),
            send_in_pings: vec!["baseline".into()],
            lifetime: Lifetime::User,
            ..Default::default()
        };
        db.record(
            &reserved,
            &Metric::Uuid("e5f9dc77-69d5-4b4b-9d31-bbb734a2dbf6".into()),
        );
        assert_eq!(db.get_ping_metrics("baseline", false), None);
        // Still readable directly.
        assert!(db.get_metric("baseline", &reserved, "uuid").is_some());
    }

    #[test]
    fn test_labeled_unfolding() {
        let mut db = database();
        for (label, count) in [("net", 1), ("fs", 2)] {
            let labeled = CommonMetricData {
                name: "errors".into(),
                category: "".into(),
                dynamic_label: Some(label.into()),
                ..meta("ignored", Lifetime::Ping)
            };
            db.record(&labeled, &Metric::Counter(count));
        }

        let metrics = db.get_ping_metrics("baseline", false).unwrap();
        assert_eq!(
            metrics["labeled_counter"]["errors"],
            json!({"net": 1, "fs": 2})
        );
        assert!(metrics.get("counter").is_none());
    }

    #[test]
    fn test_stored_labels() {
        let mut db = database();
        for label in ["net", "fs"] {
            let labeled = CommonMetricData {
                name: "errors".into(),
                category: "".into(),
                dynamic_label: Some(label.into()),
                ..meta("ignored", Lifetime::Ping)
            };
            db.record(&labeled, &Metric::Counter(1));
        }
        let mut labels = db.stored_labels("baseline", "counter", "errors");
        labels.sort();
        assert_eq!(labels, vec!["fs", "net"]);
    }

    #[test]
    fn test_clear() {
        let mut db = database();
        db.record(&meta("u", Lifetime::User), &Metric::Boolean(true));
        db.record(&meta("p", Lifetime::Ping), &Metric::Counter(3));
        db.clear(Lifetime::User, None);
        assert_eq!(
            db.get_metric("baseline", &meta("u", Lifetime::User), "boolean"),
            None
        );
        db.clear_all();
        assert_eq!(db.get_ping_metrics("baseline", false), None);
    }
}
