// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The ping upload manager.
//!
//! A single cooperative worker drains the pending pings queue, one request
//! in flight at a time, interpreting results through [`UploadPolicy`] and
//! respecting the rate limiter. It shares nothing with the recording path
//! except the pings database.

mod policy;
mod uploader;

pub use policy::{NextAction, UploadPolicy};
pub use uploader::{
    from_endpoint, header, FileUploader, HttpUploader, PingRecorder, RecordedRequest,
    UploadFuture, UploadResult, Uploader,
};

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use beacon_common::rate_limiter::{RateLimiter, RateLimiterState};
use beacon_common::{Endpoint, MutexExt};

use crate::database::{PingRequest, PingsDatabase};

const CONTINUE: ControlFlow<()> = ControlFlow::Continue(());
const BREAK: ControlFlow<()> = ControlFlow::Break(());

/// Counters describing what the worker has done so far.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadStats {
    pub sent: u64,
    pub failed_unrecoverable: u64,
    pub dropped_after_retries: u64,
    pub throttled: u64,
}

struct UploadManagerInner {
    pings: Arc<Mutex<PingsDatabase>>,
    uploader: Arc<dyn Uploader>,
    policy: UploadPolicy,
    endpoint: Endpoint,
    /// `X-Telemetry-Agent` value: `<sdk build>/<platform>`.
    agent: String,
    notify: Arc<Notify>,
    token: CancellationToken,
    rate_limiter: Mutex<RateLimiter>,
    in_flight: tokio::sync::Mutex<()>,
    stats: Mutex<UploadStats>,
}

#[derive(Clone)]
pub struct UploadManager {
    inner: Arc<UploadManagerInner>,
}

impl UploadManager {
    pub fn new(
        pings: Arc<Mutex<PingsDatabase>>,
        uploader: Arc<dyn Uploader>,
        policy: UploadPolicy,
        endpoint: Endpoint,
    ) -> Self {
        let notify = Arc::new(Notify::new());
        pings.lock_or_panic().register_observer(notify.clone());
        let rate_limiter = Mutex::new(RateLimiter::new(
            policy.interval,
            policy.max_pings_per_interval,
        ));
        Self {
            inner: Arc::new(UploadManagerInner {
                pings,
                uploader,
                policy,
                endpoint,
                agent: format!(
                    "{}/{}",
                    crate::TELEMETRY_SDK_BUILD,
                    std::env::consts::OS
                ),
                notify,
                token: CancellationToken::new(),
                rate_limiter,
                in_flight: tokio::sync::Mutex::new(()),
                stats: Mutex::new(UploadStats::default()),
            }),
        }
    }

    /// Start the worker loop on the given runtime.
    pub fn spawn(&self, runtime: &tokio::runtime::Handle) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        runtime.spawn(async move { manager.run().await })
    }

    /// Stop the worker. The in-flight request, if any, is not cancelled.
    pub fn cancel(&self) {
        self.inner.token.cancel();
    }

    /// Resolves once no request is in flight.
    pub async fn block_on_ongoing_uploads(&self) {
        drop(self.inner.in_flight.lock().await);
    }

    /// Drop all queued pings except deletion requests.
    pub fn clear_pending_pings_queue(&self) {
        self.inner.pings.lock_or_panic().clear_pending_pings();
    }

    pub fn stats(&self) -> UploadStats {
        self.inner.stats.lock_or_panic().clone()
    }

    // Waits for new-ping signals, draining the queue after each one.
    async fn run(&self) {
        loop {
            if self.inner.token.is_cancelled() {
                return;
            }
            self.drain(false).await;
            tokio::select! {
                _ = self.inner.token.cancelled() => return,
                _ = self.inner.notify.notified() => {}
            }
        }
    }

    /// Process everything currently queued, oldest first. With `blocking`
    /// set, waits park the thread instead of the task, so the drain can run
    /// outside a timer-driven runtime (the synchronous dispatch mode).
    pub async fn drain(&self, blocking: bool) {
        loop {
            if self.inner.token.is_cancelled() {
                return;
            }
            let next = self.inner.pings.lock_or_panic().next_ping();
            let Some(request) = next else { return };
            if self.process_ping(&request, blocking).await == BREAK {
                return;
            }
        }
    }

    /// Convenience wrapper for hosts without an async runtime.
    pub fn drain_blocking(&self) {
        futures::executor::block_on(self.drain(true));
    }

    async fn sleep(&self, duration: Duration, blocking: bool) {
        if blocking {
            std::thread::sleep(duration);
        } else {
            tokio::time::sleep(duration).await;
        }
    }

    // Drives one ping through the policy until it settles. Break means the
    // whole drain should yield (cancellation or exhausted wait budget).
    async fn process_ping(&self, request: &PingRequest, blocking: bool) -> ControlFlow<()> {
        let mut attempts = 0u32;
        let mut last_result = None;
        let mut waits = 0u32;
        loop {
            if self.inner.token.is_cancelled() {
                return BREAK;
            }
            match self.inner.policy.next_action(attempts, last_result) {
                NextAction::Done => {
                    return self.settle(request, attempts, last_result);
                }
                NextAction::Wait(backoff) => {
                    debug!(
                        ping.document_id = %request.document_id,
                        backoff_ms = backoff.as_millis() as u64,
                        "Backing off before retry"
                    );
                    self.sleep(backoff, blocking).await;
                    last_result = None;
                }
                NextAction::Upload => {
                    let throttle = self.inner.rate_limiter.lock_or_panic().try_acquire();
                    if let RateLimiterState::Throttled(remaining) = throttle {
                        self.inner.stats.lock_or_panic().throttled += 1;
                        waits += 1;
                        if waits > self.inner.policy.max_wait_attempts {
                            warn!("Rate limit wait budget exhausted, yielding");
                            return BREAK;
                        }
                        debug!(
                            remaining_ms = remaining.as_millis() as u64,
                            "Rate limited, sleeping until the next window"
                        );
                        self.sleep(remaining, blocking).await;
                        continue;
                    }
                    attempts += 1;
                    let result = {
                        let _in_flight = self.inner.in_flight.lock().await;
                        self.send(request).await
                    };
                    debug!(
                        ping.document_id = %request.document_id,
                        upload.attempt = attempts,
                        upload.result = ?result,
                        "Upload attempt finished"
                    );
                    last_result = Some(result);
                }
            }
        }
    }

    // Terminal bookkeeping once the policy says Done.
    fn settle(
        &self,
        request: &PingRequest,
        attempts: u32,
        last_result: Option<UploadResult>,
    ) -> ControlFlow<()> {
        let mut stats = self.inner.stats.lock_or_panic();
        match last_result {
            Some(UploadResult::Success) => {
                stats.sent += 1;
                drop(stats);
                info!(
                    ping.document_id = %request.document_id,
                    upload.attempts = attempts,
                    "Ping uploaded"
                );
            }
            Some(UploadResult::HttpStatus(code)) if (500..600).contains(&code) => {
                stats.dropped_after_retries += 1;
                drop(stats);
                error!(
                    ping.document_id = %request.document_id,
                    upload.attempts = attempts,
                    "Dropping ping after repeated recoverable failures"
                );
            }
            Some(UploadResult::RecoverableFailure) => {
                stats.dropped_after_retries += 1;
                drop(stats);
                error!(
                    ping.document_id = %request.document_id,
                    upload.attempts = attempts,
                    "Dropping ping after repeated recoverable failures"
                );
            }
            Some(UploadResult::HttpStatus(code)) => {
                stats.failed_unrecoverable += 1;
                drop(stats);
                warn!(
                    ping.document_id = %request.document_id,
                    http.status = code,
                    "Server rejected ping, deleting"
                );
            }
            Some(UploadResult::UnrecoverableFailure) | None => {
                stats.failed_unrecoverable += 1;
                drop(stats);
                warn!(
                    ping.document_id = %request.document_id,
                    "Ping cannot be uploaded, deleting"
                );
            }
        }
        self.inner
            .pings
            .lock_or_panic()
            .delete_ping(&request.document_id);
        CONTINUE
    }

    async fn send(&self, request: &PingRequest) -> UploadResult {
        let url = match self.inner.endpoint.join_path(&request.path) {
            Ok(url) => url,
            Err(e) => {
                error!(ping.path = %request.path, error = %e, "Invalid upload path");
                return UploadResult::UnrecoverableFailure;
            }
        };
        let body = match serde_json::to_vec(&request.payload) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                error!(error = %e, "Failed to serialize ping payload");
                return UploadResult::UnrecoverableFailure;
            }
        };

        let mut headers: Vec<(String, String)> = vec![
            ("Content-Type".into(), "application/json".into()),
            (
                "Date".into(),
                Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            ),
            (header::TELEMETRY_AGENT.into(), self.inner.agent.clone()),
        ];
        for (name, value) in &request.headers {
            headers.push((name.clone(), value.clone()));
        }

        self.inner.uploader.post(url, body, headers).await
    }
}
