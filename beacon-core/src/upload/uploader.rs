// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::{
    fs::OpenOptions,
    future::Future,
    io::Write,
    pin::Pin,
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use http::Uri;
use http_body_util::BodyExt;
use tracing::{debug, error};

use beacon_common::http::{
    body_from_bytes, collect_response_bytes, new_default_client, ClientError, HttpClient,
};
use beacon_common::{Endpoint, MutexExt};

pub mod header {
    pub const TELEMETRY_AGENT: &str = "X-Telemetry-Agent";
    pub const DEBUG_ID: &str = "X-Debug-ID";
    pub const SOURCE_TAGS: &str = "X-Source-Tags";
}

/// Outcome of one upload attempt, as reported by the platform uploader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadResult {
    /// The server acknowledged the ping (2xx).
    Success,
    /// The server answered outside 2xx.
    HttpStatus(u16),
    /// The request never got a server answer; worth retrying.
    RecoverableFailure,
    /// The request can never succeed (e.g. it could not be built).
    UnrecoverableFailure,
}

pub type UploadFuture = Pin<Box<dyn Future<Output = UploadResult> + Send + 'static>>;

/// Contract a platform upload driver satisfies.
pub trait Uploader: Send + Sync {
    /// POST `body` to `url` with the given headers.
    fn post(&self, url: Uri, body: Bytes, headers: Vec<(String, String)>) -> UploadFuture;
}

/// Pick the upload driver matching the configured endpoint.
pub fn from_endpoint(endpoint: &Endpoint) -> Arc<dyn Uploader> {
    match endpoint.file_path() {
        Some(path) => {
            debug!(file.path = ?path, "Using file-backed uploader");
            Arc::new(FileUploader::new(path))
        }
        None => {
            debug!(endpoint.url = %endpoint.url, "Using HTTP uploader");
            Arc::new(HttpUploader::new(Duration::from_millis(endpoint.timeout_ms)))
        }
    }
}

/// The default network driver, built on the shared hyper client.
pub struct HttpUploader {
    client: HttpClient,
    timeout: Duration,
}

impl HttpUploader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: new_default_client(),
            timeout,
        }
    }
}

impl Uploader for HttpUploader {
    fn post(&self, url: Uri, body: Bytes, headers: Vec<(String, String)>) -> UploadFuture {
        let client = self.client.clone();
        let timeout = self.timeout;
        Box::pin(async move {
            let mut builder = http::Request::builder().method(http::Method::POST).uri(url);
            for (name, value) in &headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            let request = builder.body(body_from_bytes(body)).map_err(ClientError::from);
            let request = match request {
                Ok(request) => request,
                Err(e) => {
                    error!(error = %e, "Failed to build upload request");
                    return UploadResult::UnrecoverableFailure;
                }
            };

            match tokio::time::timeout(timeout, client.request(request)).await {
                Ok(Ok(response)) => response_to_result(response).await,
                Ok(Err(e)) => {
                    let e = ClientError::from(e);
                    debug!(error = %e, "Upload request failed");
                    UploadResult::RecoverableFailure
                }
                Err(_) => {
                    debug!(error = %ClientError::Timeout, "Upload request failed");
                    UploadResult::RecoverableFailure
                }
            }
        })
    }
}

/// Map a server response onto the upload contract. The body is drained
/// through [`collect_response_bytes`] so the connection can be reused.
async fn response_to_result<B>(response: http::Response<B>) -> UploadResult
where
    B: BodyExt,
    ClientError: From<B::Error>,
{
    let status = response.status();
    debug!(http.status = status.as_u16(), "Upload request answered");
    if let Err(e) = collect_response_bytes(response).await {
        debug!(error = %e, "Failed to read upload response body");
    }
    if status.is_success() {
        UploadResult::Success
    } else {
        UploadResult::HttpStatus(status.as_u16())
    }
}

/// File-backed driver for `file://` endpoints: appends one JSON body per
/// line. Used by integration tests and local debugging.
#[derive(Clone)]
pub struct FileUploader {
    path: std::path::PathBuf,
    file: Arc<Mutex<Option<Box<dyn Write + Send>>>>,
}

impl FileUploader {
    pub fn new(path: std::path::PathBuf) -> Self {
        Self {
            path,
            file: Arc::new(Mutex::new(None)),
        }
    }

    fn write_line(&self, body: &[u8]) -> std::io::Result<()> {
        let mut guard = self.file.lock_or_panic();
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            *guard = Some(Box::new(file));
        }
        // Checked just above.
        if let Some(writer) = guard.as_mut() {
            writer.write_all(body)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }
}

impl Uploader for FileUploader {
    fn post(&self, _url: Uri, body: Bytes, _headers: Vec<(String, String)>) -> UploadFuture {
        let uploader = self.clone();
        Box::pin(async move {
            match uploader.write_line(body.as_ref()) {
                Ok(()) => {
                    debug!(file.bytes_written = body.len(), "Wrote payload to file");
                    UploadResult::Success
                }
                Err(e) => {
                    error!(file.path = ?uploader.path, error = %e, "Failed to write payload");
                    UploadResult::UnrecoverableFailure
                }
            }
        })
    }
}

/// One request captured by [`PingRecorder`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: Uri,
    pub body: Bytes,
    pub headers: Vec<(String, String)>,
}

/// Upload driver that captures requests instead of sending them, answering
/// with scripted results (or `Success` once the script runs out). The usual
/// driver in tests.
#[derive(Default, Clone)]
pub struct PingRecorder {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    script: Arc<Mutex<Vec<UploadResult>>>,
}

impl PingRecorder {
    /// Queue results to answer the next uploads with, in order.
    pub fn script_results(&self, results: Vec<UploadResult>) {
        let mut script = self.script.lock_or_panic();
        *script = results;
        script.reverse();
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock_or_panic().clone()
    }
}

impl Uploader for PingRecorder {
    fn post(&self, url: Uri, body: Bytes, headers: Vec<(String, String)>) -> UploadFuture {
        self.requests.lock_or_panic().push(RecordedRequest {
            url,
            body,
            headers,
        });
        let result = self
            .script
            .lock_or_panic()
            .pop()
            .unwrap_or(UploadResult::Success);
        Box::pin(async move { result })
    }
}
