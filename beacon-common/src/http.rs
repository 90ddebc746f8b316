// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use thiserror::Error;

pub type Body = Full<Bytes>;
pub type HttpClient = hyper_util::client::legacy::Client<HttpConnector, Body>;

/// Create a new default configuration hyper client.
///
/// It will keep connections open for a longer time and reuse them.
pub fn new_default_client() -> HttpClient {
    hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::default())
        .build(HttpConnector::new())
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request error: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),
    #[error("invalid request: {0}")]
    Http(#[from] http::Error),
    #[error("body error: {0}")]
    Body(#[from] hyper::Error),
    #[error("request timed out")]
    Timeout,
    #[error(transparent)]
    Infallible(#[from] std::convert::Infallible),
}

pub fn body_from_bytes(bytes: Bytes) -> Body {
    Full::new(bytes)
}

/// Build a canned response around a byte body. The response-side test
/// double for code that consumes collected responses.
pub fn mock_response(
    builder: http::response::Builder,
    body: Bytes,
) -> Result<http::Response<Body>, ClientError> {
    Ok(builder.body(body_from_bytes(body))?)
}

/// Read a response body to completion.
pub async fn collect_response_bytes<B>(response: http::Response<B>) -> Result<Bytes, ClientError>
where
    B: BodyExt,
    ClientError: From<B::Error>,
{
    Ok(response
        .into_body()
        .collect()
        .await
        .map_err(ClientError::from)?
        .to_bytes())
}
