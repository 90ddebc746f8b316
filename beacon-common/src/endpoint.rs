// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::str::FromStr;

use anyhow::Context;
use http::uri::{PathAndQuery, Scheme, Uri};
use serde::{Deserialize, Serialize};

/// Parse a URI string, rejecting anything without a scheme this SDK can
/// submit to.
///
/// Accepted schemes:
/// * http/https for network submission
/// * file for the file-backed uploader used in tests and local debugging
pub fn parse_uri(uri: &str) -> anyhow::Result<Uri> {
    let parsed = Uri::from_str(uri).with_context(|| format!("invalid endpoint uri: {uri}"))?;
    match parsed.scheme_str() {
        Some("http" | "https" | "file") => Ok(parsed),
        Some(other) => anyhow::bail!("unsupported endpoint scheme: {other}"),
        None => anyhow::bail!("endpoint uri is missing a scheme: {uri}"),
    }
}

/// A validated submission endpoint.
///
/// Holds the base URL of the collection server. Submission paths are joined
/// onto it, replacing any path present on the configured URL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(with = "http_serde_uri")]
    pub url: Uri,
    /// Client side request timeout, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            url: Uri::from_static("http://localhost:8080"),
            timeout_ms: Self::DEFAULT_TIMEOUT_MS,
        }
    }
}

impl Endpoint {
    pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

    pub fn from_url_str(url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            url: parse_uri(url)?,
            timeout_ms: Self::DEFAULT_TIMEOUT_MS,
        })
    }

    /// Build the full submission URI for `path` (which must start with `/`).
    ///
    /// Any path or query on the configured base URL is discarded.
    pub fn join_path(&self, path: &str) -> anyhow::Result<Uri> {
        let mut parts = self.url.clone().into_parts();
        parts.path_and_query = Some(
            PathAndQuery::from_str(path).with_context(|| format!("invalid upload path: {path}"))?,
        );
        if parts.scheme.is_none() {
            parts.scheme = Some(Scheme::HTTP);
        }
        Ok(Uri::from_parts(parts)?)
    }

    pub fn is_file(&self) -> bool {
        self.url.scheme_str() == Some("file")
    }

    /// Filesystem path encoded in a `file://` endpoint.
    pub fn file_path(&self) -> Option<std::path::PathBuf> {
        if !self.is_file() {
            return None;
        }
        let authority = self.url.authority().map(|a| a.as_str()).unwrap_or("");
        Some(std::path::PathBuf::from(format!(
            "{}{}",
            authority,
            self.url.path()
        )))
    }
}

mod http_serde_uri {
    use http::Uri;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(uri: &Uri, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&uri.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Uri, D::Error> {
        let s = String::deserialize(deserializer)?;
        Uri::from_str(&s).map_err(Error::custom)
    }
}
