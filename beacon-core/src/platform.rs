// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The platform facade.
//!
//! Everything host-specific is bundled here: a factory for named storage
//! sub-stores, the upload driver, and static platform information. Timing
//! is provided by the runtime (tokio) and needs no indirection.

use std::sync::Arc;

use crate::storage::{MemoryStore, Store};
use crate::upload::{HttpUploader, Uploader};

/// Static information about the host, reported in `client_info`.
pub trait PlatformInfo: Send + Sync {
    fn os(&self) -> String;
    fn os_version(&self) -> Option<String>;
    fn architecture(&self) -> String;
    fn locale(&self) -> Option<String>;
}

/// [`PlatformInfo`] for ordinary processes.
pub struct StdPlatformInfo;

impl PlatformInfo for StdPlatformInfo {
    fn os(&self) -> String {
        std::env::consts::OS.to_string()
    }

    fn os_version(&self) -> Option<String> {
        sys_info::os_release().ok()
    }

    fn architecture(&self) -> String {
        std::env::consts::ARCH.to_string()
    }

    fn locale(&self) -> Option<String> {
        std::env::var("LANG")
            .ok()
            .and_then(|l| l.split('.').next().map(str::to_string))
            .filter(|l| !l.is_empty())
    }
}

/// Bundle of host bindings handed to the orchestrator.
pub struct Platform {
    /// Creates the storage driver backing the named sub-store
    /// (`userLifetimeMetrics`, `events`, `pendingPings`, …).
    pub store_factory: Box<dyn Fn(&str) -> Box<dyn Store> + Send + Sync>,
    pub uploader: Arc<dyn Uploader>,
    pub info: Box<dyn PlatformInfo>,
}

impl Platform {
    /// A platform with process-memory storage and the default HTTP driver.
    pub fn in_memory() -> Self {
        Self {
            store_factory: Box::new(|_| Box::new(MemoryStore::new())),
            uploader: Arc::new(HttpUploader::new(std::time::Duration::from_millis(
                beacon_common::Endpoint::DEFAULT_TIMEOUT_MS,
            ))),
            info: Box::new(StdPlatformInfo),
        }
    }

    /// Same as [`Platform::in_memory`] with a custom uploader. The usual
    /// shape in tests.
    pub fn with_uploader(uploader: Arc<dyn Uploader>) -> Self {
        Self {
            uploader,
            ..Self::in_memory()
        }
    }
}
