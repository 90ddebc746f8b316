// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::{Mutex, MutexGuard};

pub mod endpoint;
pub mod http;
pub mod rate_limiter;

pub use endpoint::{parse_uri, Endpoint};

/// Extension trait for `Mutex` that acquires the lock, panicking if it is
/// poisoned.
///
/// A poisoned lock means another thread panicked while holding it; none of
/// the data guarded here can be repaired at that point, so every caller
/// would abort anyway. Centralizing the unwrap avoids sprinkling
/// `#[allow(clippy::unwrap_used)]` across the workspace.
pub trait MutexExt<T> {
    fn lock_or_panic(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    #[inline(always)]
    #[track_caller]
    fn lock_or_panic(&self) -> MutexGuard<'_, T> {
        #[allow(clippy::unwrap_used)]
        self.lock().unwrap()
    }
}
