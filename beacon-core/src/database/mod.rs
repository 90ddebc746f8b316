// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod events;
mod metrics;
mod pings;

pub use events::EventsDatabase;
pub use metrics::MetricsDatabase;
pub use pings::{PingRequest, PingsDatabase};
