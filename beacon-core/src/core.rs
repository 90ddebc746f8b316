// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The orchestrator.
//!
//! Owns initialization and shutdown, the upload-enabled transitions, and
//! the binding between platform, dispatcher, databases and upload worker.
//! Every public API call becomes a dispatched task; the context struct is
//! the only shared mutable state.

use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};

use beacon_common::MutexExt;

use crate::config::Configuration;
use crate::context::Context;
use crate::core_metrics::{self, KNOWN_CLIENT_ID};
use crate::dispatcher::{DispatchMode, Dispatcher, DEFAULT_MAX_PRE_INIT_QUEUE_SIZE};
use crate::metrics::Lifetime;
use crate::pings::{self, PingType};
use crate::platform::Platform;
use crate::upload::{UploadManager, UploadPolicy, Uploader};

/// Application ids are sanitized to this many characters at most.
const MAX_APPLICATION_ID_LENGTH: usize = 100;

/// Lowercase, hyphen-separated, bounded length.
fn sanitize_application_id(application_id: &str) -> String {
    let mut out = String::with_capacity(application_id.len());
    let mut pending_separator = false;
    for c in application_id.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('-');
            }
            pending_separator = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    out.truncate(MAX_APPLICATION_ID_LENGTH);
    out
}

struct CoreState {
    initialize_called: bool,
    upload: Option<UploadManager>,
}

/// The SDK entry point facades build on.
pub struct Core {
    dispatcher: Dispatcher,
    context: Arc<Mutex<Context>>,
    uploader: Arc<dyn Uploader>,
    mode: DispatchMode,
    state: Mutex<CoreState>,
}

impl Core {
    pub fn new(platform: Platform, mode: DispatchMode) -> Self {
        let uploader = platform.uploader.clone();
        let context = Arc::new(Mutex::new(Context::new(platform, Configuration::default())));
        Self {
            dispatcher: Dispatcher::new(mode, DEFAULT_MAX_PRE_INIT_QUEUE_SIZE),
            context,
            uploader,
            mode,
            state: Mutex::new(CoreState {
                initialize_called: false,
                upload: None,
            }),
        }
    }

    /// Initialize the SDK. Idempotent: calls after the first are no-ops.
    pub fn initialize(&self, application_id: &str, upload_enabled: bool, config: Configuration) {
        {
            let mut state = self.state.lock_or_panic();
            if state.initialize_called {
                error!("initialize called more than once, ignoring");
                return;
            }
            state.initialize_called = true;
        }

        let application_id = sanitize_application_id(application_id);
        if application_id.is_empty() {
            error!("initialize called with an unusable application id, ignoring");
            return;
        }

        let upload = UploadManager::new(
            self.context.lock_or_panic().pings.clone(),
            self.uploader.clone(),
            UploadPolicy::default(),
            config.server_endpoint.clone(),
        );
        self.state.lock_or_panic().upload = Some(upload.clone());

        if self.mode == DispatchMode::CooperativeAsync {
            self.spawn_worker_thread();
        }

        let context = self.context.clone();
        let mode = self.mode;
        self.dispatcher.flush_init(move || {
            Box::pin(async move {
                let mut ctx = context.lock_or_panic();
                ctx.application_id = application_id;
                // Debug options launched pre-init already sit in the queue
                // behind this task; config from the caller applies first.
                apply_configuration(&mut ctx, config);
                initialize_context(&mut ctx, upload_enabled)?;
                drop(ctx);

                // The pending-pings scan must not race ahead of the
                // upload-enabled reconciliation above, so the worker only
                // starts now.
                if mode == DispatchMode::CooperativeAsync {
                    upload.spawn(&tokio::runtime::Handle::current());
                }
                Ok(())
            })
        });
        // In synchronous mode the init task already ran inline; pings left
        // over from a previous run can go out now.
        self.drain_uploads_if_synchronous();
    }

    // One thread, one current-thread runtime: the dispatcher worker and the
    // upload worker both live on it.
    fn spawn_worker_thread(&self) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "Failed to build the worker runtime");
                return;
            }
        };
        let dispatcher = self.dispatcher.clone();
        std::thread::spawn(move || {
            runtime.block_on(dispatcher.run());
            runtime.shutdown_background();
        });
    }

    /// Flip upload collection on or off. No-op before `initialize`.
    pub fn set_upload_enabled(&self, flag: bool) {
        if !self.state.lock_or_panic().initialize_called {
            error!("set_upload_enabled before initialize is a no-op");
            return;
        }
        self.execute(move |ctx| {
            if ctx.upload_enabled == flag {
                debug!(upload.enabled = flag, "Upload state unchanged");
                return;
            }
            if flag {
                ctx.upload_enabled = true;
                core_metrics::ensure_core_metrics(ctx);
                info!("Upload enabled, core metrics re-derived");
            } else {
                disable_upload(ctx);
            }
        });
        self.drain_uploads_if_synchronous();
    }

    /// Register a ping kind so it can be submitted by name.
    pub fn register_ping_type(&self, ping: PingType) {
        let context = self.context.clone();
        self.dispatcher.launch(move || {
            Box::pin(async move {
                context.lock_or_panic().register_ping_type(ping);
                Ok(())
            })
        });
    }

    /// Assemble and queue the named ping.
    pub fn submit_ping(&self, ping_name: &str, reason: Option<&str>) {
        if !self.state.lock_or_panic().initialize_called {
            error!("submit_ping before initialize is a no-op");
            return;
        }
        let ping_name = ping_name.to_string();
        let reason = reason.map(str::to_string);
        self.execute(move |ctx| {
            if let Err(e) = pings::submit_ping(ctx, &ping_name, reason.as_deref()) {
                error!(ping.name = %ping_name, error = %e, "Ping submission failed");
            }
        });
        self.drain_uploads_if_synchronous();
    }

    /// Debug option: log every assembled envelope. Buffered pre-init.
    pub fn set_log_pings(&self, flag: bool) {
        self.execute(move |ctx| ctx.config.log_pings = flag);
    }

    /// Debug option: annotate uploads with `X-Debug-ID`. Buffered pre-init;
    /// invalid tags are ignored.
    pub fn set_debug_view_tag(&self, tag: &str) {
        let tag = tag.to_string();
        self.execute(move |ctx| {
            ctx.config.set_debug_view_tag(&tag);
        });
    }

    /// Debug option: annotate uploads with `X-Source-Tags`. Buffered
    /// pre-init; invalid tag sets are ignored.
    pub fn set_source_tags(&self, tags: Vec<String>) {
        self.execute(move |ctx| {
            ctx.config.set_source_tags(tags);
        });
    }

    /// Run `task` on the dispatcher against the shared context. This is the
    /// surface the generated metric facades call through.
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce(&mut Context) + Send + 'static,
    {
        let context = self.context.clone();
        self.dispatcher.launch(move || {
            Box::pin(async move {
                task(&mut context.lock_or_panic());
                Ok(())
            })
        });
    }

    /// Drain the dispatcher and settle outstanding uploads. Irreversible.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
        futures::executor::block_on(self.dispatcher.wait_for_shutdown());
        let upload = self.state.lock_or_panic().upload.clone();
        if let Some(upload) = upload {
            futures::executor::block_on(upload.block_on_ongoing_uploads());
            upload.cancel();
        }
    }

    /// Block until every task queued so far has executed. Test helper.
    pub fn block_on_dispatcher(&self) {
        futures::executor::block_on(self.dispatcher.join());
    }

    /// Run `f` against the context directly, outside the dispatcher. Test
    /// helper; not serialized with dispatched work.
    pub fn with_context<R>(&self, f: impl FnOnce(&mut Context) -> R) -> R {
        f(&mut self.context.lock_or_panic())
    }

    pub fn upload_manager(&self) -> Option<UploadManager> {
        self.state.lock_or_panic().upload.clone()
    }

    fn drain_uploads_if_synchronous(&self) {
        if self.mode != DispatchMode::Synchronous {
            return;
        }
        let upload = self.state.lock_or_panic().upload.clone();
        if let Some(upload) = upload {
            upload.drain_blocking();
        }
    }
}

fn apply_configuration(ctx: &mut Context, config: Configuration) {
    // Debug options set through their setters pre-init live in queued tasks
    // and overwrite these fields right after initialization.
    ctx.config = config;
}

/// The init task body. Ordering here is load-bearing: upload-enabled is
/// reconciled before the events database init (which may record a restart
/// event), and application-lifetime data is only cleared when enabled.
fn initialize_context(ctx: &mut Context, upload_enabled: bool) -> anyhow::Result<()> {
    let first_run = core_metrics::stored_first_run_date(ctx).is_none();
    let previously_enabled =
        matches!(core_metrics::stored_client_id(ctx), Some(id) if id != KNOWN_CLIENT_ID);

    if upload_enabled {
        ctx.upload_enabled = true;
        ctx.metrics.clear(Lifetime::Application, None);
        core_metrics::ensure_core_metrics(ctx);
    } else if first_run {
        // First run with upload disabled: clear quietly, no deletion
        // request, just the sentinel and the first run date.
        ctx.upload_enabled = true;
        ctx.metrics.clear_all();
        ctx.events.clear_all();
        ctx.pings.lock_or_panic().clear_all();
        write_disabled_state(ctx, None);
    } else if previously_enabled {
        // The user disabled upload between runs: behave like a live
        // disable, deletion request included.
        ctx.upload_enabled = true;
        disable_upload(ctx);
    } else {
        ctx.upload_enabled = false;
    }

    let overflowing = ctx.events.initialize(ctx.config.max_events);
    for ping in overflowing {
        if let Err(e) = pings::submit_ping(ctx, &ping, Some("startup")) {
            error!(ping.name = %ping, error = %e, "Startup event ping submission failed");
        }
    }

    info!(
        app.id = %ctx.application_id,
        upload.enabled = ctx.upload_enabled,
        first_run,
        "Telemetry initialized"
    );
    Ok(())
}

/// The live upload-disable transition.
///
/// Runs while `upload_enabled` is still asserted so the deletion request
/// and the sentinel writes pass the recording gate; flips the flag last.
fn disable_upload(ctx: &mut Context) {
    let first_run_date = core_metrics::stored_first_run_date(ctx);
    if let Err(e) = pings::submit_deletion_request(ctx) {
        error!(error = %e, "Failed to queue deletion-request ping");
    }
    ctx.metrics.clear_all();
    ctx.events.clear_all();
    // Keeps the deletion request queued above.
    ctx.pings.lock_or_panic().clear_pending_pings();
    write_disabled_state(ctx, first_run_date);
    info!("Upload disabled, stores cleared");
}

// Restore the first run date and store the sentinel client id, then turn
// recording off.
fn write_disabled_state(ctx: &mut Context, first_run_date: Option<crate::metrics::Datetime>) {
    match first_run_date {
        Some(date) => core_metrics::first_run_date_metric().set(ctx, date.to_chrono()),
        None => core_metrics::first_run_date_metric().set(ctx, None),
    }
    core_metrics::client_id_metric().set(ctx, KNOWN_CLIENT_ID);
    ctx.upload_enabled = false;
}
