// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The task dispatcher.
//!
//! All mutations of shared SDK state funnel through one logical execution
//! order. Work launched before initialization buffers in a bounded pre-init
//! queue and replays once the orchestrator flushes it. Two scheduling modes
//! share the same queue and command semantics: a cooperative worker on the
//! async runtime, or inline draining for hosts without one.

use std::collections::VecDeque;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures::channel::oneshot;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use beacon_common::MutexExt;

const CONTINUE: ControlFlow<()> = ControlFlow::Continue(());
const BREAK: ControlFlow<()> = ControlFlow::Break(());

/// Tasks buffered before initialization beyond this are dropped.
pub const DEFAULT_MAX_PRE_INIT_QUEUE_SIZE: usize = 100;

pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type TaskFn = Box<dyn FnOnce() -> TaskFuture + Send>;

enum Command {
    /// Ordinary unit of work.
    Task(TaskFn),
    /// Survives `Clear`.
    PersistentTask(TaskFn),
    /// The one task allowed to shut the dispatcher down by failing.
    InitTask(TaskFn),
    /// Tracer for tests; resolved on execution or queue clear.
    TestTask(oneshot::Sender<()>),
    Stop,
    Clear,
    Shutdown,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Task(_) => "task",
            Command::PersistentTask(_) => "persistent_task",
            Command::InitTask(_) => "init_task",
            Command::TestTask(_) => "test_task",
            Command::Stop => "stop",
            Command::Clear => "clear",
            Command::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Buffering into the pre-init queue.
    Uninitialized,
    /// Waiting for work.
    Idle,
    /// A command is being executed.
    Processing,
    /// Paused; the queue keeps accumulating.
    Stopped,
    /// Terminal.
    Shutdown,
}

/// How queued work gets executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// A worker task on the async runtime runs one command at a time;
    /// suspension points are exactly the boundaries between commands.
    CooperativeAsync,
    /// Commands run to completion inline whenever the queue is triggered.
    Synchronous,
}

struct DispatcherGuard {
    state: DispatcherState,
    queue: VecDeque<Command>,
    pre_init_queue: VecDeque<Command>,
    pre_init_dropped: usize,
    /// Re-entrancy latch for synchronous draining.
    draining: bool,
}

struct DispatcherInner {
    guard: Mutex<DispatcherGuard>,
    notify: Notify,
    token: CancellationToken,
    mode: DispatchMode,
    max_pre_init_queue_size: usize,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(mode: DispatchMode, max_pre_init_queue_size: usize) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                guard: Mutex::new(DispatcherGuard {
                    state: DispatcherState::Uninitialized,
                    queue: VecDeque::new(),
                    pre_init_queue: VecDeque::new(),
                    pre_init_dropped: 0,
                    draining: false,
                }),
                notify: Notify::new(),
                token: CancellationToken::new(),
                mode,
                max_pre_init_queue_size,
            }),
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.inner.guard.lock_or_panic().state
    }

    /// Queue an ordinary task.
    pub fn launch<F>(&self, task: F)
    where
        F: FnOnce() -> TaskFuture + Send + 'static,
    {
        self.push(Command::Task(Box::new(task)), false);
    }

    /// Queue a task that survives `clear`.
    pub fn launch_persistent<F>(&self, task: F)
    where
        F: FnOnce() -> TaskFuture + Send + 'static,
    {
        self.push(Command::PersistentTask(Box::new(task)), false);
    }

    /// Queue a tracer resolved when it executes or when the queue clears.
    pub fn launch_test(&self) -> oneshot::Receiver<()> {
        let (sender, receiver) = oneshot::channel();
        self.push(Command::TestTask(sender), false);
        receiver
    }

    /// Transition out of the pre-init phase.
    ///
    /// `init` runs first, then everything buffered pre-init, in order. Only
    /// valid once.
    pub fn flush_init<F>(&self, init: F)
    where
        F: FnOnce() -> TaskFuture + Send + 'static,
    {
        {
            let mut guard = self.inner.guard.lock_or_panic();
            if guard.state != DispatcherState::Uninitialized {
                error!("flush_init on an initialized dispatcher is a no-op");
                return;
            }
            if guard.pre_init_dropped > 0 {
                warn!(
                    dropped = guard.pre_init_dropped,
                    "Tasks were dropped from the full pre-init queue"
                );
            }
            guard.state = DispatcherState::Idle;
            let mut queue = VecDeque::with_capacity(guard.pre_init_queue.len() + 1);
            queue.push_back(Command::InitTask(Box::new(init)));
            queue.append(&mut guard.pre_init_queue);
            queue.append(&mut guard.queue);
            guard.queue = queue;
        }
        self.wake();
    }

    /// Pause execution. Already-queued work stays queued.
    pub fn stop(&self) {
        self.push(Command::Stop, true);
    }

    /// Resume a stopped dispatcher.
    pub fn resume(&self) {
        {
            let mut guard = self.inner.guard.lock_or_panic();
            if guard.state != DispatcherState::Stopped {
                debug!(state = ?guard.state, "resume outside Stopped is a no-op");
                return;
            }
            guard.state = DispatcherState::Idle;
        }
        self.wake();
    }

    /// Drop queued commands, keeping persistent tasks and shutdown.
    pub fn clear(&self) {
        self.push(Command::Clear, true);
    }

    /// Graceful, irreversible termination. Queued work still runs; a
    /// stopped or uninitialized dispatcher shuts down immediately.
    pub fn shutdown(&self) {
        let immediate = {
            let guard = self.inner.guard.lock_or_panic();
            matches!(
                guard.state,
                DispatcherState::Uninitialized | DispatcherState::Stopped
            )
        };
        if immediate {
            self.perform_shutdown();
        } else {
            self.push(Command::Shutdown, false);
        }
    }

    /// Resolves once the dispatcher reached `Shutdown`.
    pub async fn wait_for_shutdown(&self) {
        self.inner.token.cancelled().await;
    }

    /// Wait until everything queued so far has executed. Test helper.
    pub async fn join(&self) {
        let receiver = self.launch_test();
        let _ = receiver.await;
    }

    fn push(&self, command: Command, priority: bool) {
        {
            let mut guard = self.inner.guard.lock_or_panic();
            match guard.state {
                DispatcherState::Shutdown => {
                    debug!(command = command.name(), "Dropping command after shutdown");
                    if let Command::TestTask(sender) = command {
                        let _ = sender.send(());
                    }
                    return;
                }
                DispatcherState::Uninitialized => {
                    if guard.pre_init_queue.len() >= self.inner.max_pre_init_queue_size {
                        guard.pre_init_dropped += 1;
                        warn!(
                            command = command.name(),
                            "Pre-init queue full, dropping command"
                        );
                        if let Command::TestTask(sender) = command {
                            let _ = sender.send(());
                        }
                        return;
                    }
                    if priority {
                        guard.pre_init_queue.push_front(command);
                    } else {
                        guard.pre_init_queue.push_back(command);
                    }
                    return;
                }
                _ => {
                    if priority {
                        guard.queue.push_front(command);
                    } else {
                        guard.queue.push_back(command);
                    }
                }
            }
        }
        self.wake();
    }

    fn wake(&self) {
        match self.inner.mode {
            DispatchMode::CooperativeAsync => self.inner.notify.notify_one(),
            DispatchMode::Synchronous => self.trigger_execution(),
        }
    }

    /// The cooperative worker loop. Spawn on the async runtime.
    pub async fn run(self) {
        loop {
            if self.inner.token.is_cancelled() {
                return;
            }
            match self.next_command() {
                Some(command) => {
                    if self.execute(command).await == BREAK {
                        return;
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.inner.token.cancelled() => return,
                        _ = self.inner.notify.notified() => {}
                    }
                }
            }
        }
    }

    /// Drain the queue inline. Only meaningful in synchronous mode; nested
    /// calls from within a task fall through to the outer drain.
    pub fn trigger_execution(&self) {
        loop {
            {
                let mut guard = self.inner.guard.lock_or_panic();
                if guard.draining {
                    return;
                }
                guard.draining = true;
            }
            let command = self.next_command();
            let flow = match command {
                Some(command) => futures::executor::block_on(self.execute(command)),
                None => BREAK,
            };
            self.inner.guard.lock_or_panic().draining = false;
            if flow == BREAK {
                return;
            }
        }
    }

    fn next_command(&self) -> Option<Command> {
        let mut guard = self.inner.guard.lock_or_panic();
        match guard.state {
            DispatcherState::Idle | DispatcherState::Processing => {
                match guard.queue.pop_front() {
                    Some(command) => {
                        guard.state = DispatcherState::Processing;
                        Some(command)
                    }
                    None => {
                        guard.state = DispatcherState::Idle;
                        None
                    }
                }
            }
            _ => None,
        }
    }

    async fn execute(&self, command: Command) -> ControlFlow<()> {
        debug!(command = command.name(), "Executing command");
        match command {
            Command::Task(task) | Command::PersistentTask(task) => {
                if let Err(e) = task().await {
                    error!(error = %e, "Dispatched task failed, skipping");
                }
                CONTINUE
            }
            Command::InitTask(task) => {
                if let Err(e) = task().await {
                    error!(error = %e, "Initialization failed, shutting the dispatcher down");
                    self.clear_queue();
                    self.perform_shutdown();
                    return BREAK;
                }
                CONTINUE
            }
            Command::TestTask(sender) => {
                let _ = sender.send(());
                CONTINUE
            }
            Command::Stop => {
                self.inner.guard.lock_or_panic().state = DispatcherState::Stopped;
                CONTINUE
            }
            Command::Clear => {
                self.clear_queue();
                CONTINUE
            }
            Command::Shutdown => {
                self.perform_shutdown();
                BREAK
            }
        }
    }

    // Drops queued commands except persistent tasks and shutdown, resolving
    // test tracers so tests never deadlock on a cleared queue.
    fn clear_queue(&self) {
        let mut guard = self.inner.guard.lock_or_panic();
        let mut kept = VecDeque::with_capacity(guard.queue.len());
        for command in guard.queue.drain(..) {
            match command {
                Command::PersistentTask(_) | Command::Shutdown => kept.push_back(command),
                Command::TestTask(sender) => {
                    let _ = sender.send(());
                }
                dropped => debug!(command = dropped.name(), "Cleared queued command"),
            }
        }
        guard.queue = kept;
    }

    fn perform_shutdown(&self) {
        {
            let mut guard = self.inner.guard.lock_or_panic();
            for command in guard.queue.drain(..) {
                if let Command::TestTask(sender) = command {
                    let _ = sender.send(());
                }
            }
            for command in guard.pre_init_queue.drain(..) {
                if let Command::TestTask(sender) = command {
                    let _ = sender.send(());
                }
            }
            guard.state = DispatcherState::Shutdown;
        }
        self.inner.token.cancel();
    }
}
