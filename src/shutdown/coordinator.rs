//! Shutdown state machine and deadline-driven drain loop.

use super::error::ShutdownError;
use super::signal::{Notification, NotificationHandler, OsSignals, SignalBridge, SignalSource};
use crate::config::ShutdownConfig;
use crate::engine::EventEngine;
use crate::util::{deadline_after, panic_message};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Monotonic clock read by the drain loop.
pub type TimeSource = Arc<dyn Fn() -> Instant + Send + Sync>;

type CallbackFn = dyn Fn() -> anyhow::Result<()> + Send + Sync;

#[derive(Clone)]
struct ShutdownCallback {
    name: Cow<'static, str>,
    func: Arc<CallbackFn>,
}

/// Lifecycle of a single termination episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// No termination request processed yet.
    Idle,
    /// Callbacks ran; waiting for the event loop to go idle.
    Draining,
    /// The event loop has been told to stop. Terminal.
    Stopped,
}

/// Why the event loop was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The event loop reported no pending work before the deadline.
    Idle,
    /// The grace period ran out.
    DeadlineExceeded,
    /// A second termination request arrived while draining.
    Escalated,
}

impl StopReason {
    pub fn is_clean(&self) -> bool {
        matches!(self, StopReason::Idle)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Idle => "idle",
            StopReason::DeadlineExceeded => "deadline exceeded",
            StopReason::Escalated => "escalated",
        };
        f.write_str(s)
    }
}

struct Phase {
    state: ShutdownState,
    reason: Option<StopReason>,
}

/// Runs shutdown callbacks, then gives the event loop a bounded grace
/// period to finish its work before stopping it.
///
/// Construct one per process at the composition root and share it as an
/// `Arc`. Everything except [`SignalBridge::handle_notification`] is expected
/// to run on the event loop's own context.
pub struct ShutdownCoordinator {
    engine: Arc<dyn EventEngine>,
    max_wait: Duration,
    poll_interval: Duration,
    time_source: TimeSource,
    signal_source: Option<Box<dyn SignalSource>>,
    callbacks: Mutex<Vec<ShutdownCallback>>,
    handlers_installed: Mutex<bool>,
    /// Set by the first notification, before the drain is scheduled.
    notified: AtomicBool,
    /// Set once the drain sequence starts. Never reset.
    shutting_down: AtomicBool,
    phase: Mutex<Phase>,
}

impl ShutdownCoordinator {
    /// Create a coordinator for `engine` using the grace period and poll
    /// interval from `config`.
    pub fn new(engine: Arc<dyn EventEngine>, config: &ShutdownConfig) -> Self {
        Self {
            engine,
            max_wait: config.deadline,
            poll_interval: config.poll_interval,
            time_source: Arc::new(Instant::now),
            signal_source: None,
            callbacks: Mutex::new(Vec::new()),
            handlers_installed: Mutex::new(false),
            notified: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            phase: Mutex::new(Phase {
                state: ShutdownState::Idle,
                reason: None,
            }),
        }
    }

    /// Replace the clock used to compute and check the deadline.
    pub fn with_time_source(mut self, time_source: TimeSource) -> Self {
        self.time_source = time_source;
        self
    }

    /// Register notifications through `source` instead of [`OsSignals`].
    pub fn with_signal_source(mut self, source: Box<dyn SignalSource>) -> Self {
        self.signal_source = Some(source);
        self
    }

    /// Register for SIGINT and SIGTERM. Calling it again is a no-op.
    ///
    /// Without an explicit signal source this must be called from within a
    /// tokio runtime.
    pub fn install_handlers(self: &Arc<Self>) -> Result<(), ShutdownError> {
        let mut installed = self.handlers_installed.lock();
        if *installed {
            debug!("signal handlers already installed");
            return Ok(());
        }

        let bridge = SignalBridge::new(self);
        let handler: NotificationHandler =
            Arc::new(move |kind: Notification| bridge.handle_notification(kind));

        match &self.signal_source {
            Some(source) => source.register(handler)?,
            None => OsSignals::current()?.register(handler)?,
        }

        *installed = true;
        info!(
            grace_period = %humantime::format_duration(self.max_wait),
            "signal handlers installed"
        );

        Ok(())
    }

    /// Register a callback to run when shutdown begins.
    ///
    /// Callbacks run in registration order; duplicates are kept. The
    /// closure's type name identifies it in logs.
    pub fn at_shutdown<F>(&self, callback: F) -> Result<(), ShutdownError>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.at_shutdown_named(std::any::type_name::<F>(), callback)
    }

    /// Like [`at_shutdown`](Self::at_shutdown), with an explicit name for logs.
    pub fn at_shutdown_named<F>(
        &self,
        name: impl Into<Cow<'static, str>>,
        callback: F,
    ) -> Result<(), ShutdownError>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if !*self.handlers_installed.lock() {
            return Err(ShutdownError::HandlersNotInstalled);
        }

        let name = name.into();
        let mut callbacks = self.callbacks.lock();
        debug!(callback = %name, position = callbacks.len(), "shutdown callback registered");
        callbacks.push(ShutdownCallback {
            name,
            func: Arc::new(callback),
        });

        Ok(())
    }

    /// Begin shutting down. Must run on the event loop's context.
    ///
    /// The first call runs the callbacks and starts the drain loop; any
    /// later call stops the event loop immediately.
    pub fn on_shutdown(self: &Arc<Self>) {
        self.notified.store(true, Ordering::Release);
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            warn!("shutdown already in progress, forcing stop");
            self.stop_engine(StopReason::Escalated);
            return;
        }

        {
            let mut phase = self.phase.lock();
            if phase.state == ShutdownState::Idle {
                phase.state = ShutdownState::Draining;
            }
        }

        self.run_callbacks();

        let deadline = deadline_after((self.time_source)(), self.max_wait);
        warn!(
            grace_period = %humantime::format_duration(self.max_wait),
            "shutdown initiated, will force stop after the grace period"
        );

        self.poll_and_maybe_stop(deadline);
    }

    /// Stop the event loop now, without waiting for the grace period.
    pub fn force_stop(&self) {
        self.notified.store(true, Ordering::Release);
        self.shutting_down.store(true, Ordering::Release);
        warn!("forcing immediate stop");
        self.stop_engine(StopReason::Escalated);
    }

    /// One tick of the drain loop.
    ///
    /// Re-arms itself every poll interval while the event loop is busy and
    /// `deadline` lies ahead; otherwise stops the event loop.
    pub fn poll_and_maybe_stop(self: &Arc<Self>, deadline: Instant) {
        if self.state() == ShutdownState::Stopped {
            return;
        }

        let now = (self.time_source)();
        if now < deadline && self.engine.is_busy() {
            let this = Arc::clone(self);
            self.engine.call_later(
                self.poll_interval,
                Box::new(move || this.poll_and_maybe_stop(deadline)),
            );
            return;
        }

        let reason = if now >= deadline {
            warn!("deadline passed, forcing stop");
            StopReason::DeadlineExceeded
        } else {
            StopReason::Idle
        };

        self.stop_engine(reason);
    }

    pub fn state(&self) -> ShutdownState {
        self.phase.lock().state
    }

    /// Why the event loop was stopped, once it has been.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.phase.lock().reason
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn handlers_installed(&self) -> bool {
        *self.handlers_installed.lock()
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub(crate) fn engine(&self) -> &Arc<dyn EventEngine> {
        &self.engine
    }

    /// Returns `true` for the first notification only.
    pub(crate) fn claim_notification(&self) -> bool {
        !self.notified.swap(true, Ordering::AcqRel)
    }

    fn run_callbacks(&self) {
        // Registrations made by a running callback land after this snapshot.
        let snapshot = self.callbacks.lock().clone();
        let mut failed = 0usize;

        for callback in &snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| (callback.func)())) {
                Ok(Ok(())) => {
                    debug!(callback = %callback.name, "shutdown callback completed");
                }
                Ok(Err(err)) => {
                    failed += 1;
                    let message = format!("{err:#}");
                    error!(callback = %callback.name, error = %message, "failed to call shutdown callback");
                }
                Err(payload) => {
                    failed += 1;
                    let message = panic_message(payload.as_ref());
                    error!(callback = %callback.name, panic = %message, "shutdown callback panicked");
                }
            }
        }

        info!(total = snapshot.len(), failed, "shutdown callbacks finished");
    }

    fn stop_engine(&self, reason: StopReason) {
        {
            let mut phase = self.phase.lock();
            if phase.state == ShutdownState::Stopped {
                debug!(reason = %reason, "event loop already stopped");
                return;
            }
            phase.state = ShutdownState::Stopped;
            phase.reason = Some(reason);
        }

        self.engine.stop();
        warn!(reason = %reason, clean = reason.is_clean(), "shutdown complete");
    }
}
