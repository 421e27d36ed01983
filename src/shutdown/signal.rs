//! Termination signals and their hand-off onto the event loop.

use super::ShutdownCoordinator;
use std::fmt;
use std::io;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Kind of termination request received from the operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notification {
    /// SIGINT, or Ctrl+C on Windows.
    Interrupt,
    /// SIGTERM, or Ctrl+Break on Windows.
    Terminate,
}

impl Notification {
    /// Conventional POSIX signal number.
    pub fn signal_number(&self) -> i32 {
        match self {
            Notification::Interrupt => 2,
            Notification::Terminate => 15,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Notification::Interrupt => "SIGINT",
            Notification::Terminate => "SIGTERM",
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Callback invoked, possibly on a foreign thread, for every notification.
pub type NotificationHandler = Arc<dyn Fn(Notification) + Send + Sync>;

/// Operating-system notification registration.
pub trait SignalSource: Send + Sync {
    /// Route both interrupt and terminate notifications to `handler`.
    fn register(&self, handler: NotificationHandler) -> io::Result<()>;
}

/// [`SignalSource`] backed by `tokio::signal`.
///
/// Listening happens on a task spawned onto `runtime`, so with a
/// multi-threaded runtime the handler runs on a worker thread rather than
/// on the thread driving the event loop.
pub struct OsSignals {
    runtime: Handle,
}

impl OsSignals {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Bind to the runtime of the calling context.
    pub fn current() -> io::Result<Self> {
        Handle::try_current().map(Self::new).map_err(io::Error::other)
    }
}

impl SignalSource for OsSignals {
    #[cfg(unix)]
    fn register(&self, handler: NotificationHandler) -> io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let _guard = self.runtime.enter();
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;

        self.runtime.spawn(async move {
            loop {
                let kind = tokio::select! {
                    Some(()) = interrupt.recv() => Notification::Interrupt,
                    Some(()) = terminate.recv() => Notification::Terminate,
                    else => break,
                };
                handler(kind);
            }
        });

        Ok(())
    }

    #[cfg(windows)]
    fn register(&self, handler: NotificationHandler) -> io::Result<()> {
        use tokio::signal::windows::{ctrl_break, ctrl_c};

        let _guard = self.runtime.enter();
        let mut interrupt = ctrl_c()?;
        let mut terminate = ctrl_break()?;

        self.runtime.spawn(async move {
            loop {
                let kind = tokio::select! {
                    Some(()) = interrupt.recv() => Notification::Interrupt,
                    Some(()) = terminate.recv() => Notification::Terminate,
                    else => break,
                };
                handler(kind);
            }
        });

        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn register(&self, _handler: NotificationHandler) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "termination signals are not supported on this platform",
        ))
    }
}

/// Marshals notifications onto the coordinator's event loop.
///
/// Nothing here mutates coordinator state directly: the first notification
/// schedules the drain sequence, any later one schedules a forced stop.
pub struct SignalBridge {
    coordinator: Weak<ShutdownCoordinator>,
}

impl SignalBridge {
    pub fn new(coordinator: &Arc<ShutdownCoordinator>) -> Self {
        Self {
            coordinator: Arc::downgrade(coordinator),
        }
    }

    /// Entry point for both notification kinds. Callable from any thread.
    pub fn handle_notification(&self, kind: Notification) {
        let Some(coordinator) = self.coordinator.upgrade() else {
            debug!(signal = %kind, "coordinator dropped, ignoring signal");
            return;
        };
        let engine = Arc::clone(coordinator.engine());

        // Claimed at receipt, so two signals landing before the drain
        // callback runs still produce a single drain.
        if !coordinator.claim_notification() {
            warn!(signal = %kind, signum = kind.signal_number(), "caught signal again, terminating");
            engine.add_callback(Box::new(move || coordinator.force_stop()));
            return;
        }

        warn!(signal = %kind, signum = kind.signal_number(), "caught signal");
        engine.add_callback(Box::new(move || coordinator.on_shutdown()));
    }
}
