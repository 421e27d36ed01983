//! Cooperative single-context event loop.
//!
//! Callbacks injected from any thread travel over an unbounded channel and
//! are executed, together with due timers, on whichever task drives
//! [`EventLoop::run`].

use super::{EventEngine, Task};
use crate::util::{deadline_after, panic_message};
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::time::{self, Instant};
use tracing::{debug, error, trace};

/// Errors returned by the event loop.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("event loop is already running")]
    AlreadyRunning,
}

/// A timer waiting in the heap.
struct Timeout {
    deadline: Instant,
    sequence: u64,
    task: Task,
}

impl PartialEq for Timeout {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}

impl Eq for Timeout {}

impl PartialOrd for Timeout {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timeout {
    // Reversed so the max-heap yields the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct Shared {
    sender: mpsc::UnboundedSender<Task>,
    /// Taken by `run` for as long as the loop is running.
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Task>>>,
    /// Callbacks sent but not yet picked up by an iteration.
    pending: AtomicUsize,
    timeouts: Mutex<BinaryHeap<Timeout>>,
    sequence: AtomicU64,
    stopped: AtomicBool,
    wakeup: Notify,
}

impl Shared {
    fn next_deadline(&self) -> Option<Instant> {
        self.timeouts.lock().peek().map(|t| t.deadline)
    }

    fn take_due(&self, now: Instant) -> Vec<Task> {
        let mut timeouts = self.timeouts.lock();
        let mut due = Vec::new();

        while timeouts.peek().is_some_and(|t| t.deadline <= now) {
            if let Some(timeout) = timeouts.pop() {
                due.push(timeout.task);
            }
        }

        due
    }
}

/// Holds the receiver while `run` drives the loop and hands it back on drop,
/// so a cancelled `run` future leaves the loop runnable.
struct RunGuard<'a> {
    shared: &'a Shared,
    receiver: Option<mpsc::UnboundedReceiver<Task>>,
}

impl RunGuard<'_> {
    fn try_recv(&mut self) -> Option<Task> {
        self.receiver.as_mut()?.try_recv().ok()
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            *self.shared.receiver.lock() = Some(receiver);
        }
    }
}

/// Single-context cooperative event loop.
///
/// Cloning yields another handle to the same loop.
#[derive(Clone)]
pub struct EventLoop {
    shared: Arc<Shared>,
}

impl EventLoop {
    /// Create an idle event loop.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            shared: Arc::new(Shared {
                sender,
                receiver: Mutex::new(Some(receiver)),
                pending: AtomicUsize::new(0),
                timeouts: Mutex::new(BinaryHeap::new()),
                sequence: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
                wakeup: Notify::new(),
            }),
        }
    }

    /// Whether some task is currently driving [`run`](Self::run).
    pub fn is_running(&self) -> bool {
        self.shared.receiver.lock().is_none()
    }

    /// Number of injected callbacks not yet picked up.
    pub fn pending_callbacks(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Number of timers waiting to fire.
    pub fn pending_timeouts(&self) -> usize {
        self.shared.timeouts.lock().len()
    }

    /// Drive the loop on the current task until [`stop`](EventEngine::stop) is called.
    ///
    /// Each iteration runs the callbacks queued when it began plus every due
    /// timer. Work scheduled while an iteration runs waits for the next one.
    pub async fn run(&self) -> Result<(), EngineError> {
        let receiver = self
            .shared
            .receiver
            .lock()
            .take()
            .ok_or(EngineError::AlreadyRunning)?;
        let mut guard = RunGuard {
            shared: &self.shared,
            receiver: Some(receiver),
        };

        debug!("event loop started");
        let mut iterations: u64 = 0;

        loop {
            iterations += 1;

            let ready = self.shared.pending.load(Ordering::Acquire);
            let mut batch = Vec::with_capacity(ready);
            for _ in 0..ready {
                match guard.try_recv() {
                    Some(task) => {
                        self.shared.pending.fetch_sub(1, Ordering::AcqRel);
                        batch.push(task);
                    }
                    None => break,
                }
            }
            batch.extend(self.shared.take_due(Instant::now()));

            trace!(iteration = iterations, tasks = batch.len(), "event loop iteration");
            for task in batch {
                run_task(task);
            }

            if self.shared.stopped.swap(false, Ordering::AcqRel) {
                break;
            }

            if self.shared.pending.load(Ordering::Acquire) > 0 {
                tokio::task::yield_now().await;
                continue;
            }

            match self.shared.next_deadline() {
                Some(deadline) => {
                    tokio::select! {
                        _ = self.shared.wakeup.notified() => {}
                        _ = time::sleep_until(deadline) => {}
                    }
                }
                None => self.shared.wakeup.notified().await,
            }
        }

        drop(guard);
        debug!(iterations, "event loop stopped");

        Ok(())
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEngine for EventLoop {
    fn add_callback(&self, task: Task) {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if self.shared.sender.send(task).is_err() {
            // The receiver lives in `Shared`, so this only happens mid-teardown.
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            return;
        }
        self.shared.wakeup.notify_one();
    }

    fn call_later(&self, delay: Duration, task: Task) {
        let timeout = Timeout {
            deadline: deadline_after(Instant::now(), delay),
            sequence: self.shared.sequence.fetch_add(1, Ordering::Relaxed),
            task,
        };
        self.shared.timeouts.lock().push(timeout);
        self.shared.wakeup.notify_one();
    }

    fn is_busy(&self) -> bool {
        self.shared.pending.load(Ordering::Acquire) > 0 || !self.shared.timeouts.lock().is_empty()
    }

    fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.wakeup.notify_one();
    }
}

fn run_task(task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        error!(panic = %panic_message(payload.as_ref()), "event loop callback panicked");
    }
}
