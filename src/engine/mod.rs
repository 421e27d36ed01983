//! Event engine abstraction.
//!
//! The shutdown coordinator never owns the run loop it stops. It talks to it
//! through the small set of capabilities in [`EventEngine`], which
//! [`EventLoop`] implements on top of tokio.

mod event_loop;

pub use event_loop::{EngineError, EventLoop};

use std::time::Duration;

/// A unit of work scheduled onto an engine.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Capabilities a run loop exposes to the shutdown coordinator.
pub trait EventEngine: Send + Sync + 'static {
    /// Schedule `task` to run on the engine's own context.
    ///
    /// Safe to call from any thread, including signal-listening threads.
    fn add_callback(&self, task: Task);

    /// Schedule `task` to run on the engine's context once `delay` has elapsed.
    fn call_later(&self, delay: Duration, task: Task);

    /// Whether any callback is queued but not yet run, or any timer is pending.
    fn is_busy(&self) -> bool;

    /// Halt the run loop once the current iteration finishes.
    fn stop(&self);
}
