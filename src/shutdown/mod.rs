//! Graceful shutdown coordination.
//!
//! [`ShutdownCoordinator`] owns the idle → draining → stopped state machine.
//! [`SignalBridge`] carries SIGINT/SIGTERM from whatever thread observes them
//! onto the event loop, where the coordinator's state is mutated.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use stopgap::config::ShutdownConfig;
//! use stopgap::engine::EventLoop;
//! use stopgap::shutdown::ShutdownCoordinator;
//!
//! let event_loop = EventLoop::new();
//! let coordinator = Arc::new(ShutdownCoordinator::new(
//!     Arc::new(event_loop.clone()),
//!     &ShutdownConfig::from_env()?,
//! ));
//!
//! coordinator.install_handlers()?;
//! coordinator.at_shutdown(|| {
//!     // stop accepting new connections
//!     Ok(())
//! })?;
//!
//! event_loop.run().await?;
//! # Ok(())
//! # }
//! ```

mod coordinator;
mod error;
mod signal;

pub use coordinator::{ShutdownCoordinator, ShutdownState, StopReason, TimeSource};
pub use error::ShutdownError;
pub use signal::{Notification, NotificationHandler, OsSignals, SignalBridge, SignalSource};
