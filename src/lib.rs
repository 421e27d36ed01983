//! stopgap - graceful shutdown for event-loop driven servers
//!
//! On SIGINT or SIGTERM the coordinator:
//! - runs every registered shutdown callback, isolating failures
//! - waits for the event loop to drain, bounded by a grace period
//! - stops the event loop, immediately if a second signal arrives

pub mod config;
pub mod engine;
pub mod server;
pub mod shutdown;
pub mod util;

pub use config::Config;
pub use engine::{EventEngine, EventLoop};
pub use shutdown::{ShutdownCoordinator, ShutdownError};
