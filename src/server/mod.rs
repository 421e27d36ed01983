//! Demo HTTP server embedding the shutdown coordinator.
//!
//! Answers every request with "Hello, world" and stops accepting
//! connections when its [`ShutdownSignal`](crate::util::ShutdownSignal) fires.

mod listener;

pub use listener::HelloServer;
