//! Shutdown error types.

use thiserror::Error;

/// Errors surfaced to code embedding the coordinator.
///
/// Failures inside the drain sequence are never returned; they are logged.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("call `install_handlers` before adding shutdown callbacks")]
    HandlersNotInstalled,

    #[error("failed to register signal handlers: {0}")]
    SignalRegistration(#[from] std::io::Error),
}
