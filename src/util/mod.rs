//! Utility functions and helpers.

mod logging;
mod shutdown;

pub use logging::init_logging;
pub use shutdown::ShutdownSignal;

use std::any::Any;
use std::time::Duration;
use tokio::time::Instant;

/// Stand-in for "never" when a deadline would overflow the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `now + delay`, with `delay` capped at roughly thirty years so the sum
/// cannot overflow.
pub fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now + delay.min(FAR_FUTURE)
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
