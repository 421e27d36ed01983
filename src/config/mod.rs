//! Configuration loading, parsing, and validation.

mod loader;
mod types;
mod validation;

pub use loader::{
    apply_deadline_override, deadline_from_env, load_config, ConfigError, DEADLINE_ENV,
};
pub(crate) use loader::read_deadline_env;
pub use types::*;
pub use validation::validate_config;
