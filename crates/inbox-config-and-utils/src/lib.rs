//! Configuration, paths and logging bootstrap shared by the inbox sync crates.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, SyncConfig, DEFAULT_LOG_LEVEL, DEFAULT_SUPABASE_PUBLISHABLE_KEY, DEFAULT_SUPABASE_URL,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_for_service, parse_level};
pub use paths::Paths;
