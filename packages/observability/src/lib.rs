//! # Observability
//!
//! Centralized logging bootstrap for the inbox sync workspace.
//!
//! Crates are **log producers**: they use standard `tracing` macros and never
//! decide where logs go. Binaries call `observability::init_with_config()`
//! once at startup.
//!
//! ## Modes
//!
//! - `Compact`: human-readable lines on stderr.
//! - `DevJsonl`: structured JSONL appended to `~/.inbox-sync/logs/dev.jsonl`
//!   (optionally mirrored to stderr), so `tail -f ... | jq` works across
//!   processes.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "inbox-sync".into(),
//!     default_level: "debug".into(),
//!     mode: observability::ObservabilityMode::DevJsonl,
//!     ..Default::default()
//! });
//! ```

mod dev;
mod json_layer;

use std::path::PathBuf;

/// Where log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObservabilityMode {
    /// Compact stderr output.
    #[default]
    Compact,
    /// Central JSONL file output.
    DevJsonl,
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every JSONL line.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path for `DevJsonl`.
    /// Defaults to `~/.inbox-sync/logs/dev.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr in `DevJsonl` mode.
    pub also_stderr: bool,

    /// Output mode.
    pub mode: ObservabilityMode,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
            mode: ObservabilityMode::Compact,
        }
    }
}

/// Initialize with default settings for the given service.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize the global subscriber.
///
/// Calling this more than once is harmless: later calls are ignored.
pub fn init_with_config(config: LogConfig) {
    match config.mode {
        ObservabilityMode::DevJsonl => dev::init_dev_subscriber(&config),
        ObservabilityMode::Compact => {
            use tracing_subscriber::util::SubscriberInitExt;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter(&config.default_level))
                .with_target(true)
                .with_writer(std::io::stderr)
                .compact()
                .finish()
                .try_init();
        }
    }
}

fn env_filter(default_level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
