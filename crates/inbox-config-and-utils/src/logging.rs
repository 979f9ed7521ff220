//! Logging initialization.
//!
//! Thin wrapper over the observability crate. In dev mode every process writes
//! structured JSONL to `~/.inbox-sync/logs/dev.jsonl` and mirrors to stderr;
//! otherwise logs go to stderr in compact form.

use observability::{LogConfig, ObservabilityMode};

/// Initialize the logging system.
///
/// `level` is the default filter; `RUST_LOG` takes precedence when set.
/// `INBOX_OBS_MODE=dev` switches to the JSONL file sink.
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("inbox sync started");
/// ```
pub fn init_logging(level: &str) {
    init_logging_for_service("inbox-sync", level);
}

/// Initialize logging with a custom service name.
///
/// The service name is written into every JSONL line so several tools can
/// share the central log stream.
pub fn init_logging_for_service(service_name: &str, level: &str) {
    let mode = match std::env::var("INBOX_OBS_MODE")
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "dev" | "development" => ObservabilityMode::DevJsonl,
        _ => ObservabilityMode::Compact,
    };

    observability::init_with_config(LogConfig {
        service_name: service_name.into(),
        default_level: parse_level(level).to_string().to_lowercase(),
        also_stderr: true,
        mode,
        ..Default::default()
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
