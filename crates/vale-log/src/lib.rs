//! Structured logging and tracing for the Vale server.
//!
//! Provides structured, span-based, filterable logging via the `tracing`
//! ecosystem. Supports console output with timestamps and module paths, plus
//! JSON file logging in debug builds for post-mortem analysis. Integrates
//! with the configuration system to allow runtime log level control.

use std::path::Path;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use vale_config::ServerConfig;

/// Initialize the tracing subscriber for the server.
///
/// Sets up structured logging with:
/// - Console output with timestamps, module paths, and severity levels
/// - JSON file logging in debug builds (optional)
/// - Environment-based filtering (respects RUST_LOG)
/// - Integration with config system log_level setting
///
/// # Arguments
///
/// * `log_dir` - Optional directory for JSON log files (debug builds only)
/// * `debug_build` - Whether this is a debug build (enables file logging)
/// * `config` - Optional configuration to use for log level override
///
/// # Examples
///
/// ```no_run
/// use vale_log::init_logging;
/// use vale_config::ServerConfig;
///
/// // Basic initialization
/// init_logging(None, false, None);
///
/// // With file logging in debug mode
/// let log_dir = std::path::Path::new("./logs");
/// init_logging(Some(log_dir), true, None);
///
/// // With config override
/// let config = ServerConfig::default();
/// init_logging(None, false, Some(&config));
/// ```
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&ServerConfig>) {
    // Determine the filter string
    let filter_str = if let Some(config) = config {
        if !config.debug.log_level.is_empty() {
            config.debug.log_level.clone()
        } else {
            DEFAULT_FILTER.to_string()
        }
    } else {
        DEFAULT_FILTER.to_string()
    };

    // Base filter: info by default, overridable via RUST_LOG env var
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    // Console layer: human-readable format with timestamps
    let console_layer = fmt::layer()
        .with_target(true) // Show module path
        .with_thread_ids(false)
        .with_thread_names(true) // Useful when tick/watchdog threads are named
        .with_level(true)
        .with_timer(fmt::time::uptime()); // Time since server start

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    // In debug builds, also log to a file for post-mortem analysis
    if debug_build
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join("vale.log"))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false) // No ANSI color codes in file output
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json(); // Structured JSON for machine parsing

        subscriber.with(file_layer).init();
        return;
    }

    subscriber.init();
}

const DEFAULT_FILTER: &str = "info,vale_sim::dispatch=warn";

/// Create an `EnvFilter` with the default filter string.
///
/// Returns a filter that enables:
/// - `info` level for all targets by default
/// - `warn` level for the command dispatcher, which logs every rejected
///   packet and drowns the console on a busy shard
///
/// This is useful for testing and for getting consistent default behavior.
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}
