use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "VKCOMPUTE_LOG";

/// Initialize structured logging with environment filter.
/// Set VKCOMPUTE_LOG=debug (or trace, info, warn, error) for verbosity control.
/// Log lines go to stderr so command output on stdout stays machine readable.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
