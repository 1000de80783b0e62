use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable that overrides the configured log filter.
pub const LOG_ENV: &str = "VKSHIM_LOG";

/// Initialize structured logging with environment filter.
/// Set VKSHIM_LOG=debug (or trace, info, warn, error) for verbosity control;
/// otherwise `default_filter` applies.
///
/// The layer is loaded into arbitrary host processes which may already have
/// installed a global subscriber, so an existing one is left in place.
pub fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init();
}
