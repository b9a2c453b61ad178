use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default filter when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "voice_relay=debug,voice_relay_lib=debug,warn";

/// Initialize logging with tracing
///
/// This function sets up the tracing subscriber with the following configuration:
/// - Reads filter from RUST_LOG environment variable if available
/// - Falls back to [`DEFAULT_FILTER`] if RUST_LOG is not set
/// - Uses a formatted output layer
///
/// Calling it a second time is a no-op.
///
/// # Example
///
/// ```no_run
/// use voice_relay_lib::utils::logging::init_logging;
///
/// init_logging();
/// ```
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .is_ok()
    {
        tracing::info!("Voice relay logging initialized");
    }
}
