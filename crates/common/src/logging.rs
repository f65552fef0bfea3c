//! Logging setup and configuration

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Setup tracing subscriber for the application
///
/// `RUST_LOG` takes precedence over `default_level`. Installing a second
/// subscriber in the same process is reported as a configuration error.
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_thread_names(true))
        .try_init()
        .map_err(|e| crate::Error::Config(format!("Logging already initialized: {}", e)))?;

    Ok(())
}

/// Map the C ABI verbosity argument to a log filter directive
///
/// 0 keeps the default (`warn`), each additional step lowers the threshold.
pub fn verbosity_to_level(verbosity: i32) -> &'static str {
    match verbosity {
        i32::MIN..=0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}
