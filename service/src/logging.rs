//! Tracing subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use simplebank_common::{BankError, Result};

use crate::config::LogFormat;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. Fails if a global
/// subscriber is already installed or the filter does not parse.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| BankError::ConfigurationError(format!("Invalid log level: {}", e)))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    };

    installed.map_err(|e| BankError::ConfigurationError(e.to_string()))
}
