//! Tracing subscriber initialization

use crate::config::{LogFormat, TelemetryConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use unibi_core::ConfigError;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.filter`. Call once at startup;
/// a second call fails because a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), ConfigError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| ConfigError::InvalidValue {
            field: "filter".to_string(),
            value: config.filter.clone(),
            reason: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).try_init(),
    };
    installed.map_err(|e| ConfigError::InvalidValue {
        field: "telemetry".to_string(),
        value: format!("{:?}", config.log_format),
        reason: format!("Failed to init subscriber: {}", e),
    })?;

    tracing::info!(
        log_format = ?config.log_format,
        filter = %config.filter,
        "Telemetry initialized"
    );
    Ok(())
}
