use crate::config::TelemetryConfig;
use std::fmt;
use tracing_subscriber::EnvFilter;

/// Failure to stand up the tracing subscriber at startup.
#[derive(Debug)]
pub struct TelemetryError {
    detail: String,
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "telemetry error: {}", self.detail)
    }
}

impl std::error::Error for TelemetryError {}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|err| TelemetryError {
            detail: format!("invalid log filter '{}': {err}", config.log_level),
        })?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .with_ansi(false)
        .try_init()
        .map_err(|err| TelemetryError {
            detail: err.to_string(),
        })
}
