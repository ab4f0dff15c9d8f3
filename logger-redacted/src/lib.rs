//! Logging for the user workflow engine.
//!
//! Process variables carry a user's tentative attributes (e-mail addresses,
//! phone numbers, passwords), so anything derived from them goes through
//! [`PiiRedactor`] before it reaches a log line.
//!
//! # Example
//!
//! ```rust,ignore
//! use logger_redacted::{init_tracing, LoggerConfig, PiiRedactor};
//!
//! init_tracing(&LoggerConfig::default())?;
//!
//! let redactor = PiiRedactor::with_sensitive_keys(&["password".to_string()]);
//! tracing::debug!(variables = %redactor.redact_variables(&variables), "Variables merged");
//! ```

pub mod config;
pub mod redactor;

pub use config::*;
pub use redactor::*;

use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Tracing subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Installs the global subscriber. `RUST_LOG` wins over `config.log_level`.
pub fn init_tracing(config: &LoggerConfig) -> Result<(), LoggerError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .map_err(|e| LoggerError::InvalidFilter(e.to_string()))?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    installed.map_err(|e| LoggerError::AlreadyInitialized(e.to_string()))
}
