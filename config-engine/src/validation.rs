use crate::error::{ConfigError, Result};

/// Semantic checks run after a configuration has been deserialized.
pub trait ConfigValidator {
    fn validate(&self) -> Result<()>;
}

/// Shorthand for building a validation failure.
pub fn invalid<T>(message: impl Into<String>) -> Result<T> {
    Err(ConfigError::ValidationError(message.into()))
}
