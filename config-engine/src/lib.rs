//! Configuration loading for the user workflow engine.
//!
//! Configuration is assembled from layers, each overriding the previous one:
//!
//! - **Defaults**: a serializable value, usually the config type's `Default`
//! - **Files**: YAML, TOML or JSON, chosen by extension
//! - **Environment**: prefixed variables, `__` separating nested keys
//!
//! # Example
//!
//! ```rust,ignore
//! use config_engine::{ConfigEngine, ConfigSource};
//!
//! let engine = ConfigEngine::builder()
//!     .with_defaults(&EngineConfig::default())
//!     .add_source(ConfigSource::optional_file("userworkflow.yaml"))
//!     .add_source(ConfigSource::env("USERWF_"))
//!     .build()?;
//!
//! let config: EngineConfig = engine.extract_validated()?;
//! ```

pub mod engine;
pub mod providers;
pub mod validation;
pub mod error;

pub use engine::*;
pub use providers::*;
pub use validation::*;
pub use error::*;
