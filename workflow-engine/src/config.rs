use crate::definition::DefinitionRegistry;
use crate::error::{Result, WorkflowError};
use config_engine::{invalid, ConfigEngine, ConfigError, ConfigSource, ConfigValidator};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment prefix for engine settings, e.g. `USERWF_MAX_PAGE_SIZE=50`.
pub const ENV_PREFIX: &str = "USERWF_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Extra attempts after a version conflict before it is surfaced.
    pub max_conflict_retries: u32,
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Variables left out of the user state handed back to callers.
    pub hidden_variables: Vec<String>,
    /// Variables masked in logs.
    pub sensitive_variables: Vec<String>,
    /// YAML file with workflow definitions; built-in definitions when unset.
    pub definitions_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            default_page_size: 10,
            max_page_size: 100,
            hidden_variables: vec!["password".to_string(), "securityAnswer".to_string()],
            sensitive_variables: vec!["password".to_string(), "securityAnswer".to_string()],
            definitions_path: None,
        }
    }
}

impl ConfigValidator for EngineConfig {
    fn validate(&self) -> config_engine::Result<()> {
        if self.default_page_size == 0 {
            return invalid("default_page_size must be at least 1");
        }
        if self.max_page_size < self.default_page_size {
            return invalid(format!(
                "max_page_size ({}) is smaller than default_page_size ({})",
                self.max_page_size, self.default_page_size
            ));
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Defaults, then the optional file, then `USERWF_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ConfigEngine::builder().with_defaults(&Self::default());
        if let Some(path) = path {
            builder = builder.add_source(ConfigSource::file(path));
        }
        let engine = builder.add_source(ConfigSource::env(ENV_PREFIX)).build()?;
        Ok(engine.extract_validated()?)
    }

    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}

/// Reads and validates a YAML file of workflow definitions.
pub fn load_definitions(path: &Path) -> Result<DefinitionRegistry> {
    if !path.exists() {
        return Err(ConfigError::SourceNotFound(path.to_path_buf()).into());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| WorkflowError::InvalidDefinition(format!("{}: {e}", path.display())))?;
    let registry = DefinitionRegistry::from_yaml(&content)?;
    info!(path = %path.display(), kinds = ?registry.kinds(), "Workflow definitions loaded");
    Ok(registry)
}
