use crate::error::{ConfigError, Result};
use crate::providers::{ConfigSource, FileFormat};
use crate::validation::ConfigValidator;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Layered configuration: defaults, then files, then environment.
pub struct ConfigEngine {
    figment: Figment,
}

impl ConfigEngine {
    pub fn builder() -> ConfigEngineBuilder {
        ConfigEngineBuilder {
            figment: Figment::new(),
            error: None,
        }
    }

    pub fn extract<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(self.figment.extract()?)
    }

    /// Extracts a nested section, e.g. `engine` out of a larger document.
    pub fn extract_section<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        Ok(self.figment.extract_inner(key)?)
    }

    pub fn extract_validated<T: DeserializeOwned + ConfigValidator>(&self) -> Result<T> {
        let config: T = self.extract()?;
        config.validate()?;
        Ok(config)
    }
}

pub struct ConfigEngineBuilder {
    figment: Figment,
    error: Option<ConfigError>,
}

impl ConfigEngineBuilder {
    pub fn with_defaults<T: Serialize>(mut self, defaults: &T) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(defaults));
        self
    }

    pub fn add_source(mut self, source: ConfigSource) -> Self {
        if self.error.is_some() {
            return self;
        }
        match source {
            ConfigSource::File { path, required } => {
                if !path.exists() {
                    if required {
                        self.error = Some(ConfigError::SourceNotFound(path));
                    } else {
                        debug!(path = %path.display(), "Optional configuration file absent");
                    }
                    return self;
                }
                self.figment = match FileFormat::from_path(&path) {
                    Some(FileFormat::Yaml) => self.figment.merge(Yaml::file(&path)),
                    Some(FileFormat::Toml) => self.figment.merge(Toml::file(&path)),
                    Some(FileFormat::Json) => self.figment.merge(Json::file(&path)),
                    None => {
                        self.error = Some(ConfigError::UnsupportedFormat(path.display().to_string()));
                        return self;
                    }
                };
                debug!(path = %path.display(), "Configuration file layered");
            }
            ConfigSource::Env { prefix } => {
                self.figment = self.figment.merge(Env::prefixed(&prefix).split("__"));
            }
            ConfigSource::Yaml(content) => {
                self.figment = self.figment.merge(Yaml::string(&content));
            }
        }
        self
    }

    pub fn build(self) -> Result<ConfigEngine> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(ConfigEngine {
                figment: self.figment,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::invalid;
    use figment::Jail;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Limits {
        page_size: u32,
        label: String,
    }

    impl Default for Limits {
        fn default() -> Self {
            Self {
                page_size: 10,
                label: "default".into(),
            }
        }
    }

    impl ConfigValidator for Limits {
        fn validate(&self) -> Result<()> {
            if self.page_size == 0 {
                return invalid("page_size must be positive");
            }
            Ok(())
        }
    }

    #[test]
    fn test_layers_override_in_order() {
        Jail::expect_with(|jail| {
            jail.create_file("limits.yaml", "page_size: 25\n")?;
            jail.set_env("TESTCFG_LABEL", "from-env");

            let engine = ConfigEngine::builder()
                .with_defaults(&Limits::default())
                .add_source(ConfigSource::file("limits.yaml"))
                .add_source(ConfigSource::env("TESTCFG_"))
                .build()
                .map_err(|e| e.to_string())?;
            let limits: Limits = engine.extract().map_err(|e| e.to_string())?;
            assert_eq!(limits.page_size, 25);
            assert_eq!(limits.label, "from-env");
            Ok(())
        });
    }

    #[test]
    fn test_missing_required_file_fails() {
        let err = ConfigEngine::builder()
            .add_source(ConfigSource::file("/definitely/not/here.yaml"))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::SourceNotFound(_)));

        let engine = ConfigEngine::builder()
            .with_defaults(&Limits::default())
            .add_source(ConfigSource::optional_file("/definitely/not/here.yaml"))
            .build()
            .unwrap();
        assert_eq!(engine.extract::<Limits>().unwrap(), Limits::default());
    }

    #[test]
    fn test_validation_runs_after_extract() {
        let engine = ConfigEngine::builder()
            .with_defaults(&Limits::default())
            .add_source(ConfigSource::yaml("page_size: 0"))
            .build()
            .unwrap();
        let err = engine.extract_validated::<Limits>().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_extract_section() {
        let engine = ConfigEngine::builder()
            .add_source(ConfigSource::yaml("engine:\n  page_size: 5\n  label: nested\n"))
            .build()
            .unwrap();
        let limits: Limits = engine.extract_section("engine").unwrap();
        assert_eq!(limits.page_size, 5);
    }
}
