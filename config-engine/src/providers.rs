use std::path::{Path, PathBuf};

/// File formats understood by the engine, picked from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Toml,
    Json,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// A layer of configuration. Later layers override earlier ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File { path: PathBuf, required: bool },
    /// Variables such as `USERWF_MAX_PAGE_SIZE`; `__` separates nested keys.
    Env { prefix: String },
    /// Inline YAML, mostly useful in tests and embedded defaults.
    Yaml(String),
}

impl ConfigSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            required: true,
        }
    }

    pub fn optional_file(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            required: false,
        }
    }

    pub fn env(prefix: &str) -> Self {
        Self::Env {
            prefix: prefix.to_string(),
        }
    }

    pub fn yaml(content: &str) -> Self {
        Self::Yaml(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(FileFormat::from_path(Path::new("engine.YML")), Some(FileFormat::Yaml));
        assert_eq!(FileFormat::from_path(Path::new("engine.toml")), Some(FileFormat::Toml));
        assert_eq!(FileFormat::from_path(Path::new("engine.json")), Some(FileFormat::Json));
        assert_eq!(FileFormat::from_path(Path::new("engine.ini")), None);
        assert_eq!(FileFormat::from_path(Path::new("engine")), None);
    }
}
