//! Configuration system
//!
//! File-backed configuration shared by the renderer config tree, shader
//! definitions and material definitions. The format is chosen from the file
//! extension: `.toml` or `.ron`.

use std::path::Path;

pub use serde::{Deserialize, Serialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
            ConfigFormat::Ron => ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?,
            ConfigFormat::Ron => ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Supported on-disk formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML document
    Toml,
    /// Rusty Object Notation
    Ron,
}

impl ConfigFormat {
    /// File extensions probed, in order, when locating a named config
    pub const EXTENSIONS: [&'static str; 2] = ["toml", "ron"];

    /// Determine the format from a path's extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("ron") => Ok(Self::Ron),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Locate `<dir>/<name>.<ext>` for the first supported extension that exists
pub fn find_named_config(dir: &Path, name: &str) -> Option<std::path::PathBuf> {
    ConfigFormat::EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{name}.{ext}")))
        .find(|candidate| candidate.exists())
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    impl Config for Sample {}

    #[test]
    fn test_toml_and_ron_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sample = Sample { name: "arena".to_string(), count: 3 };

        for ext in ConfigFormat::EXTENSIONS {
            let path = dir.path().join(format!("sample.{ext}"));
            sample.save_to_file(&path).unwrap();
            assert_eq!(Sample::load_from_file(&path).unwrap(), sample);
        }
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let result = Sample::default().save_to_file(&path);
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_find_named_config_prefers_toml() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_named_config(dir.path(), "sample").is_none());

        Sample::default().save_to_file(dir.path().join("sample.ron")).unwrap();
        let found = find_named_config(dir.path(), "sample").unwrap();
        assert_eq!(found.extension().unwrap(), "ron");

        Sample::default().save_to_file(dir.path().join("sample.toml")).unwrap();
        let found = find_named_config(dir.path(), "sample").unwrap();
        assert_eq!(found.extension().unwrap(), "toml");
    }
}
