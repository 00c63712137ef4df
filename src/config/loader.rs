//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::DaemonConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<DaemonConfig, ConfigError> {
    let config: DaemonConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<DaemonConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

/// Where a loaded configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// The file did not exist.
    Defaults,
}

/// Load configuration, falling back to defaults when the file does not exist.
///
/// Runs before logging is set up, so the source is returned for the caller
/// to report.
pub fn load_or_default(path: &Path) -> Result<(DaemonConfig, ConfigSource), ConfigError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok((parse_config(&content)?, ConfigSource::File)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok((DaemonConfig::default(), ConfigSource::Defaults))
        }
        Err(e) => Err(ConfigError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, source) = load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.frontend.http_port, 80);
        assert_eq!(source, ConfigSource::Defaults);

        let path = dir.path().join("present.toml");
        fs::write(&path, "[frontend]\nhttp_port = 8080\n").unwrap();
        let (config, source) = load_or_default(&path).unwrap();
        assert_eq!(config.frontend.http_port, 8080);
        assert_eq!(source, ConfigSource::File);
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = parse_config("[frontend]\nhttp_port = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("frontend.http_port"));
    }

    #[test]
    fn syntax_errors_are_reported() {
        let err = parse_config("[frontend\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn loads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.toml");
        std::fs::write(&path, "[advertiser]\nenabled = false\n").unwrap();
        let config = load_config(&path).unwrap();
        assert!(!config.advertiser.enabled);
    }
}
