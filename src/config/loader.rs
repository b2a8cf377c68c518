//! Configuration Loader
//!
//! Layers built-in defaults, an optional TOML file and environment overrides
//! into an [`EngineConfig`], then validates the result.

use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::EngineConfig;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_VAR: &str = "SEISMO_CONFIG";
/// Prefix of per-key overrides, e.g. `SEISMO__BACKOFF__MAX_RETRIES=3`
pub const ENV_PREFIX: &str = "SEISMO";
pub const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: EngineConfig,
    environment: String,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Load with the file named by `SEISMO_CONFIG`, if any
    pub fn load() -> ConfigResult<Self> {
        match env::var(CONFIG_PATH_VAR) {
            Ok(path) if !path.is_empty() => Self::load_from_file(path),
            _ => Self::load_with_env(None, Self::environment_overrides()),
        }
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        Self::load_with_env(Some(path.as_ref()), Self::environment_overrides())
    }

    /// Load from an optional file and an explicit override source
    ///
    /// Tests pass an `Environment` with a fixed `source` map instead of
    /// touching the process environment.
    pub fn load_with_env(path: Option<&Path>, overrides: Environment) -> ConfigResult<Self> {
        let environment = Self::detect_environment();

        let mut builder = Config::builder().add_source(Config::try_from(&EngineConfig::default())?);

        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigurationError::config_file_not_found(path));
            }
            debug!(path = %path.display(), "Reading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let config: EngineConfig = builder
            .add_source(overrides)
            .build()?
            .try_deserialize()?;

        config.validate()?;

        info!(
            environment = %environment,
            source = path.map(|p| p.display().to_string()).unwrap_or_else(|| "defaults".into()),
            max_concurrent_remote_calls = config.execution.max_concurrent_remote_calls,
            max_retries = config.backoff.max_retries,
            "Configuration loaded successfully"
        );

        Ok(Self {
            config,
            environment,
            source: path.map(Path::to_path_buf),
        })
    }

    /// Wrap an already-built configuration after validating it
    pub fn from_config(config: EngineConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            environment: Self::detect_environment(),
            source: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn into_config(self) -> EngineConfig {
        self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    fn environment_overrides() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
    }

    /// `SEISMO_ENV`, then `APP_ENV`, defaulting to development
    pub fn detect_environment() -> String {
        env::var("SEISMO_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_overrides() -> Environment {
        overrides(&[])
    }

    fn overrides(pairs: &[(&str, &str)]) -> Environment {
        let source: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .source(Some(source))
    }

    fn config_file(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let manager = ConfigManager::load_with_env(None, no_overrides()).unwrap();
        assert_eq!(manager.config(), &EngineConfig::default());
        assert!(manager.source().is_none());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let file = config_file(
            r#"
            [backoff]
            base_delay_ms = 1000
            max_retries = 3

            [orchestration]
            max_rounds = 10
            "#,
        );

        let manager = ConfigManager::load_with_env(Some(file.path()), no_overrides()).unwrap();
        let config = manager.config();
        assert_eq!(config.backoff.base_delay_ms, 1000);
        assert_eq!(config.backoff.max_retries, 3);
        assert_eq!(config.backoff.multiplier, 2.0);
        assert_eq!(config.orchestration.max_rounds, Some(10));
        assert_eq!(config.execution.max_concurrent_remote_calls, 4);
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = config_file("[execution]\nmax_concurrent_remote_calls = 8\n");
        let manager = ConfigManager::load_with_env(
            Some(file.path()),
            overrides(&[("SEISMO__EXECUTION__MAX_CONCURRENT_REMOTE_CALLS", "16")]),
        )
        .unwrap();
        assert_eq!(manager.config().execution.max_concurrent_remote_calls, 16);
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigManager::load_with_env(Some(Path::new("/nonexistent/seismo.toml")), no_overrides())
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::ConfigFileNotFound { .. }));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let file = config_file("[backoff]\nmultiplier = 1.05\nmax_jitter = 0.2\n");
        let err = ConfigManager::load_with_env(Some(file.path()), no_overrides()).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }
}
