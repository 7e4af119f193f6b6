use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Project-local configuration directory.
pub const CONFIG_DIR: &str = ".remedy";

/// Environment variable prefix; `__` separates nested keys.
pub const ENV_PREFIX: &str = "REMEDY_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_iterations: {0}. Must be at least 1")]
    InvalidMaxIterations(u32),

    #[error("Invalid divergence_limit: {0}. Must be at least 1")]
    InvalidDivergenceLimit(u32),

    #[error("Invalid max_dag_nodes: {0}. Must be at least 1")]
    InvalidMaxDagNodes(usize),

    #[error("Invalid window_size: {0}. Must be at least 2")]
    InvalidWindowSize(usize),

    #[error("Invalid stability_epsilon: {0}. Must be positive")]
    InvalidStabilityEpsilon(f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid queue_capacity: {0}. Must be at least 1")]
    InvalidQueueCapacity(usize),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. .remedy/config.yaml
    /// 3. .remedy/local.yaml (optional local overrides)
    /// 4. Environment variables (REMEDY_* prefix)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".")
    }

    /// Same as [`ConfigLoader::load`], with `.remedy/` resolved under `root`.
    pub fn load_from_dir(root: impl AsRef<Path>) -> Result<Config> {
        let dir = root.as_ref().join(CONFIG_DIR);
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file; environment overrides still apply.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context(format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let coordinator = &config.coordinator;
        if coordinator.max_iterations == 0 {
            return Err(ConfigError::InvalidMaxIterations(coordinator.max_iterations));
        }
        if coordinator.divergence_limit == 0 {
            return Err(ConfigError::InvalidDivergenceLimit(
                coordinator.divergence_limit,
            ));
        }
        if coordinator.max_dag_nodes == 0 {
            return Err(ConfigError::InvalidMaxDagNodes(coordinator.max_dag_nodes));
        }

        if config.convergence.window_size < 2 {
            return Err(ConfigError::InvalidWindowSize(config.convergence.window_size));
        }
        if config.convergence.stability_epsilon <= 0.0 {
            return Err(ConfigError::InvalidStabilityEpsilon(
                config.convergence.stability_epsilon,
            ));
        }

        if config.telemetry.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity(
                config.telemetry.queue_capacity,
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SandboxMode;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.database.path, ".remedy/remedy.db");
        assert_eq!(config.coordinator.max_iterations, 10);
        assert_eq!(config.coordinator.divergence_limit, 2);
        assert_eq!(config.convergence.window_size, 3);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
database:
  path: /custom/path.db
  max_connections: 2
coordinator:
  max_iterations: 4
  enable_decomposition: false
recovery:
  prefer_proven_strategies: true
sandbox:
  mode: noop
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.database.path, "/custom/path.db");
        assert_eq!(config.coordinator.max_iterations, 4);
        assert!(!config.coordinator.enable_decomposition);
        assert_eq!(config.coordinator.phase_timeout_secs, 300);
        assert!(config.recovery.prefer_proven_strategies);
        assert_eq!(config.sandbox.mode, SandboxMode::Noop);
        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        let mut config = Config::default();
        config.coordinator.max_iterations = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxIterations(0))
        ));

        let mut config = Config::default();
        config.coordinator.divergence_limit = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidDivergenceLimit(0))
        ));

        let mut config = Config::default();
        config.convergence.window_size = 1;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidWindowSize(1))
        ));

        let mut config = Config::default();
        config.convergence.stability_epsilon = 0.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidStabilityEpsilon(_))
        ));

        let mut config = Config::default();
        config.telemetry.queue_capacity = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidQueueCapacity(0))
        ));
    }

    #[test]
    fn test_validate_invalid_logging() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidLogLevel(level)) => assert_eq!(level, "loud"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat(_))
        ));
    }

    #[test]
    fn test_validate_database() {
        let mut config = Config::default();
        config.database.path = String::new();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyDatabasePath)
        ));

        let mut config = Config::default();
        config.database.max_connections = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxConnections(0))
        ));
    }

    #[test]
    fn test_hierarchical_merging_with_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.yaml"),
            "coordinator:\n  max_iterations: 5\n  divergence_limit: 3\nlogging:\n  level: info\n  format: json\n",
        )
        .unwrap();
        std::fs::write(
            config_dir.join("local.yaml"),
            "coordinator:\n  max_iterations: 7\n",
        )
        .unwrap();

        temp_env::with_vars(
            [
                ("REMEDY_LOGGING__LEVEL", Some("debug")),
                ("REMEDY_TELEMETRY__RETENTION_DAYS", Some("14")),
            ],
            || {
                let config = ConfigLoader::load_from_dir(dir.path()).unwrap();
                assert_eq!(config.coordinator.max_iterations, 7, "local.yaml wins");
                assert_eq!(config.coordinator.divergence_limit, 3, "base value persists");
                assert_eq!(config.logging.level, "debug", "env wins");
                assert_eq!(config.logging.format, "json");
                assert_eq!(config.telemetry.retention_days, 14);
            },
        );
    }

    #[test]
    fn test_load_from_missing_file() {
        assert!(ConfigLoader::load_from_file("/nonexistent/remedy.yaml").is_err());
    }

    #[test]
    fn test_invalid_file_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remedy.yaml");
        std::fs::write(&path, "convergence:\n  window_size: 1\n").unwrap();
        assert!(ConfigLoader::load_from_file(&path).is_err());
    }
}
