use crate::config::LoaderConfig;
use crate::config::error::{ConfigError, Result};
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};

/// Prefix for environment overrides, e.g. `DM_LOADER_TO__PORT=4001`.
pub const DEFAULT_ENV_PREFIX: &str = "DM_LOADER";

/// Configuration loader with layered merging support
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    /// Set the configuration file path (TOML, JSON or YAML by extension)
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load configuration with layered merging:
    /// 1. Defaults (from `LoaderConfig::default`)
    /// 2. Config file if provided
    /// 3. Environment variables (double underscore for nesting)
    pub fn load(&self) -> Result<LoaderConfig> {
        let mut builder = Config::builder();

        let defaults_json = serde_json::to_string(&LoaderConfig::default())?;
        builder = builder.add_source(File::from_str(&defaults_json, config::FileFormat::Json));

        if let Some(ref path) = self.config_path {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            builder = builder.add_source(File::from(path.as_ref()));
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: LoaderConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(task = %config.name, target = ?config.to, "loaded loader configuration");
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
