//! Driver configuration
//!
//! Loaded from TOML: the file given with `--config`, else `./simdrive.toml`
//! when present, else built-in defaults. A handful of `SIMDRIVE_*`
//! environment variables override file values.

use crate::accounting::Pricing;
use crate::engine::SimulationSettings;
use crate::error::{ErrorCode, SimError};
use crate::executor::{ExecutorOptions, ViewerConfig};
use crate::generation::{BackoffConfig, GenerationParams};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;


/// File looked up in the working directory when no `--config` is given
pub const CONFIG_FILE_NAME: &str = "simdrive.toml";

pub const ENV_ENDPOINT: &str = "SIMDRIVE_ENDPOINT";
pub const ENV_MODEL: &str = "SIMDRIVE_MODEL";
pub const ENV_STORAGE_DIR: &str = "SIMDRIVE_STORAGE_DIR";
pub const ENV_LOG_LEVEL: &str = "SIMDRIVE_LOG_LEVEL";

/// Default data directory for simulations
pub fn default_storage_dir() -> Result<PathBuf, SimError> {
    ProjectDirs::from("org", "simdrive", "simdrive")
        .map(|dirs| dirs.data_dir().join("simulations"))
        .ok_or_else(|| {
            SimError::config_with_code(
                ErrorCode::CONFIG_PATH_ERROR,
                "could not determine a home directory for simulation storage",
                None,
            )
        })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Root of the checkpoint store; platform data dir when unset
    pub storage_dir: Option<PathBuf>,
    /// Tracing filter overriding the `-v` derived level
    pub log_level: Option<String>,
    pub generation: GenerationConfig,
    pub executor: ExecutorOptions,
    pub visualization: ViewerConfig,
    pub simulation: SimulationSettings,
    pub accounting: Pricing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Log prompts and raw outputs of rejected attempts
    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub params: GenerationParams,

    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            timeout: default_timeout(),
            verbose: false,
            params: GenerationParams::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl GenerationConfig {
    /// API key read from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/completions".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

impl DriverConfig {
    /// Load configuration and apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, SimError> {
        let mut config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(SimError::config_with_code(
                        ErrorCode::CONFIG_NOT_FOUND,
                        "configuration file does not exist",
                        Some(path.to_path_buf()),
                    ));
                }
                Self::from_file(path)?
            }
            None => {
                let local = Path::new(CONFIG_FILE_NAME);
                if local.exists() {
                    Self::from_file(local)?
                } else {
                    debug!("No {} found, using defaults", CONFIG_FILE_NAME);
                    Self::default()
                }
            }
        };

        config.merge_env_vars();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, SimError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SimError::config_with_code(
                ErrorCode::CONFIG_NOT_FOUND,
                "failed to read configuration file",
                Some(path.to_path_buf()),
            )
            .with_source(e)
        })?;
        let config = Self::from_toml(&content)
            .map_err(|e| e.with_context(path.display()))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, SimError> {
        toml::from_str(content).map_err(|e| {
            SimError::config_with_code(ErrorCode::CONFIG_PARSE_ERROR, "invalid TOML", None)
                .with_source(e)
        })
    }

    pub fn merge_env_vars(&mut self) {
        self.merge_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a variable lookup
    pub fn merge_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.generation.endpoint = endpoint;
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.generation.params.engine = model;
        }
        if let Some(dir) = lookup(ENV_STORAGE_DIR) {
            self.storage_dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = Some(level);
        }
    }

    pub fn validate(&self) -> Result<(), SimError> {
        let invalid = |message: String| {
            SimError::config_with_code(ErrorCode::CONFIG_INVALID_VALUE, message, None)
        };

        if self.generation.endpoint.trim().is_empty() {
            return Err(invalid("generation.endpoint must not be empty".to_string()));
        }
        if self.generation.timeout.is_zero() {
            return Err(invalid("generation.timeout must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.generation.backoff.jitter_factor) {
            return Err(invalid(
                "generation.backoff.jitter_factor must be between 0 and 1".to_string(),
            ));
        }
        self.simulation
            .validate()
            .map_err(|e| invalid(format!("simulation: {:#}", e)))?;
        Ok(())
    }

    /// Root of the checkpoint store
    pub fn storage_root(&self) -> Result<PathBuf, SimError> {
        match &self.storage_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_storage_dir(),
        }
    }
}
