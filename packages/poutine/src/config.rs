//! Runtime configuration for the execution context.
//!
//! Loaded from a TOML file: either a bare table, or the `[tool.poutine]`
//! section of a larger manifest. Environment variables override file values.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_RNG_SEED: &str = "POUTINE_RNG_SEED";
pub const ENV_OUTSIDE_INFERENCE: &str = "POUTINE_OUTSIDE_INFERENCE";

/// What to do when `sample` receives an observation with no handler active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutsideInferencePolicy {
    /// Emit a warning and return the observation.
    #[default]
    Warn,
    /// Fail with `PoutineError::OutsideInference`.
    Error,
}

impl std::str::FromStr for OutsideInferencePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" => Ok(OutsideInferencePolicy::Warn),
            "error" => Ok(OutsideInferencePolicy::Error),
            other => Err(ConfigError::InvalidValue {
                key: ENV_OUTSIDE_INFERENCE,
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// Seed for the thread's generator; entropy-seeded when absent.
    #[serde(default)]
    pub rng_seed: Option<u64>,

    #[serde(default)]
    pub outside_inference: OutsideInferencePolicy,

    /// Enforce unique sample-site names within one wrapped execution.
    #[serde(default = "default_validate_site_names")]
    pub validate_site_names: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rng_seed: None,
            outside_inference: OutsideInferencePolicy::Warn,
            validate_site_names: true,
        }
    }
}

fn default_validate_site_names() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct Manifest {
    tool: Option<ToolSection>,
}

#[derive(Debug, Deserialize)]
struct ToolSection {
    poutine: Option<Config>,
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let manifest: Manifest = toml::from_str(content)?;
        if let Some(config) = manifest.tool.and_then(|tool| tool.poutine) {
            return Ok(config);
        }
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(raw) = lookup(ENV_RNG_SEED) {
            let seed = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: ENV_RNG_SEED,
                    value: raw.clone(),
                })?;
            self.rng_seed = Some(seed);
        }
        if let Some(raw) = lookup(ENV_OUTSIDE_INFERENCE) {
            self.outside_inference = raw.parse()?;
        }
        Ok(self)
    }

    /// Defaults overridden by the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }
}
