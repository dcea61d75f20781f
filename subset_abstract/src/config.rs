//! Inference configuration.
//!
//! Defaults come from [`crate::widening`]. A configuration can be read from a
//! TOML fragment and then adjusted from the environment:
//!
//! - `SUBSET_ABSTRACT_MAX_POSSIBILITIES`
//! - `SUBSET_ABSTRACT_MAX_FORCED`

use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{InferResult, InferenceError};
use crate::widening::{MAX_FORCED_RESOLUTIONS, MAX_POSSIBILITIES};

const ENV_MAX_POSSIBILITIES: &str = "SUBSET_ABSTRACT_MAX_POSSIBILITIES";
const ENV_MAX_FORCED: &str = "SUBSET_ABSTRACT_MAX_FORCED";

/// Tunables shared by the merge engine and the inference loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceConfig {
    /// Largest value `Possibilities` set a relaxed merge may produce.
    pub max_possibilities: usize,
    /// Budget of forced resolutions per inference run.
    pub max_forced_resolutions: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_possibilities: MAX_POSSIBILITIES,
            max_forced_resolutions: MAX_FORCED_RESOLUTIONS,
        }
    }
}

impl InferenceConfig {
    /// Parse a configuration from TOML. Missing keys keep their defaults.
    pub fn from_toml_str(src: &str) -> InferResult<Self> {
        let config: InferenceConfig =
            toml::from_str(src).map_err(|e| InferenceError::Config(e.to_string()))?;
        config.validate()
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(mut self) -> InferResult<Self> {
        if let Some(n) = read_env_usize(ENV_MAX_POSSIBILITIES)? {
            self.max_possibilities = n;
        }
        if let Some(n) = read_env_usize(ENV_MAX_FORCED)? {
            self.max_forced_resolutions = n;
        }
        self.validate()
    }

    fn validate(self) -> InferResult<Self> {
        if self.max_possibilities == 0 {
            return Err(InferenceError::Config(
                "max_possibilities must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}

fn read_env_usize(name: &str) -> InferResult<Option<usize>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| InferenceError::Config(format!("{}={:?}: {}", name, raw, e))),
        Err(_) => Ok(None),
    }
}
