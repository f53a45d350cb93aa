use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::account::DEFAULT_ACCOUNT_TYPE;
use crate::state::search::Coordinates;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Library configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub account: AccountConfig,
}

/// Location fix settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Providers to ask for fixes, most preferred first
    #[serde(default = "default_providers")]
    pub providers: Vec<String>,
    /// Minimum movement before a new fix is taken
    #[serde(default = "default_min_distance")]
    pub min_distance_m: f32,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            min_distance_m: default_min_distance(),
        }
    }
}

fn default_providers() -> Vec<String> {
    vec!["gps".to_string(), "network".to_string()]
}

fn default_min_distance() -> f32 {
    50.0
}

/// Account selection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(default = "default_account_type")]
    pub account_type: String,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            account_type: default_account_type(),
        }
    }
}

fn default_account_type() -> String {
    DEFAULT_ACCOUNT_TYPE.to_string()
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        debug!("loaded config from {}", path.display());
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.account.account_type.is_empty() {
            return Err(ConfigError::Invalid("account type is empty".to_string()));
        }
        if !self.location.min_distance_m.is_finite() || self.location.min_distance_m < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "min_distance_m must be a non-negative number, got {}",
                self.location.min_distance_m
            )));
        }
        Ok(())
    }

    /// Ask each configured provider for a fix, most preferred first.
    pub fn preferred_fixes<T, F>(&self, mut fix_for: F) -> Vec<Option<T>>
    where
        F: FnMut(&str) -> Option<T>,
    {
        self.location
            .providers
            .iter()
            .map(|provider| fix_for(provider))
            .collect()
    }
}

impl LocationConfig {
    /// Whether `next` moved far enough from `last` to be taken.
    pub fn accepts(&self, last: Option<Coordinates>, next: Coordinates) -> bool {
        match last {
            Some(last) => last.distance_m(&next) >= f64::from(self.min_distance_m),
            None => true,
        }
    }
}
