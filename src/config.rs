//! Configuration for the crypto token manager

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logic::IdAllocator;
use crate::model::KeyPolicy;
use crate::token::SoftwareSettings;

/// Default location of the token store document
pub fn default_store_path() -> PathBuf {
    PathBuf::from("cryptotokens.json")
}

/// Configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagerConfig {
    /// JSON document holding every token record
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// PBKDF2-HMAC-SHA256 rounds used when sealing software keystores
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    /// Shortest RSA key accepted for generation
    #[serde(default = "default_min_rsa_key_bits")]
    pub min_rsa_key_bits: u32,

    /// Random draws before id allocation gives up
    #[serde(default = "default_id_allocation_attempts")]
    pub id_allocation_attempts: usize,

    /// Caller name to granted resource prefixes; an `[access]` table replaces
    /// the default, which grants everything to `admin`
    #[serde(default = "default_access")]
    pub access: HashMap<String, Vec<String>>,
}

/// Caller the CLI acts as unless told otherwise
pub const DEFAULT_CALLER: &str = "admin";

fn default_access() -> HashMap<String, Vec<String>> {
    HashMap::from([(DEFAULT_CALLER.to_string(), vec!["/".to_string()])])
}

fn default_kdf_iterations() -> u32 {
    SoftwareSettings::DEFAULT_KDF_ITERATIONS
}

fn default_min_rsa_key_bits() -> u32 {
    KeyPolicy::DEFAULT_MIN_RSA_BITS
}

fn default_id_allocation_attempts() -> usize {
    IdAllocator::DEFAULT_MAX_ATTEMPTS
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            kdf_iterations: default_kdf_iterations(),
            min_rsa_key_bits: default_min_rsa_key_bits(),
            id_allocation_attempts: default_id_allocation_attempts(),
            access: default_access(),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ManagerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.kdf_iterations == 0 {
            return Err(ConfigError::Invalid {
                field: "kdf_iterations",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.id_allocation_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "id_allocation_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.min_rsa_key_bits > KeyPolicy::MAX_RSA_BITS {
            return Err(ConfigError::Invalid {
                field: "min_rsa_key_bits",
                reason: format!("must not exceed {}", KeyPolicy::MAX_RSA_BITS),
            });
        }
        Ok(())
    }

    pub fn software_settings(&self) -> SoftwareSettings {
        SoftwareSettings {
            kdf_iterations: self.kdf_iterations,
        }
    }

    pub fn key_policy(&self) -> KeyPolicy {
        KeyPolicy {
            min_rsa_bits: self.min_rsa_key_bits,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
