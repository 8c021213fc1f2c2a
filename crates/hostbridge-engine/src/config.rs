//! Bridge configuration (hostbridge.toml)
//!
//! Every field has a default, so an empty document is a valid configuration.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding `exception_policy`
pub const EXCEPTION_POLICY_ENV: &str = "HOSTBRIDGE_EXCEPTION_POLICY";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Unknown exception policy name
    #[error("Unknown exception policy '{0}' (expected 'strict' or 'lenient')")]
    UnknownPolicy(String),

    /// Validation error
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What happens when a foreign call raises an exception
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionPolicy {
    /// Raise through the host, then abort
    Strict,
    /// Raise through the host, log, and continue
    #[default]
    Lenient,
}

impl FromStr for ExceptionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(ExceptionPolicy::Strict),
            "lenient" => Ok(ExceptionPolicy::Lenient),
            _ => Err(ConfigError::UnknownPolicy(s.to_string())),
        }
    }
}

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    /// Exception policy for foreign calls
    #[serde(default)]
    pub exception_policy: ExceptionPolicy,

    /// Editor-only behavior (hot reload windows)
    #[serde(default)]
    pub editor: bool,

    /// Load assemblies as collectible units
    #[serde(default = "default_collectible")]
    pub collectible_assemblies: bool,

    /// Assembly that owns bindings for host-native types
    #[serde(default = "default_native_assembly")]
    pub native_assembly: String,

    /// Native package -> assembly for packages bound elsewhere
    #[serde(default)]
    pub native_assembly_overrides: HashMap<String, String>,
}

fn default_collectible() -> bool {
    true
}

fn default_native_assembly() -> String {
    "HostBridge.Native".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            exception_policy: ExceptionPolicy::default(),
            editor: false,
            collectible_assemblies: default_collectible(),
            native_assembly: default_native_assembly(),
            native_assembly_overrides: HashMap::new(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.native_assembly.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "native_assembly cannot be empty".to_string(),
            ));
        }
        for (package, assembly) in &self.native_assembly_overrides {
            if assembly.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "native_assembly_overrides entry for '{}' names no assembly",
                    package
                )));
            }
        }
        Ok(())
    }

    /// Apply `HOSTBRIDGE_EXCEPTION_POLICY` if set
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        match std::env::var(EXCEPTION_POLICY_ENV) {
            Ok(value) => self.apply_policy_override(&value),
            Err(_) => Ok(()),
        }
    }

    /// Override the exception policy by name
    pub fn apply_policy_override(&mut self, value: &str) -> Result<(), ConfigError> {
        self.exception_policy = value.parse()?;
        Ok(())
    }

    /// Assembly that owns bindings for types of a native package
    pub fn assembly_for_package(&self, package: &str) -> &str {
        self.native_assembly_overrides
            .get(package)
            .map(String::as_str)
            .unwrap_or(&self.native_assembly)
    }
}
