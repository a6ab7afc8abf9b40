//! TOML configuration for client options.
//!
//! ```toml
//! [defaults]
//! timeout_secs = 10
//! retries = 2
//!
//! [clients.billing]
//! host = "billing.internal"
//! scheme = "https"
//! max_connections = 4
//! block_when_full = true
//!
//! [clients.billing.headers]
//! Accept = "application/json"
//! ```
//!
//! Options for an identity are built from the built-in defaults, then the
//! `[defaults]` table, then the identity's `[clients.<identity>]` table.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::options::{ClientOptions, OptionsOverride};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid `{field}` for {scope}: {reason}")]
    Invalid {
        scope: String,
        field: &'static str,
        reason: String,
    },
}

/// Default and per-identity option overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientsConfig {
    pub defaults: OptionsOverride,
    pub clients: BTreeMap<String, OptionsOverride>,
}

impl ClientsConfig {
    /// Parses and validates a TOML document.
    ///
    /// ## Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// ## Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Adds or replaces the overrides of one identity.
    pub fn with_client(mut self, identity: impl Into<String>, overrides: OptionsOverride) -> Self {
        self.clients.insert(identity.into(), overrides);
        self
    }

    /// Options for `identity`.
    pub fn options_for(&self, identity: &str) -> ClientOptions {
        let options = ClientOptions::default().merged(&self.defaults);
        match self.clients.get(identity) {
            Some(overrides) => options.merged(overrides),
            None => options,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        validate_override("defaults", &self.defaults)?;
        for (identity, overrides) in &self.clients {
            validate_override(&format!("client {identity}"), overrides)?;
        }
        Ok(())
    }
}

fn validate_override(scope: &str, overrides: &OptionsOverride) -> Result<(), ConfigError> {
    let invalid = |field, reason: &str| ConfigError::Invalid {
        scope: scope.to_string(),
        field,
        reason: reason.to_string(),
    };

    if let Some(secs) = overrides.timeout_secs {
        if !secs.is_finite() || secs < 0.0 {
            return Err(invalid("timeout_secs", "must be a non-negative number"));
        }
        if Duration::try_from_secs_f64(secs).is_err() {
            return Err(invalid("timeout_secs", "is too large"));
        }
    }
    if overrides.max_connections == Some(0) {
        return Err(invalid("max_connections", "must be at least 1"));
    }
    if overrides.num_pools == Some(0) {
        return Err(invalid("num_pools", "must be at least 1"));
    }
    if overrides.host.as_deref().is_some_and(|host| host.trim().is_empty()) {
        return Err(invalid("host", "must not be empty"));
    }
    Ok(())
}
