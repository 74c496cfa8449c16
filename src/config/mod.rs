// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process settings.
//!
//! Settings are separate from manifests: they say where the manifests are
//! and how the process logs, while the manifests describe the gateway
//! itself.  A [`Config`] stacks [`ConfigProvider`]s; later providers
//! override earlier ones.
//!
//! | key | type | default |
//! |-----|------|---------|
//! | `gateway.logging` | [`LoggingConfig`] | plain `env_logger` at info |
//! | `gateway.manifests` | list of paths | none |
//! | `gateway.shutdown_timeout_secs` | integer | 30 |

pub mod error;
mod file;


pub use error::ConfigError;
pub use file::{FileConfigProvider, FileFormat};

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::logging::LoggingConfig;

/// A source of settings values.  Object safe; typed access lives in
/// [`ConfigProviderExt`].
pub trait ConfigProvider: Debug + Send + Sync {
    fn has(&self, key: &str) -> bool;

    fn provider_name(&self) -> &str;

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError>;
}

pub trait ConfigProviderExt: ConfigProvider {
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get_raw(key)? {
            Some(value) => decode(key, value).map(Some),
            None => Ok(None),
        }
    }
}

impl<T: ConfigProvider> ConfigProviderExt for T {}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Result<T, ConfigError> {
    serde_json::from_value(value).map_err(|e| ConfigError::ParseError(format!("failed to deserialize '{key}': {e}")))
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn build(self) -> Config {
        Config {
            providers: self.providers,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Settings from one file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        Ok(Self::builder().with_provider(FileConfigProvider::new(path)?).build())
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        for provider in self.providers.iter().rev() {
            if provider.has(key) {
                return provider.get_raw(key);
            }
        }
        Ok(None)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get_raw(key)? {
            Some(value) => decode(key, value).map(Some),
            None => Ok(None),
        }
    }

    pub fn get_or_default<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.get(key)?.unwrap_or(default))
    }
}

pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// The typed view of the `gateway.*` keys.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    pub logging: Option<LoggingConfig>,
    pub manifests: Vec<PathBuf>,
    /// Upper bound for the whole process to drain after a signal.
    pub shutdown_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            logging: None,
            manifests: Vec::new(),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

impl GatewaySettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let manifests: Vec<PathBuf> = config.get_or_default("gateway.manifests", Vec::new())?;
        if manifests.iter().any(|p| p.as_os_str().is_empty()) {
            return Err(ConfigError::invalid("gateway.manifests", "empty path"));
        }
        let secs: u64 = config.get_or_default("gateway.shutdown_timeout_secs", DEFAULT_SHUTDOWN_TIMEOUT_SECS)?;
        Ok(Self {
            logging: config.get("gateway.logging")?,
            manifests,
            shutdown_timeout: Duration::from_secs(secs),
        })
    }
}
