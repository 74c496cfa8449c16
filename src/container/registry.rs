// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Factory registry.
//!
//! Maps `(apiVersion, kind)` to the factory that builds it.  A process-wide
//! instance backs [`Container::new`](super::Container::new); tests build
//! isolated registries instead.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use super::{Component, Resolver};
use crate::error::{ErrorKind, GatewayError};
use crate::manifest::ManifestObject;
use crate::{debug_fmt, warn_fmt};

/// Builds one kind of object.
#[async_trait]
pub trait Factory: fmt::Debug + Send + Sync {
    fn api_version(&self) -> &'static str;

    fn kind(&self) -> &'static str;

    /// Build the object, resolving dependencies through `resolver`.
    async fn create(&self, resolver: &Resolver<'_>, object: &ManifestObject) -> Result<Component, GatewayError>;
}

static GLOBAL_REGISTRY: Lazy<Arc<FactoryRegistry>> = Lazy::new(|| Arc::new(FactoryRegistry::new()));

#[derive(Default)]
pub struct FactoryRegistry {
    factories: RwLock<HashMap<(String, String), Arc<dyn Factory>>>,
}

impl fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds = self.kinds();
        f.debug_struct("FactoryRegistry").field("kinds", &kinds).finish()
    }
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Arc<FactoryRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    /// Register a factory under its `(apiVersion, kind)`; a later
    /// registration for the same kind replaces the earlier one.
    pub fn register(&self, factory: Arc<dyn Factory>) {
        let key = (factory.api_version().to_string(), factory.kind().to_string());
        match self.factories.write() {
            Ok(mut map) => {
                if map.insert(key.clone(), factory).is_some() {
                    debug_fmt!("FactoryRegistry", "Replaced factory for {}/{}", key.0, key.1);
                }
            }
            Err(e) => warn_fmt!("FactoryRegistry", "Failed to register factory for {}/{}: {}", key.0, key.1, e),
        }
    }

    /// Remove a kind; returns whether it was registered.
    pub fn unregister(&self, api_version: &str, kind: &str) -> bool {
        self.factories
            .write()
            .map(|mut map| map.remove(&(api_version.to_string(), kind.to_string())).is_some())
            .unwrap_or(false)
    }

    pub fn contains(&self, api_version: &str, kind: &str) -> bool {
        self.factories
            .read()
            .map(|map| map.contains_key(&(api_version.to_string(), kind.to_string())))
            .unwrap_or(false)
    }

    pub fn get(&self, api_version: &str, kind: &str) -> Result<Arc<dyn Factory>, GatewayError> {
        let map = self
            .factories
            .read()
            .map_err(|_| GatewayError::internal("factory registry poisoned"))?;
        map.get(&(api_version.to_string(), kind.to_string()))
            .cloned()
            .ok_or_else(|| {
                GatewayError::new(
                    ErrorKind::UnknownKind,
                    format!("no factory registered for {api_version} {kind}"),
                )
            })
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .factories
            .read()
            .map(|map| map.keys().map(|(v, k)| format!("{v}/{k}")).collect())
            .unwrap_or_default();
        kinds.sort();
        kinds
    }
}
