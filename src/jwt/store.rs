// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The validating key store.
//!
//! Keys are partitioned into a static set, built once from the manifest, and
//! one set per JWKS URL (`jku`).  A refresh downloads the document and swaps
//! the whole set for that URL under the write lock; a failed refresh leaves
//! the previous set in place.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

use super::keys::ValidatingKey;
use crate::error::{ErrorKind, GatewayError};
use crate::pipeline::RoundTripper;
use crate::{debug_fmt, warn_fmt};

type KeySet = Arc<Vec<Arc<ValidatingKey>>>;

#[derive(Debug)]
pub struct ValidatingKeyStore {
    static_keys: Vec<Arc<ValidatingKey>>,
    by_jku: RwLock<HashMap<String, KeySet>>,
    transport: Arc<dyn RoundTripper>,
}

fn refresh_failed(jku: &str, description: impl Into<String>) -> GatewayError {
    GatewayError::new(ErrorKind::RefreshFailed, description)
        .with_package("gatehouse::jwt")
        .with_context(format!("refreshing validating keys from {jku}"))
}

impl ValidatingKeyStore {
    pub fn new(static_keys: Vec<ValidatingKey>, transport: Arc<dyn RoundTripper>) -> Self {
        Self {
            static_keys: static_keys.into_iter().map(Arc::new).collect(),
            by_jku: RwLock::new(HashMap::new()),
            transport,
        }
    }

    pub fn static_keys(&self) -> &[Arc<ValidatingKey>] {
        &self.static_keys
    }

    fn jku_set(&self, jku: &str) -> Option<KeySet> {
        self.by_jku.read().ok()?.get(jku).cloned()
    }

    /// JWKS URLs with a fetched key set.
    pub fn known_jkus(&self) -> Vec<String> {
        let mut jkus: Vec<String> = self
            .by_jku
            .read()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        jkus.sort();
        jkus
    }

    /// Keys with `kid`: static ones first, then those fetched from `jku`.
    pub fn lookup(&self, kid: &str, jku: Option<&str>) -> Vec<Arc<ValidatingKey>> {
        let mut keys: Vec<Arc<ValidatingKey>> = self
            .static_keys
            .iter()
            .filter(|k| k.kid() == Some(kid))
            .cloned()
            .collect();
        if let Some(set) = jku.and_then(|j| self.jku_set(j)) {
            keys.extend(set.iter().filter(|k| k.kid() == Some(kid)).cloned());
        }
        keys
    }

    /// Keys without a `kid`: static ones first, then those fetched from `jku`.
    pub fn anonymous(&self, jku: Option<&str>) -> Vec<Arc<ValidatingKey>> {
        let mut keys: Vec<Arc<ValidatingKey>> = self.static_keys.iter().filter(|k| k.kid().is_none()).cloned().collect();
        if let Some(set) = jku.and_then(|j| self.jku_set(j)) {
            keys.extend(set.iter().filter(|k| k.kid().is_none()).cloned());
        }
        keys
    }

    /// Fetch the JWKS at `jku` and replace its key set. Returns the number
    /// of usable keys.
    pub async fn refresh(&self, jku: &str, cancel: &CancellationToken) -> Result<usize, GatewayError> {
        let request = reqwest::Client::new()
            .get(jku)
            .header(reqwest::header::ACCEPT, "application/json")
            .build()
            .map_err(|e| refresh_failed(jku, "invalid JWKS URL").with_cause(e))?;

        let fetch = async {
            let response = self.transport.round_trip(request).await?;
            if !response.status().is_success() {
                return Err(refresh_failed(jku, format!("JWKS endpoint returned {}", response.status())));
            }
            response
                .json::<Value>()
                .await
                .map_err(|e| refresh_failed(jku, "JWKS response is not JSON").with_cause(e))
        };
        let document = tokio::select! {
            _ = cancel.cancelled() => return Err(refresh_failed(jku, "cancelled")),
            result = fetch => result.map_err(|e| match e.kind() {
                ErrorKind::RefreshFailed => e,
                _ => refresh_failed(jku, "JWKS request failed").with_cause(e),
            })?,
        };

        let entries = document
            .get("keys")
            .and_then(Value::as_array)
            .ok_or_else(|| refresh_failed(jku, "JWKS document has no keys array"))?;
        let mut keys = Vec::with_capacity(entries.len());
        for entry in entries {
            match ValidatingKey::from_jwk(entry, jku) {
                Ok(Some(key)) => keys.push(Arc::new(key)),
                Ok(None) => {}
                Err(e) => warn_fmt!("ValidatingKeyStore", "Skipping JWK from {}: {}", jku, e),
            }
        }

        let count = keys.len();
        let mut map = self
            .by_jku
            .write()
            .map_err(|_| refresh_failed(jku, "key store lock poisoned"))?;
        map.insert(jku.to_string(), Arc::new(keys));
        debug_fmt!("ValidatingKeyStore", "Loaded {} key(s) from {}", count, jku);
        Ok(count)
    }
}
