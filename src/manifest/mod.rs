// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Manifest objects and their schema.
//!
//! A manifest is a stream of YAML or JSON documents.  Each document is parsed
//! into a [`RawObject`] (unknown top-level fields rejected), then its `spec`
//! is decoded into the typed [`KindSpec`] for its kind and checked with
//! [`Validate`].  Only fully-validated [`ManifestObject`]s reach the container.

pub mod kinds;
pub mod validate;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;

use crate::error::{ErrorKind, GatewayError};

pub use kinds::*;
pub use validate::{DurationSpec, Validate, Violation, Violations};

pub const CORE_V1: &str = "core/v1";
pub const APP_V1: &str = "app/v1";

fn default_name() -> String {
    "default".to_string()
}

/// The unique name of an object: `(apiVersion, kind, namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Reference {
    pub api_version: String,
    pub kind: String,
    #[serde(default = "default_name")]
    pub namespace: String,
    #[serde(default = "default_name")]
    pub name: String,
}

/// Objects and references share one shape.
pub type Identity = Reference;

impl Reference {
    pub fn new(api_version: &str, kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// `(kind, namespace, name)`, which is unique within a process.
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.api_version, self.kind, self.namespace, self.name)
    }
}

impl Validate for Reference {
    fn validate(&self, path: &str, violations: &mut Violations) {
        violations.check(
            !self.api_version.is_empty(),
            validate::field(path, "apiVersion"),
            "must not be empty",
        );
        violations.check(!self.kind.is_empty(), validate::field(path, "kind"), "must not be empty");
        violations.check(
            !self.namespace.is_empty(),
            validate::field(path, "namespace"),
            "must not be empty",
        );
        violations.check(!self.name.is_empty(), validate::field(path, "name"), "must not be empty");
    }
}

/// Uniqueness key of an object inside one container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Metadata {
    #[serde(default = "default_name")]
    pub namespace: String,
    #[serde(default = "default_name")]
    pub name: String,
    /// Overrides the logger used by this object.
    #[serde(default)]
    pub logger: Option<Reference>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            namespace: default_name(),
            name: default_name(),
            logger: None,
        }
    }
}

/// One manifest document before its spec is typed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawObject {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub spec: Value,
}

/// A validated object with fully-defaulted spec.
#[derive(Debug, Clone)]
pub struct ManifestObject {
    pub identity: Identity,
    pub metadata: Metadata,
    pub spec: KindSpec,
}

impl ManifestObject {
    pub fn kind(&self) -> &str {
        &self.identity.kind
    }

    /// Every identity this object consumes, including its logger.
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        if let Some(logger) = &self.metadata.logger {
            refs.push(logger);
        }
        refs.extend(self.spec.references());
        refs
    }
}

/// Validate one raw document into a typed object.
pub fn validate(raw: RawObject) -> Result<ManifestObject, GatewayError> {
    let identity = Reference::new(&raw.api_version, &raw.kind, &raw.metadata.namespace, &raw.metadata.name);

    let mut violations = Violations::new();
    identity.validate("", &mut violations);
    raw.metadata.logger.validate("metadata.logger", &mut violations);
    violations.into_result(&identity.to_string())?;

    let spec = KindSpec::decode(&raw.api_version, &raw.kind, raw.spec)
        .map_err(|e| e.with_context(format!("invalid object {identity}")))?;

    let mut violations = Violations::new();
    spec.validate("spec", &mut violations);
    violations.into_result(&identity.to_string())?;

    Ok(ManifestObject {
        identity,
        metadata: raw.metadata,
        spec,
    })
}

/// Parse a YAML (or JSON, which is a YAML subset) stream of documents.
///
/// Every document is validated; all failures are reported together.
pub fn parse_documents(text: &str) -> Result<Vec<ManifestObject>, GatewayError> {
    let mut objects = Vec::new();
    let mut failures = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = match Value::deserialize(document) {
            Ok(Value::Null) => continue,
            Ok(v) => v,
            Err(e) => {
                failures.push(format!("document {index}: {e}"));
                continue;
            }
        };
        let raw: RawObject = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                failures.push(format!("document {index}: {e}"));
                continue;
            }
        };
        match validate(raw) {
            Ok(object) => objects.push(object),
            Err(e) => failures.push(format!("document {index}: {e}")),
        }
    }

    if failures.is_empty() {
        Ok(objects)
    } else {
        Err(GatewayError::new(ErrorKind::ManifestInvalid, "manifest rejected").with_detail(failures.join("; ")))
    }
}

/// Read and parse a manifest file.
pub fn load_file(path: impl AsRef<Path>) -> Result<Vec<ManifestObject>, GatewayError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        GatewayError::wrap(
            ErrorKind::ManifestInvalid,
            format!("cannot read manifest {}", path.display()),
            e,
        )
    })?;
    parse_documents(&text).map_err(|e| e.with_context(format!("manifest {}", path.display())))
}
