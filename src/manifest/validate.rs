// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structural and semantic checks applied to typed specs before any factory
//! sees them.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

use crate::error::{ErrorKind, GatewayError};

/// Key names usable as XML element or attribute names.
pub static XML_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z:._|/#@][a-zA-Z0-9_.-]*$").expect("static regex"));

/// HTTP header field names (RFC 9110 token).
pub static HEADER_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[!#$%&'*+.^_`|~0-9A-Za-z-]+$").expect("static regex"));

/// A single constraint failure, addressed by a dotted path into the object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Accumulates every violation found in one object.
#[derive(Debug, Default)]
pub struct Violations {
    items: Vec<Violation>,
}

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.items.push(Violation {
            path: path.into(),
            message: message.into(),
        });
    }

    /// Record a violation when `ok` is false.
    pub fn check(&mut self, ok: bool, path: impl Into<String>, message: impl Into<String>) {
        if !ok {
            self.push(path, message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.items.iter()
    }

    /// Turn collected violations into a `ManifestInvalid` error.
    pub fn into_result(self, subject: &str) -> Result<(), GatewayError> {
        if self.items.is_empty() {
            return Ok(());
        }
        let detail = self
            .items
            .iter()
            .map(Violation::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(GatewayError::new(
            ErrorKind::ManifestInvalid,
            format!("{} has {} invalid field(s)", subject, self.items.len()),
        )
        .with_detail(detail))
    }
}

/// Implemented by every spec type.
pub trait Validate {
    /// Push every violation under `path`.
    fn validate(&self, path: &str, violations: &mut Violations);
}

impl<T: Validate> Validate for Option<T> {
    fn validate(&self, path: &str, violations: &mut Violations) {
        if let Some(inner) = self {
            inner.validate(path, violations);
        }
    }
}

impl<T: Validate> Validate for Vec<T> {
    fn validate(&self, path: &str, violations: &mut Violations) {
        for (i, item) in self.iter().enumerate() {
            item.validate(&format!("{path}[{i}]"), violations);
        }
    }
}

/// Join a parent path and a field name.
pub fn field(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

/// A duration written as a number followed by a unit (`ms`, `s`, `m`, `h`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct DurationSpec(pub Duration);

impl DurationSpec {
    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Parse `500ms`, `2s`, `1m`, `1h` or a bare number of seconds.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
        let (number, unit) = raw.split_at(split);
        let value: u64 = number
            .parse()
            .map_err(|_| format!("invalid duration '{raw}'"))?;
        let duration = match unit {
            "ms" => Duration::from_millis(value),
            "" | "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            other => return Err(format!("unknown duration unit '{other}' in '{raw}'")),
        };
        Ok(Self(duration))
    }
}

impl fmt::Display for DurationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.0.as_millis();
        if ms % 1000 != 0 {
            write!(f, "{ms}ms")
        } else {
            write!(f, "{}s", ms / 1000)
        }
    }
}

impl Serialize for DurationSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DurationSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Secs(u64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => DurationSpec::parse(&s).map_err(serde::de::Error::custom),
            Raw::Secs(n) => Ok(DurationSpec::from_secs(n)),
        }
    }
}
