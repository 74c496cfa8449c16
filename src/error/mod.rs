// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error taxonomy shared by every subsystem.
//!
//! A single [`GatewayError`] value travels from factories, key stores and
//! policy evaluation up to the HTTP surface, where an [`ErrorHandler`] maps
//! its [`ErrorKind`] to a status code and renders a negotiated body.

mod handler;


pub use handler::{ErrorFormat, ErrorHandler, ErrorHandlerFactory};

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Stable error labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ManifestInvalid,
    UnknownKind,
    DuplicateIdentity,
    CyclicReference,
    ReferenceUnresolved,
    TypeMismatch,
    KeyParse,
    InvalidAlgorithm,
    NoSigningKey,
    KeyNotFound,
    RefreshFailed,
    PolicyCompile,
    PolicyEvalFailure,
    Forbidden,
    Unauthorized,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    Timeout,
    Upstream,
    Internal,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 21] = [
        ErrorKind::ManifestInvalid,
        ErrorKind::UnknownKind,
        ErrorKind::DuplicateIdentity,
        ErrorKind::CyclicReference,
        ErrorKind::ReferenceUnresolved,
        ErrorKind::TypeMismatch,
        ErrorKind::KeyParse,
        ErrorKind::InvalidAlgorithm,
        ErrorKind::NoSigningKey,
        ErrorKind::KeyNotFound,
        ErrorKind::RefreshFailed,
        ErrorKind::PolicyCompile,
        ErrorKind::PolicyEvalFailure,
        ErrorKind::Forbidden,
        ErrorKind::Unauthorized,
        ErrorKind::BadRequest,
        ErrorKind::NotFound,
        ErrorKind::MethodNotAllowed,
        ErrorKind::Timeout,
        ErrorKind::Upstream,
        ErrorKind::Internal,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::ManifestInvalid => "ManifestInvalid",
            ErrorKind::UnknownKind => "UnknownKind",
            ErrorKind::DuplicateIdentity => "DuplicateIdentity",
            ErrorKind::CyclicReference => "CyclicReference",
            ErrorKind::ReferenceUnresolved => "ReferenceUnresolved",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::KeyParse => "KeyParse",
            ErrorKind::InvalidAlgorithm => "InvalidAlgorithm",
            ErrorKind::NoSigningKey => "NoSigningKey",
            ErrorKind::KeyNotFound => "KeyNotFound",
            ErrorKind::RefreshFailed => "RefreshFailed",
            ErrorKind::PolicyCompile => "PolicyCompile",
            ErrorKind::PolicyEvalFailure => "PolicyEvalFailure",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::MethodNotAllowed => "MethodNotAllowed",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Upstream => "Upstream",
            ErrorKind::Internal => "Internal",
        }
    }

    /// Default HTTP status for this kind.
    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::BadRequest | ErrorKind::InvalidAlgorithm => 400,
            ErrorKind::Unauthorized | ErrorKind::KeyNotFound => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::MethodNotAllowed => 405,
            ErrorKind::Upstream | ErrorKind::RefreshFailed => 502,
            ErrorKind::Timeout => 504,
            _ => 500,
        }
    }

    /// Whether a caller with an explicit retry policy may retry this kind.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Upstream | ErrorKind::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ErrorKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorKind::ALL
            .iter()
            .copied()
            .find(|k| k.label() == s)
            .ok_or_else(|| GatewayError::new(ErrorKind::ManifestInvalid, format!("unknown error kind '{s}'")))
    }
}

/// The single error value used across the gateway.
///
/// `context` holds the identities that were being constructed when the error
/// surfaced, outermost first; it is the construction stack rendered as
/// `failed to create <identity>: caused by ...`.
#[derive(Debug)]
pub struct GatewayError {
    package: &'static str,
    kind: ErrorKind,
    description: String,
    detail: Option<String>,
    context: Vec<String>,
    headers: Vec<(String, String)>,
    cause: Option<Box<dyn StdError + Send + Sync>>,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            package: "gatehouse",
            kind,
            description: description.into(),
            detail: None,
            context: Vec::new(),
            headers: Vec::new(),
            cause: None,
        }
    }

    /// Wrap an underlying error as the cause of a new gateway error.
    pub fn wrap<E>(kind: ErrorKind, description: impl Into<String>, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::new(kind, description).with_cause(cause)
    }

    pub fn with_package(mut self, package: &'static str) -> Self {
        self.package = package;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Attach a response header, e.g. `WWW-Authenticate` on challenges.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Prepend the identity whose construction failed.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.insert(0, context.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn package(&self) -> &str {
        self.package
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn context(&self) -> &[String] {
        &self.context
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn status(&self) -> u16 {
        self.kind.status()
    }

    pub fn forbidden() -> Self {
        Self::new(ErrorKind::Forbidden, "access denied")
    }

    pub fn unauthorized(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, description)
    }

    pub fn bad_request(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, description)
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, description)
    }

    pub fn manifest(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::ManifestInvalid, description)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(ErrorKind::Timeout, format!("timed out after {after:?}"))
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ctx in &self.context {
            write!(f, "{ctx}: caused by ")?;
        }
        write!(f, "{}: {} [{}]", self.package, self.description, self.kind)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl StdError for GatewayError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        let kind = if err.kind() == std::io::ErrorKind::TimedOut {
            ErrorKind::Timeout
        } else {
            ErrorKind::Internal
        };
        GatewayError::wrap(kind, "I/O failure", err)
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else {
            ErrorKind::Upstream
        };
        GatewayError::wrap(kind, "upstream request failed", err)
    }
}

impl From<crate::config::ConfigError> for GatewayError {
    fn from(err: crate::config::ConfigError) -> Self {
        GatewayError::wrap(ErrorKind::ManifestInvalid, "configuration error", err)
    }
}
