// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed specs for every recognized kind.
//!
//! Defaults are materialized by serde so factories always see complete specs.
//! Unknown fields are rejected for every kind.

use base64::Engine;
use base64::engine::general_purpose;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use super::validate::{DurationSpec, HEADER_NAME_PATTERN, Validate, Violations, XML_KEY_PATTERN, field};
use super::{APP_V1, CORE_V1, Reference};
use crate::codec::IdEncoding;
use crate::error::{ErrorKind, GatewayError};
use crate::pipeline::HttpMethod;

pub const KIND_LOGGER: &str = "Logger";
pub const KIND_ERROR_HANDLER: &str = "ErrorHandler";
pub const KIND_HTTP_SERVER: &str = "HTTPServer";
pub const KIND_HTTP_CLIENT: &str = "HTTPClient";
pub const KIND_BASIC_AUTHN: &str = "BasicAuthnMiddleware";
pub const KIND_DIGEST_AUTHN: &str = "DigestAuthnMiddleware";
pub const KIND_BEARER_AUTHN: &str = "BearerAuthnMiddleware";
pub const KIND_CORS: &str = "CORSMiddleware";
pub const KIND_SOAP_REST: &str = "SOAPRESTMiddleware";
pub const KIND_TRACKING: &str = "TrackingMiddleware";
pub const KIND_SKIPPER: &str = "Skipper";
pub const KIND_OPA_AUTHZ: &str = "OPAAuthzMiddleware";
pub const KIND_ECHO_HANDLER: &str = "EchoHandler";
pub const KIND_PROMETHEUS_METER: &str = "PrometheusMeter";
pub const KIND_REDIS_CLIENT: &str = "RedisClient";
pub const KIND_JWT_HANDLER: &str = "JWTHandler";

fn default_true() -> bool {
    true
}

fn default_claims_key() -> String {
    "AuthnClaims".to_string()
}

fn default_realm() -> String {
    "default".to_string()
}

fn is_http_url(raw: &str) -> bool {
    raw.starts_with("http://") || raw.starts_with("https://")
}

fn check_header_name(name: &Option<String>, path: String, violations: &mut Violations) {
    if let Some(name) = name {
        violations.check(HEADER_NAME_PATTERN.is_match(name), path, format!("'{name}' is not a valid header name"));
    }
}

fn check_base64(raw: &str, path: String, violations: &mut Violations) -> Option<Vec<u8>> {
    match general_purpose::STANDARD.decode(raw) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            violations.push(path, format!("invalid base64: {e}"));
            None
        }
    }
}

// ---------------------------------------------------------------------------
// core/v1
// ---------------------------------------------------------------------------

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoggerSpec {
    #[serde(default = "default_level")]
    pub level: String,
    /// Log target; defaults to `gatehouse::<namespace>::<name>`.
    #[serde(default)]
    pub target: Option<String>,
}

impl Validate for LoggerSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        violations.check(
            crate::logging::parse_level(&self.level).is_some(),
            field(path, "level"),
            format!("unknown level '{}'", self.level),
        );
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ErrorHandlerSpec {
    /// Error kind label to HTTP status.
    #[serde(default)]
    pub status_overrides: BTreeMap<String, u16>,
}

impl Validate for ErrorHandlerSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        for (kind, status) in &self.status_overrides {
            let p = field(&field(path, "statusOverrides"), kind);
            violations.check(ErrorKind::from_str(kind).is_ok(), p.clone(), "unknown error kind");
            violations.check((100..=599).contains(status), p, format!("status {status} out of range"));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HandlerBinding {
    pub handler: Reference,
    /// Middleware applied after the server-wide chain.
    #[serde(default)]
    pub middleware: Vec<Reference>,
}

impl Validate for HandlerBinding {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.handler.validate(&field(path, "handler"), violations);
        self.middleware.validate(&field(path, "middleware"), violations);
    }
}

fn default_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_timeout() -> DurationSpec {
    DurationSpec::from_secs(30)
}

fn default_body_limit() -> usize {
    5 * 1024 * 1024 // 5MB
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpServerSpec {
    #[serde(default = "default_addr")]
    pub addr: String,
    #[serde(default)]
    pub error_handler: Option<Reference>,
    /// Server-wide middleware, outermost first.
    #[serde(default)]
    pub middleware: Vec<Reference>,
    #[serde(default)]
    pub handlers: Vec<HandlerBinding>,
    #[serde(default)]
    pub read_timeout: Option<DurationSpec>,
    #[serde(default)]
    pub write_timeout: Option<DurationSpec>,
    #[serde(default)]
    pub idle_timeout: Option<DurationSpec>,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: DurationSpec,
    #[serde(default = "default_body_limit")]
    pub max_body_size: usize,
    #[serde(default = "default_true", rename = "enableHTTP2")]
    pub enable_http2: bool,
    #[serde(default, rename = "enableHTTP3")]
    pub enable_http3: bool,
}

impl Validate for HttpServerSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        violations.check(
            self.addr.parse::<SocketAddr>().is_ok(),
            field(path, "addr"),
            format!("'{}' is not a socket address", self.addr),
        );
        self.error_handler.validate(&field(path, "errorHandler"), violations);
        self.middleware.validate(&field(path, "middleware"), violations);
        self.handlers.validate(&field(path, "handlers"), violations);
        violations.check(self.max_body_size > 0, field(path, "maxBodySize"), "must be positive");
        violations.check(
            !self.enable_http3,
            field(path, "enableHTTP3"),
            "HTTP/3 listeners are not supported by this build",
        );
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpClientSpec {
    /// Outbound interceptors, outermost first.
    #[serde(default)]
    pub tripperware: Vec<Reference>,
    #[serde(default)]
    pub connect_timeout: Option<DurationSpec>,
    #[serde(default)]
    pub request_timeout: Option<DurationSpec>,
    #[serde(default)]
    pub pool_idle_timeout: Option<DurationSpec>,
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Validate for HttpClientSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.tripperware.validate(&field(path, "tripperware"), violations);
    }
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PasswordCrypt {
    #[default]
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "SHA256")]
    Sha256,
    #[serde(rename = "SHA512")]
    Sha512,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommonKeyCryptType {
    #[default]
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "AESGCM")]
    AesGcm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EnvProviderSpec {
    pub username_prefix: String,
    pub password_prefix: String,
}

impl Validate for EnvProviderSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        violations.check(!self.username_prefix.is_empty(), field(path, "usernamePrefix"), "must not be empty");
        violations.check(!self.password_prefix.is_empty(), field(path, "passwordPrefix"), "must not be empty");
        violations.check(
            self.username_prefix != self.password_prefix,
            field(path, "passwordPrefix"),
            "must differ from usernamePrefix",
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileProviderSpec {
    /// Files of `user:password` lines.
    pub paths: Vec<String>,
}

impl Validate for FileProviderSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        violations.check(!self.paths.is_empty(), field(path, "paths"), "at least one path is required");
    }
}

/// Fields shared by the credential-checking middleware kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BasicAuthnSpec {
    #[serde(default)]
    pub logger: Option<Reference>,
    #[serde(default)]
    pub error_handler: Option<Reference>,
    #[serde(default = "default_claims_key")]
    pub claims_key: String,
    #[serde(default)]
    pub keep_credentials: bool,
    #[serde(default)]
    pub password_crypt: PasswordCrypt,
    #[serde(default)]
    pub common_key_crypt_type: CommonKeyCryptType,
    #[serde(default)]
    pub crypt_secret: Option<String>,
    #[serde(default = "default_realm")]
    pub realm: String,
    #[serde(default)]
    pub env_provider: Option<EnvProviderSpec>,
    #[serde(default)]
    pub file_provider: Option<FileProviderSpec>,
}

#[allow(clippy::too_many_arguments)]
fn validate_credentials(
    path: &str,
    claims_key: &str,
    realm: &str,
    crypt: CommonKeyCryptType,
    secret: &Option<String>,
    env: &Option<EnvProviderSpec>,
    file: &Option<FileProviderSpec>,
    violations: &mut Violations,
) {
    violations.check(!claims_key.is_empty(), field(path, "claimsKey"), "must not be empty");
    violations.check(!realm.contains('"'), field(path, "realm"), "must not contain '\"'");
    violations.check(
        env.is_some() || file.is_some(),
        field(path, "envProvider"),
        "at least one credential provider is required",
    );
    env.validate(&field(path, "envProvider"), violations);
    file.validate(&field(path, "fileProvider"), violations);
    match (crypt, secret) {
        (CommonKeyCryptType::AesGcm, None) => {
            violations.push(field(path, "cryptSecret"), "required when commonKeyCryptType is AESGCM")
        }
        (CommonKeyCryptType::AesGcm, Some(s)) => {
            if let Some(key) = check_base64(s, field(path, "cryptSecret"), violations) {
                violations.check(
                    matches!(key.len(), 16 | 32),
                    field(path, "cryptSecret"),
                    "must decode to 16 or 32 bytes",
                );
            }
        }
        _ => {}
    }
}

impl Validate for BasicAuthnSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.logger.validate(&field(path, "logger"), violations);
        self.error_handler.validate(&field(path, "errorHandler"), violations);
        validate_credentials(
            path,
            &self.claims_key,
            &self.realm,
            self.common_key_crypt_type,
            &self.crypt_secret,
            &self.env_provider,
            &self.file_provider,
            violations,
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    #[default]
    #[serde(rename = "MD5")]
    Md5,
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-512-256")]
    Sha512_256,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha512_256 => "SHA-512-256",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DigestAuthnSpec {
    #[serde(default)]
    pub logger: Option<Reference>,
    #[serde(default)]
    pub error_handler: Option<Reference>,
    #[serde(default = "default_claims_key")]
    pub claims_key: String,
    #[serde(default)]
    pub keep_credentials: bool,
    #[serde(default)]
    pub password_crypt: PasswordCrypt,
    #[serde(default)]
    pub common_key_crypt_type: CommonKeyCryptType,
    #[serde(default)]
    pub crypt_secret: Option<String>,
    #[serde(default = "default_realm")]
    pub realm: String,
    #[serde(default)]
    pub env_provider: Option<EnvProviderSpec>,
    #[serde(default)]
    pub file_provider: Option<FileProviderSpec>,
    #[serde(default)]
    pub algorithm: DigestAlgorithm,
}

impl Validate for DigestAuthnSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.logger.validate(&field(path, "logger"), violations);
        self.error_handler.validate(&field(path, "errorHandler"), violations);
        validate_credentials(
            path,
            &self.claims_key,
            &self.realm,
            self.common_key_crypt_type,
            &self.crypt_secret,
            &self.env_provider,
            &self.file_provider,
            violations,
        );
        // Digest needs the stored secret to recompute HA1.
        violations.check(
            self.password_crypt == PasswordCrypt::None,
            field(path, "passwordCrypt"),
            "digest authentication requires passwordCrypt NONE",
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BearerAuthnSpec {
    #[serde(default)]
    pub logger: Option<Reference>,
    #[serde(default)]
    pub error_handler: Option<Reference>,
    pub jwt_handler: Reference,
    #[serde(default = "default_claims_key")]
    pub claims_key: String,
    #[serde(default)]
    pub keep_credentials: bool,
    #[serde(default = "default_realm")]
    pub realm: String,
    #[serde(default)]
    pub issuers: Vec<String>,
    #[serde(default)]
    pub audiences: Vec<String>,
    #[serde(default)]
    pub required_claims: Vec<String>,
    #[serde(default)]
    pub leeway: DurationSpec,
}

impl Validate for BearerAuthnSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.logger.validate(&field(path, "logger"), violations);
        self.error_handler.validate(&field(path, "errorHandler"), violations);
        self.jwt_handler.validate(&field(path, "jwtHandler"), violations);
        violations.check(!self.claims_key.is_empty(), field(path, "claimsKey"), "must not be empty");
        violations.check(!self.realm.contains('"'), field(path, "realm"), "must not contain '\"'");
    }
}

// ---------------------------------------------------------------------------
// CORS and SOAP/REST (schema only)
// ---------------------------------------------------------------------------

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_cors_methods() -> Vec<HttpMethod> {
    vec![HttpMethod::Post, HttpMethod::Get, HttpMethod::Options]
}

fn default_cors_headers() -> Vec<String> {
    vec!["Content-Type".to_string(), "X-Requested-With".to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CorsPolicySpec {
    #[serde(default = "default_cors_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_cors_methods")]
    pub allowed_methods: Vec<HttpMethod>,
    #[serde(default = "default_cors_headers")]
    pub allowed_headers: Vec<String>,
    #[serde(default)]
    pub exposed_headers: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
    #[serde(default)]
    pub max_age: i64,
    #[serde(default)]
    pub embedder_policy: Option<String>,
    #[serde(default)]
    pub opener_policy: Option<String>,
    #[serde(default)]
    pub resource_policy: Option<String>,
    #[serde(default)]
    pub allow_private_network: bool,
    #[serde(default)]
    pub disable_wild_card_origin: bool,
}

impl Default for CorsPolicySpec {
    fn default() -> Self {
        Self {
            allowed_origins: default_cors_origins(),
            allowed_methods: default_cors_methods(),
            allowed_headers: default_cors_headers(),
            exposed_headers: Vec::new(),
            allow_credentials: false,
            max_age: 0,
            embedder_policy: None,
            opener_policy: None,
            resource_policy: None,
            allow_private_network: false,
            disable_wild_card_origin: false,
        }
    }
}

fn check_enum(value: &Option<String>, allowed: &[&str], path: String, violations: &mut Violations) {
    if let Some(v) = value {
        violations.check(
            allowed.contains(&v.as_str()),
            path,
            format!("'{v}' is not one of {}", allowed.join(", ")),
        );
    }
}

impl Validate for CorsPolicySpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        for (i, h) in self.allowed_headers.iter().chain(self.exposed_headers.iter()).enumerate() {
            violations.check(
                HEADER_NAME_PATTERN.is_match(h),
                format!("{}[{i}]", field(path, "headers")),
                format!("'{h}' is not a valid header name"),
            );
        }
        violations.check(self.max_age >= 0, field(path, "maxAge"), "must not be negative");
        violations.check(
            !(self.allow_credentials && self.allowed_origins.iter().any(|o| o == "*")),
            field(path, "allowedOrigins"),
            "wildcard origin cannot be combined with allowCredentials",
        );
        check_enum(
            &self.embedder_policy,
            &["unsafe-none", "require-corp", "credentialless"],
            field(path, "embedderPolicy"),
            violations,
        );
        check_enum(
            &self.opener_policy,
            &["unsafe-none", "same-origin-allow-popups", "same-origin", "noopener-allow-popups"],
            field(path, "openerPolicy"),
            violations,
        );
        check_enum(
            &self.resource_policy,
            &["same-site", "same-origin", "cross-origin"],
            field(path, "resourcePolicy"),
            violations,
        );
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CorsSpec {
    #[serde(default)]
    pub error_handler: Option<Reference>,
    #[serde(default, rename = "corsPolicy")]
    pub cors_policy: CorsPolicySpec,
}

impl Validate for CorsSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.error_handler.validate(&field(path, "errorHandler"), violations);
        self.cors_policy.validate(&field(path, "corsPolicy"), violations);
    }
}

fn default_attribute_key() -> String {
    "@attribute".to_string()
}

fn default_text_key() -> String {
    "#text".to_string()
}

fn default_namespace_key() -> String {
    "_namespace".to_string()
}

fn default_array_key() -> String {
    "item".to_string()
}

fn default_separator() -> String {
    ":".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SoapRestSpec {
    pub matcher: MatcherSpec,
    #[serde(default)]
    pub error_handler: Option<Reference>,
    #[serde(default = "default_attribute_key")]
    pub attribute_key: String,
    #[serde(default = "default_text_key")]
    pub text_key: String,
    #[serde(default = "default_namespace_key")]
    pub namespace_key: String,
    #[serde(default = "default_array_key")]
    pub array_key: String,
    #[serde(default = "default_separator")]
    pub separator_char: String,
    #[serde(default)]
    pub extract_string_element: bool,
    #[serde(default)]
    pub extract_boolean_element: bool,
    #[serde(default)]
    pub extract_integer_element: bool,
    #[serde(default)]
    pub extract_float_element: bool,
}

impl Validate for SoapRestSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.matcher.validate(&field(path, "matcher"), violations);
        self.error_handler.validate(&field(path, "errorHandler"), violations);
        for (name, value) in [
            ("attributeKey", &self.attribute_key),
            ("textKey", &self.text_key),
            ("namespaceKey", &self.namespace_key),
            ("arrayKey", &self.array_key),
        ] {
            violations.check(
                XML_KEY_PATTERN.is_match(value),
                field(path, name),
                format!("'{value}' is not a valid XML key name"),
            );
        }
        violations.check(
            self.separator_char.chars().count() == 1,
            field(path, "separatorChar"),
            "must be a single character",
        );
    }
}

// ---------------------------------------------------------------------------
// Pipeline elements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TrackingSpec {
    #[serde(default)]
    pub error_handler: Option<Reference>,
    #[serde(default)]
    pub encoding: IdEncoding,
    #[serde(default, rename = "requestIDProxyName")]
    pub request_id_proxy_name: Option<String>,
    #[serde(default, rename = "traceIDProxyName")]
    pub trace_id_proxy_name: Option<String>,
    #[serde(default, rename = "traceIDExtractName")]
    pub trace_id_extract_name: Option<String>,
}

impl Validate for TrackingSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.error_handler.validate(&field(path, "errorHandler"), violations);
        check_header_name(&self.request_id_proxy_name, field(path, "requestIDProxyName"), violations);
        check_header_name(&self.trace_id_proxy_name, field(path, "traceIDProxyName"), violations);
        check_header_name(&self.trace_id_extract_name, field(path, "traceIDExtractName"), violations);
    }
}

/// How a matcher compares request paths with its patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatchType {
    Exact,
    #[default]
    Prefix,
    Suffix,
    Contains,
    Path,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MatcherSpec {
    #[serde(default)]
    pub match_type: MatchType,
    pub patterns: Vec<String>,
}

impl Validate for MatcherSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        violations.check(!self.patterns.is_empty(), field(path, "patterns"), "at least one pattern is required");
        for (i, pattern) in self.patterns.iter().enumerate() {
            let p = format!("{}[{i}]", field(path, "patterns"));
            match self.match_type {
                MatchType::Regex => {
                    if let Err(e) = Regex::new(pattern) {
                        violations.push(p, format!("invalid regex: {e}"));
                    }
                }
                MatchType::Path => violations.check(pattern.starts_with('/'), p, "path patterns must start with '/'"),
                _ => violations.check(!pattern.is_empty(), p, "must not be empty"),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SkipConditionSpec {
    pub matcher: MatcherSpec,
    /// Restrict the condition to these methods; empty means any.
    #[serde(default)]
    pub methods: Vec<HttpMethod>,
}

impl Validate for SkipConditionSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.matcher.validate(&field(path, "matcher"), violations);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SkipperSpec {
    pub skip_conditions: Vec<SkipConditionSpec>,
    #[serde(default)]
    pub middleware: Vec<Reference>,
    #[serde(default)]
    pub tripperware: Vec<Reference>,
}

impl Validate for SkipperSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        violations.check(
            !self.skip_conditions.is_empty(),
            field(path, "skipConditions"),
            "at least one condition is required",
        );
        self.skip_conditions.validate(&field(path, "skipConditions"), violations);
        violations.check(
            !(self.middleware.is_empty() && self.tripperware.is_empty()),
            field(path, "middleware"),
            "a skipper must wrap middleware or tripperware",
        );
        self.middleware.validate(&field(path, "middleware"), violations);
        self.tripperware.validate(&field(path, "tripperware"), violations);
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RoutesSpec {
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Allowed methods; empty means any.
    #[serde(default)]
    pub methods: Vec<HttpMethod>,
}

impl Validate for RoutesSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        violations.check(!self.patterns.is_empty(), field(path, "patterns"), "at least one pattern is required");
        for (i, pattern) in self.patterns.iter().enumerate() {
            violations.check(
                pattern.starts_with('/'),
                format!("{}[{i}]", field(path, "patterns")),
                "must start with '/'",
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

fn default_bundle_key_alg() -> String {
    "RS256".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BundleKeySpec {
    #[serde(rename = "keyID")]
    pub key_id: String,
    #[serde(default = "default_bundle_key_alg")]
    pub algorithm: String,
    #[serde(default)]
    pub scope: Option<String>,
    /// PEM public key, or the shared secret for HS algorithms.
    pub pem: String,
}

impl Validate for BundleKeySpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        violations.check(!self.key_id.is_empty(), field(path, "keyID"), "must not be empty");
        violations.check(
            SigningAlgorithm::from_str(&self.algorithm).is_ok_and(|a| a != SigningAlgorithm::None),
            field(path, "algorithm"),
            format!("unsupported bundle signing algorithm '{}'", self.algorithm),
        );
        violations.check(!self.pem.is_empty(), field(path, "pem"), "must not be empty");
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BundleVerificationSpec {
    #[serde(rename = "keyID")]
    pub key_id: String,
    pub keys: Vec<BundleKeySpec>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Paths, or `*`/`**` globs, left out of the signature.
    #[serde(default)]
    pub excludes: Vec<String>,
}

impl Validate for BundleVerificationSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        violations.check(!self.keys.is_empty(), field(path, "keys"), "at least one key is required");
        self.keys.validate(&field(path, "keys"), violations);
        violations.check(
            self.keys.iter().any(|k| k.key_id == self.key_id),
            field(path, "keyID"),
            format!("key '{}' is not listed in keys", self.key_id),
        );
    }
}

fn check_storage_path(raw: &str, path: String, violations: &mut Violations) {
    violations.check(
        raw.starts_with('/') && raw.len() > 1 && !raw.ends_with('/'),
        path,
        format!("storage path '{raw}' must look like /a/b"),
    );
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileStoreSpec {
    /// Persist to a disk-backed store under this directory; memory when empty.
    #[serde(default)]
    pub directory: Option<String>,
    /// Storage path to file path.
    pub files: BTreeMap<String, String>,
}

impl Validate for FileStoreSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        for (storage, file) in &self.files {
            let p = field(&field(path, "files"), storage);
            check_storage_path(storage, p.clone(), violations);
            let supported = [".json", ".yaml", ".yml", ".csv"].iter().any(|ext| file.ends_with(ext));
            violations.check(supported, p, format!("unsupported data file '{file}'"));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpStoreSpec {
    #[serde(default)]
    pub directory: Option<String>,
    /// Storage path to endpoint URL.
    pub endpoints: BTreeMap<String, String>,
    #[serde(default)]
    pub round_tripper: Option<Reference>,
    #[serde(default)]
    pub header: BTreeMap<String, String>,
}

impl Validate for HttpStoreSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        for (storage, url) in &self.endpoints {
            let p = field(&field(path, "endpoints"), storage);
            check_storage_path(storage, p.clone(), violations);
            violations.check(is_http_url(url), p, format!("'{url}' is not an http(s) URL"));
        }
        self.round_tripper.validate(&field(path, "roundTripper"), violations);
        for name in self.header.keys() {
            check_header_name(&Some(name.clone()), field(path, "header"), violations);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegoSpec {
    /// Query such as `data.example.authz.allow`.
    pub query_parameter: String,
    #[serde(default)]
    pub policy_files: Vec<String>,
    #[serde(default)]
    pub bundle_paths: Vec<String>,
    #[serde(default)]
    pub bundle_verification: Option<BundleVerificationSpec>,
    #[serde(default)]
    pub skip_bundle_verification: bool,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub strict_builtin_errors: bool,
    #[serde(default)]
    pub shallow_inlining: bool,
    #[serde(default)]
    pub enable_print_statements: bool,
    #[serde(default)]
    pub file_store: Option<FileStoreSpec>,
    #[serde(default)]
    pub http_store: Option<HttpStoreSpec>,
    /// Client used to download remote bundles.
    #[serde(default)]
    pub round_tripper: Option<Reference>,
    /// Extra headers sent when downloading remote bundles.
    #[serde(default)]
    pub header: BTreeMap<String, String>,
}

impl Validate for RegoSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        violations.check(
            self.query_parameter.starts_with("data."),
            field(path, "queryParameter"),
            "query must reference data.<package>.<rule>",
        );
        violations.check(
            !(self.policy_files.is_empty() && self.bundle_paths.is_empty()),
            field(path, "policyFiles"),
            "policyFiles or bundlePaths is required",
        );
        self.bundle_verification.validate(&field(path, "bundleVerification"), violations);
        violations.check(
            !(self.file_store.is_some() && self.http_store.is_some()),
            field(path, "httpStore"),
            "only one data store may be configured",
        );
        self.file_store.validate(&field(path, "fileStore"), violations);
        self.http_store.validate(&field(path, "httpStore"), violations);
        self.round_tripper.validate(&field(path, "roundTripper"), violations);
        for name in self.header.keys() {
            check_header_name(&Some(name.clone()), field(path, "header"), violations);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EnvDataSpec {
    /// Environment variable names exposed as `input.env.vars`.
    #[serde(default)]
    pub vars: Vec<String>,
    #[serde(default, rename = "pid")]
    pub pid: bool,
    #[serde(default, rename = "ppid")]
    pub ppid: bool,
    #[serde(default, rename = "uid")]
    pub uid: bool,
    #[serde(default, rename = "gid")]
    pub gid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OpaAuthzSpec {
    #[serde(default)]
    pub logger: Option<Reference>,
    #[serde(default)]
    pub error_handler: Option<Reference>,
    #[serde(default = "default_claims_key")]
    pub claims_key: String,
    pub regos: Vec<RegoSpec>,
    #[serde(default)]
    pub env_data: EnvDataSpec,
    #[serde(default)]
    pub enable_trace: bool,
}

impl Validate for OpaAuthzSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.logger.validate(&field(path, "logger"), violations);
        self.error_handler.validate(&field(path, "errorHandler"), violations);
        violations.check(!self.claims_key.is_empty(), field(path, "claimsKey"), "must not be empty");
        violations.check(!self.regos.is_empty(), field(path, "regos"), "at least one query is required");
        self.regos.validate(&field(path, "regos"), violations);
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SentinelSpec {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RedisPoolSpec {
    #[serde(default)]
    pub size: u32,
    #[serde(default, rename = "fifo")]
    pub fifo: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TlsSpec {
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    #[serde(default)]
    pub root_ca_files: Vec<String>,
    #[serde(default)]
    pub cert_file: Option<String>,
    #[serde(default)]
    pub key_file: Option<String>,
}

fn default_max_retries() -> i64 {
    3
}

fn default_max_redirects() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RedisClientSpec {
    pub addrs: Vec<String>,
    #[serde(default)]
    pub master_name: Option<String>,
    #[serde(default, rename = "db")]
    pub db: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub sentinel: Option<SentinelSpec>,
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,
    #[serde(default)]
    pub min_retry_backoff: Option<DurationSpec>,
    #[serde(default)]
    pub max_retry_backoff: Option<DurationSpec>,
    #[serde(default)]
    pub dial_timeout: Option<DurationSpec>,
    #[serde(default)]
    pub read_timeout: Option<DurationSpec>,
    #[serde(default)]
    pub write_timeout: Option<DurationSpec>,
    #[serde(default)]
    pub pool_timeout: Option<DurationSpec>,
    #[serde(default)]
    pub pool: RedisPoolSpec,
    #[serde(default)]
    pub min_idle_conns: u32,
    #[serde(default)]
    pub max_idle_conns: u32,
    #[serde(default)]
    pub conn_max_idle_time: Option<DurationSpec>,
    #[serde(default)]
    pub conn_max_lifetime: Option<DurationSpec>,
    #[serde(default, rename = "tlsConfig")]
    pub tls_config: Option<TlsSpec>,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub route_by_latency: bool,
    #[serde(default)]
    pub route_randomly: bool,
    /// Upper bound on a single command.
    #[serde(default)]
    pub timeout: Option<DurationSpec>,
    /// Default expiration of stored entries.
    #[serde(default)]
    pub expiration: Option<DurationSpec>,
}

impl Validate for RedisClientSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        violations.check(!self.addrs.is_empty(), field(path, "addrs"), "at least one address is required");
        for (i, addr) in self.addrs.iter().enumerate() {
            let ok = addr
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
            violations.check(ok, format!("{}[{i}]", field(path, "addrs")), format!("'{addr}' is not host:port"));
        }
        violations.check(self.db >= 0, field(path, "db"), "must not be negative");
        violations.check(self.max_retries >= -1, field(path, "maxRetries"), "must be -1 or greater");
        if let (Some(min), Some(max)) = (self.min_retry_backoff, self.max_retry_backoff) {
            violations.check(min <= max || max.0.is_zero(), field(path, "minRetryBackoff"), "must not exceed maxRetryBackoff");
        }
        violations.check(
            self.max_idle_conns == 0 || self.min_idle_conns <= self.max_idle_conns,
            field(path, "minIdleConns"),
            "must not exceed maxIdleConns",
        );
        violations.check(
            self.master_name.is_some() || self.addrs.len() <= 1 || self.db == 0,
            field(path, "db"),
            "cluster mode only supports db 0",
        );
        if let Some(tls) = &self.tls_config {
            violations.check(
                tls.cert_file.is_some() == tls.key_file.is_some(),
                field(path, "tlsConfig.certFile"),
                "certFile and keyFile must be set together",
            );
        }
    }
}

// ---------------------------------------------------------------------------
// JWT
// ---------------------------------------------------------------------------

/// JWS algorithms accepted in manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    #[serde(rename = "NONE", alias = "none")]
    None,
    ES256,
    ES384,
    ES512,
    EdDSA,
    HS256,
    HS384,
    HS512,
    RS256,
    RS384,
    RS512,
    PS256,
    PS384,
    PS512,
}

impl SigningAlgorithm {
    /// Name as written in a JWS `alg` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlgorithm::None => "none",
            SigningAlgorithm::ES256 => "ES256",
            SigningAlgorithm::ES384 => "ES384",
            SigningAlgorithm::ES512 => "ES512",
            SigningAlgorithm::EdDSA => "EdDSA",
            SigningAlgorithm::HS256 => "HS256",
            SigningAlgorithm::HS384 => "HS384",
            SigningAlgorithm::HS512 => "HS512",
            SigningAlgorithm::RS256 => "RS256",
            SigningAlgorithm::RS384 => "RS384",
            SigningAlgorithm::RS512 => "RS512",
            SigningAlgorithm::PS256 => "PS256",
            SigningAlgorithm::PS384 => "PS384",
            SigningAlgorithm::PS512 => "PS512",
        }
    }

    pub fn is_hmac(&self) -> bool {
        matches!(self, SigningAlgorithm::HS256 | SigningAlgorithm::HS384 | SigningAlgorithm::HS512)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let alg = match s {
            "NONE" | "none" => SigningAlgorithm::None,
            "ES256" => SigningAlgorithm::ES256,
            "ES384" => SigningAlgorithm::ES384,
            "ES512" => SigningAlgorithm::ES512,
            "EdDSA" => SigningAlgorithm::EdDSA,
            "HS256" => SigningAlgorithm::HS256,
            "HS384" => SigningAlgorithm::HS384,
            "HS512" => SigningAlgorithm::HS512,
            "RS256" => SigningAlgorithm::RS256,
            "RS384" => SigningAlgorithm::RS384,
            "RS512" => SigningAlgorithm::RS512,
            "PS256" => SigningAlgorithm::PS256,
            "PS384" => SigningAlgorithm::PS384,
            "PS512" => SigningAlgorithm::PS512,
            other => {
                return Err(GatewayError::new(
                    ErrorKind::InvalidAlgorithm,
                    format!("unknown signing algorithm '{other}'"),
                ));
            }
        };
        Ok(alg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "COMMON")]
    Common,
    #[serde(rename = "PUBLIC")]
    Public,
    #[serde(rename = "PRIVATE")]
    Private,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Common => "COMMON",
            KeyType::Public => "PUBLIC",
            KeyType::Private => "PRIVATE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SigningKeySpec {
    /// Derived from the key definition when empty.
    #[serde(default, rename = "keyID")]
    pub key_id: Option<String>,
    pub algorithm: SigningAlgorithm,
    pub key_type: KeyType,
    #[serde(default)]
    pub key_file_path: Option<String>,
    /// Base64 of the raw key material.
    #[serde(default)]
    pub key_string: Option<String>,
    /// Header defaults merged into tokens signed with this key.
    #[serde(default, rename = "jwtHeader")]
    pub jwt_header: BTreeMap<String, Value>,
}

impl Validate for SigningKeySpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        if self.algorithm != SigningAlgorithm::None {
            violations.check(
                self.key_file_path.is_some() != self.key_string.is_some(),
                field(path, "keyString"),
                "exactly one of keyFilePath and keyString is required",
            );
        }
        if let Some(s) = &self.key_string {
            check_base64(s, field(path, "keyString"), violations);
        }
        if self.algorithm.is_hmac() {
            violations.check(
                self.key_type == KeyType::Common,
                field(path, "keyType"),
                "HMAC keys must be COMMON",
            );
        } else if self.algorithm != SigningAlgorithm::None {
            violations.check(
                self.key_type != KeyType::Common,
                field(path, "keyType"),
                "asymmetric keys must be PUBLIC or PRIVATE",
            );
        }
        if let Some(kid) = &self.key_id {
            violations.check(!kid.is_empty(), field(path, "keyID"), "must not be empty");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JwtHandlerSpec {
    #[serde(default)]
    pub private_keys: Vec<SigningKeySpec>,
    #[serde(default)]
    pub public_keys: Vec<SigningKeySpec>,
    /// Issuer to JWKS URL.
    #[serde(default, rename = "jwks")]
    pub jwks: BTreeMap<String, String>,
    #[serde(default, rename = "useJKU")]
    pub use_jku: bool,
    /// Client used to fetch JWKS documents.
    #[serde(default)]
    pub round_tripper: Option<Reference>,
}

impl Validate for JwtHandlerSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.private_keys.validate(&field(path, "privateKeys"), violations);
        self.public_keys.validate(&field(path, "publicKeys"), violations);
        for (i, key) in self.private_keys.iter().enumerate() {
            violations.check(
                key.key_type != KeyType::Public,
                format!("{}[{i}].keyType", field(path, "privateKeys")),
                "PUBLIC keys cannot sign",
            );
        }
        for (i, key) in self.public_keys.iter().enumerate() {
            violations.check(
                key.key_type != KeyType::Private,
                format!("{}[{i}].keyType", field(path, "publicKeys")),
                "PRIVATE keys belong in privateKeys",
            );
        }
        self.round_tripper.validate(&field(path, "roundTripper"), violations);
        for (issuer, url) in &self.jwks {
            violations.check(
                is_http_url(url),
                field(&field(path, "jwks"), issuer),
                format!("'{url}' is not an http(s) URL"),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// The closed set of kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum KindSpec {
    Logger(LoggerSpec),
    ErrorHandler(ErrorHandlerSpec),
    HttpServer(HttpServerSpec),
    HttpClient(HttpClientSpec),
    BasicAuthn(BasicAuthnSpec),
    DigestAuthn(DigestAuthnSpec),
    BearerAuthn(BearerAuthnSpec),
    Cors(CorsSpec),
    SoapRest(SoapRestSpec),
    Tracking(TrackingSpec),
    Skipper(SkipperSpec),
    OpaAuthz(OpaAuthzSpec),
    EchoHandler(RoutesSpec),
    PrometheusMeter(RoutesSpec),
    RedisClient(RedisClientSpec),
    JwtHandler(JwtHandlerSpec),
}

fn typed<T: serde::de::DeserializeOwned>(kind: &str, value: Value) -> Result<T, GatewayError> {
    let value = if value.is_null() { Value::Object(Default::default()) } else { value };
    serde_json::from_value(value)
        .map_err(|e| GatewayError::wrap(ErrorKind::ManifestInvalid, format!("invalid {kind} spec"), e))
}

impl KindSpec {
    /// Decode the raw spec of `(apiVersion, kind)`.
    pub fn decode(api_version: &str, kind: &str, value: Value) -> Result<Self, GatewayError> {
        let spec = match (api_version, kind) {
            (CORE_V1, KIND_LOGGER) => KindSpec::Logger(typed(kind, value)?),
            (CORE_V1, KIND_ERROR_HANDLER) => KindSpec::ErrorHandler(typed(kind, value)?),
            (CORE_V1, KIND_HTTP_SERVER) => KindSpec::HttpServer(typed(kind, value)?),
            (CORE_V1, KIND_HTTP_CLIENT) => KindSpec::HttpClient(typed(kind, value)?),
            (APP_V1, KIND_BASIC_AUTHN) => KindSpec::BasicAuthn(typed(kind, value)?),
            (APP_V1, KIND_DIGEST_AUTHN) => KindSpec::DigestAuthn(typed(kind, value)?),
            (APP_V1, KIND_BEARER_AUTHN) => KindSpec::BearerAuthn(typed(kind, value)?),
            (APP_V1, KIND_CORS) => KindSpec::Cors(typed(kind, value)?),
            (APP_V1, KIND_SOAP_REST) => KindSpec::SoapRest(typed(kind, value)?),
            (APP_V1, KIND_TRACKING) => KindSpec::Tracking(typed(kind, value)?),
            (APP_V1, KIND_SKIPPER) => KindSpec::Skipper(typed(kind, value)?),
            (APP_V1, KIND_OPA_AUTHZ) => KindSpec::OpaAuthz(typed(kind, value)?),
            (APP_V1, KIND_ECHO_HANDLER) => KindSpec::EchoHandler(typed(kind, value)?),
            (APP_V1, KIND_PROMETHEUS_METER) => KindSpec::PrometheusMeter(typed(kind, value)?),
            (APP_V1, KIND_REDIS_CLIENT) => KindSpec::RedisClient(typed(kind, value)?),
            (APP_V1, KIND_JWT_HANDLER) => KindSpec::JwtHandler(typed(kind, value)?),
            _ => {
                return Err(GatewayError::new(
                    ErrorKind::UnknownKind,
                    format!("no schema for {api_version} {kind}"),
                ));
            }
        };
        Ok(spec)
    }

    /// References held in `spec`, in declaration order.
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs: Vec<&Reference> = Vec::new();
        match self {
            KindSpec::Logger(_) | KindSpec::ErrorHandler(_) => {}
            KindSpec::EchoHandler(_) | KindSpec::PrometheusMeter(_) | KindSpec::RedisClient(_) => {}
            KindSpec::JwtHandler(s) => refs.extend(s.round_tripper.iter()),
            KindSpec::HttpServer(s) => {
                refs.extend(s.error_handler.iter());
                refs.extend(s.middleware.iter());
                for binding in &s.handlers {
                    refs.push(&binding.handler);
                    refs.extend(binding.middleware.iter());
                }
            }
            KindSpec::HttpClient(s) => refs.extend(s.tripperware.iter()),
            KindSpec::BasicAuthn(s) => {
                refs.extend(s.logger.iter());
                refs.extend(s.error_handler.iter());
            }
            KindSpec::DigestAuthn(s) => {
                refs.extend(s.logger.iter());
                refs.extend(s.error_handler.iter());
            }
            KindSpec::BearerAuthn(s) => {
                refs.extend(s.logger.iter());
                refs.extend(s.error_handler.iter());
                refs.push(&s.jwt_handler);
            }
            KindSpec::Cors(s) => refs.extend(s.error_handler.iter()),
            KindSpec::SoapRest(s) => refs.extend(s.error_handler.iter()),
            KindSpec::Tracking(s) => refs.extend(s.error_handler.iter()),
            KindSpec::Skipper(s) => {
                refs.extend(s.middleware.iter());
                refs.extend(s.tripperware.iter());
            }
            KindSpec::OpaAuthz(s) => {
                refs.extend(s.logger.iter());
                refs.extend(s.error_handler.iter());
                for rego in &s.regos {
                    refs.extend(rego.round_tripper.iter());
                    if let Some(store) = &rego.http_store {
                        refs.extend(store.round_tripper.iter());
                    }
                }
            }
        }
        refs
    }
}

impl Validate for KindSpec {
    fn validate(&self, path: &str, violations: &mut Violations) {
        match self {
            KindSpec::Logger(s) => s.validate(path, violations),
            KindSpec::ErrorHandler(s) => s.validate(path, violations),
            KindSpec::HttpServer(s) => s.validate(path, violations),
            KindSpec::HttpClient(s) => s.validate(path, violations),
            KindSpec::BasicAuthn(s) => s.validate(path, violations),
            KindSpec::DigestAuthn(s) => s.validate(path, violations),
            KindSpec::BearerAuthn(s) => s.validate(path, violations),
            KindSpec::Cors(s) => s.validate(path, violations),
            KindSpec::SoapRest(s) => s.validate(path, violations),
            KindSpec::Tracking(s) => s.validate(path, violations),
            KindSpec::Skipper(s) => s.validate(path, violations),
            KindSpec::OpaAuthz(s) => s.validate(path, violations),
            KindSpec::EchoHandler(s) | KindSpec::PrometheusMeter(s) => s.validate(path, violations),
            KindSpec::RedisClient(s) => s.validate(path, violations),
            KindSpec::JwtHandler(s) => s.validate(path, violations),
        }
    }
}
