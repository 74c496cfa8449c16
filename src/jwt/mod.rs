// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! JWT signing and validation.
//!
//! Tokens are compact JWS: `b64url(header).b64url(claims).b64url(sig)`.
//! Header and claims are serialized with their keys sorted so equal inputs
//! always produce byte-identical tokens.
//!
//! Validation resolves the verifying key from the `kid` header: first the
//! static keys, then the keys fetched from the token's JWKS URL.  That URL is
//! the one configured for the token's `iss`, or the `jku` header when
//! `useJKU` is enabled.  A miss triggers one refresh of that URL and one
//! retry.

mod keys;
mod store;


pub use keys::{KeySource, SigningKey, ValidatingKey, derive_kid, verify_compact};
pub use store::ValidatingKeyStore;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

use crate::container::{Component, Factory, Resolver, unexpected_spec};
use crate::error::{ErrorKind, GatewayError};
use crate::manifest::{APP_V1, JwtHandlerSpec, KIND_JWT_HANDLER, KeyType, KindSpec, ManifestObject, SigningAlgorithm};
use crate::pipeline::{ClientRoundTripper, RoundTripper};
use crate::{debug_fmt, trace_fmt};

/// Claims of a token, sorted by name.
pub type Claims = BTreeMap<String, Value>;

/// An unsigned token.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Token {
    pub header: BTreeMap<String, Value>,
    pub claims: Claims,
}

impl Token {
    pub fn kid(&self) -> Option<&str> {
        self.header.get("kid").and_then(Value::as_str)
    }

    pub fn alg(&self) -> Option<&str> {
        self.header.get("alg").and_then(Value::as_str)
    }
}

/// Checks applied to claims after the signature verifies.
#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    /// Accepted `iss` values; empty accepts any.
    pub issuers: Vec<String>,
    /// Accepted `aud` values; empty accepts any.
    pub audiences: Vec<String>,
    /// Claims that must be present.
    pub required_claims: Vec<String>,
    /// Clock skew tolerated for `exp`, `nbf` and `iat`.
    pub leeway: Duration,
    pub require_exp: bool,
}

fn unauthorized(description: impl Into<String>) -> GatewayError {
    GatewayError::unauthorized(description).with_package("gatehouse::jwt")
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

fn encode_segment(value: &BTreeMap<String, Value>) -> Result<String, GatewayError> {
    let json = serde_json::to_vec(value).map_err(|e| GatewayError::wrap(ErrorKind::Internal, "cannot encode token", e))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_segment(segment: &str, name: &str) -> Result<BTreeMap<String, Value>, GatewayError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| unauthorized(format!("malformed token {name}")).with_cause(e))?;
    serde_json::from_slice(&bytes).map_err(|e| unauthorized(format!("malformed token {name}")).with_cause(e))
}

/// Signs and validates JWTs for one manifest object.
#[derive(Debug)]
pub struct JwtHandler {
    signing: BTreeMap<String, Arc<SigningKey>>,
    store: ValidatingKeyStore,
    jwks: BTreeMap<String, String>,
    use_jku: bool,
}

impl JwtHandler {
    pub fn new(spec: &JwtHandlerSpec, transport: Arc<dyn RoundTripper>) -> Result<Self, GatewayError> {
        let mut signing = BTreeMap::new();
        let mut validating = Vec::new();

        for key_spec in &spec.private_keys {
            let key = SigningKey::from_spec(key_spec)?;
            if key_spec.key_type == KeyType::Common {
                validating.push(ValidatingKey::from_spec(key_spec)?);
            }
            if signing.insert(key.kid().to_string(), Arc::new(key)).is_some() {
                return Err(GatewayError::new(ErrorKind::ManifestInvalid, "duplicate private key id"));
            }
        }
        for key_spec in &spec.public_keys {
            validating.push(ValidatingKey::from_spec(key_spec)?);
        }

        Ok(Self {
            signing,
            store: ValidatingKeyStore::new(validating, transport),
            jwks: spec.jwks.clone(),
            use_jku: spec.use_jku,
        })
    }

    pub fn store(&self) -> &ValidatingKeyStore {
        &self.store
    }

    /// Ids of the signing keys, in signing-preference order.
    pub fn signing_kids(&self) -> Vec<&str> {
        self.signing.keys().map(String::as_str).collect()
    }

    /// A token for `claims`, signed by the key with the lowest `kid`.
    pub fn token_with_claims(&self, claims: Claims) -> Result<Token, GatewayError> {
        let key = self
            .signing
            .values()
            .next()
            .ok_or_else(|| GatewayError::new(ErrorKind::NoSigningKey, "no private key configured"))?;
        Ok(Self::token_for(key, claims))
    }

    /// A token for `claims` to be signed by the key `kid`.
    pub fn token_with_claims_for_kid(&self, kid: &str, claims: Claims) -> Result<Token, GatewayError> {
        let key = self
            .signing
            .get(kid)
            .ok_or_else(|| GatewayError::new(ErrorKind::NoSigningKey, format!("no private key with kid '{kid}'")))?;
        Ok(Self::token_for(key, claims))
    }

    fn token_for(key: &SigningKey, claims: Claims) -> Token {
        let mut header = BTreeMap::new();
        header.insert("typ".to_string(), Value::String("JWT".to_string()));
        header.extend(key.header_defaults().clone());
        header.insert("alg".to_string(), Value::String(key.algorithm().as_str().to_string()));
        header.insert("kid".to_string(), Value::String(key.kid().to_string()));
        Token { header, claims }
    }

    /// Serialize and sign `token` with the private key named by its `kid`.
    pub fn signed_string(&self, token: &Token) -> Result<String, GatewayError> {
        let kid = token
            .kid()
            .ok_or_else(|| GatewayError::new(ErrorKind::NoSigningKey, "token header has no kid"))?;
        let key = self
            .signing
            .get(kid)
            .ok_or_else(|| GatewayError::new(ErrorKind::NoSigningKey, format!("no private key with kid '{kid}'")))?;
        if let Some(alg) = token.alg() {
            if SigningAlgorithm::from_str(alg)? != key.algorithm() {
                return Err(GatewayError::new(
                    ErrorKind::InvalidAlgorithm,
                    format!("header alg {alg} does not match key {kid} ({})", key.algorithm()),
                ));
            }
        }

        let signing_input = format!("{}.{}", encode_segment(&token.header)?, encode_segment(&token.claims)?);
        let signature = key.sign(signing_input.as_bytes())?;
        Ok(format!("{signing_input}.{signature}"))
    }

    /// JWKS URL for a token: the one mapped to its issuer, else its `jku`
    /// header when allowed.
    fn jku_for(&self, header: &BTreeMap<String, Value>, claims: &Claims) -> Option<String> {
        if let Some(url) = claims
            .get("iss")
            .and_then(Value::as_str)
            .and_then(|iss| self.jwks.get(iss))
        {
            return Some(url.clone());
        }
        if self.use_jku {
            return header.get("jku").and_then(Value::as_str).map(str::to_string);
        }
        None
    }

    /// Validate `token` and return its claims.
    pub async fn valid_map_claims(&self, token: &str, options: &ValidationOptions) -> Result<Claims, GatewayError> {
        self.valid_map_claims_with_cancel(token, options, &CancellationToken::new())
            .await
    }

    pub async fn valid_map_claims_with_cancel(
        &self,
        token: &str,
        options: &ValidationOptions,
        cancel: &CancellationToken,
    ) -> Result<Claims, GatewayError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(unauthorized("token is not a compact JWS"));
        };
        let header = decode_segment(header_b64, "header")?;
        let claims = decode_segment(claims_b64, "claims")?;

        let alg_name = header
            .get("alg")
            .and_then(Value::as_str)
            .ok_or_else(|| unauthorized("token header has no alg"))?;
        let alg = SigningAlgorithm::from_str(alg_name)?;
        let kid = header.get("kid").and_then(Value::as_str);
        let jku = self.jku_for(&header, &claims);

        let find = |store: &ValidatingKeyStore| match kid {
            Some(kid) => store.lookup(kid, jku.as_deref()),
            None => store.anonymous(jku.as_deref()),
        };
        let mut candidates = find(&self.store);
        if candidates.is_empty() {
            let Some(url) = &jku else {
                return Err(GatewayError::new(
                    ErrorKind::KeyNotFound,
                    format!("no validating key for kid {}", kid.unwrap_or("<none>")),
                ));
            };
            debug_fmt!("JwtHandler", "No key for kid {:?}, refreshing {}", kid, url);
            self.store.refresh(url, cancel).await?;
            candidates = find(&self.store);
            if candidates.is_empty() {
                return Err(GatewayError::new(
                    ErrorKind::KeyNotFound,
                    format!("no validating key for kid {} after refreshing {url}", kid.unwrap_or("<none>")),
                ));
            }
        }

        let signing_input = format!("{header_b64}.{claims_b64}");
        let mut mismatch = None;
        let mut verified = false;
        for key in &candidates {
            match key.verify(alg, signing_input.as_bytes(), signature) {
                Ok(true) => {
                    verified = true;
                    break;
                }
                Ok(false) => {}
                Err(e) => mismatch = Some(e),
            }
        }
        if !verified {
            return Err(mismatch.unwrap_or_else(|| unauthorized("token signature is invalid")));
        }
        trace_fmt!("JwtHandler", "Verified {} token with kid {:?}", alg, kid);

        check_claims(&claims, options)?;
        Ok(claims)
    }
}

fn numeric_claim(claims: &Claims, name: &str) -> Result<Option<f64>, GatewayError> {
    match claims.get(name) {
        None => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| unauthorized(format!("claim {name} is not numeric"))),
    }
}

fn check_claims(claims: &Claims, options: &ValidationOptions) -> Result<(), GatewayError> {
    let now = now_secs();
    let leeway = options.leeway.as_secs_f64();

    match numeric_claim(claims, "exp")? {
        Some(exp) if now - leeway >= exp => return Err(unauthorized("token has expired")),
        None if options.require_exp => return Err(unauthorized("token has no exp claim")),
        _ => {}
    }
    if let Some(nbf) = numeric_claim(claims, "nbf")? {
        if now + leeway < nbf {
            return Err(unauthorized("token is not valid yet"));
        }
    }
    if let Some(iat) = numeric_claim(claims, "iat")? {
        if now + leeway < iat {
            return Err(unauthorized("token was issued in the future"));
        }
    }

    if !options.issuers.is_empty() {
        let iss = claims.get("iss").and_then(Value::as_str);
        if !iss.is_some_and(|iss| options.issuers.iter().any(|i| i == iss)) {
            return Err(unauthorized("token issuer is not accepted"));
        }
    }
    if !options.audiences.is_empty() {
        let accepted = |aud: &str| options.audiences.iter().any(|a| a == aud);
        let ok = match claims.get("aud") {
            Some(Value::String(aud)) => accepted(aud),
            Some(Value::Array(auds)) => auds.iter().filter_map(Value::as_str).any(accepted),
            _ => false,
        };
        if !ok {
            return Err(unauthorized("token audience is not accepted"));
        }
    }
    for name in &options.required_claims {
        if !claims.contains_key(name) {
            return Err(unauthorized(format!("token lacks required claim {name}")));
        }
    }
    Ok(())
}

/// Builds `app/v1 JWTHandler` objects.
#[derive(Debug, Default)]
pub struct JwtHandlerFactory;

#[async_trait]
impl Factory for JwtHandlerFactory {
    fn api_version(&self) -> &'static str {
        APP_V1
    }

    fn kind(&self) -> &'static str {
        KIND_JWT_HANDLER
    }

    async fn create(&self, resolver: &Resolver<'_>, object: &ManifestObject) -> Result<Component, GatewayError> {
        let KindSpec::JwtHandler(spec) = &object.spec else {
            return Err(unexpected_spec(object));
        };
        let transport = match resolver.resolve_opt::<dyn RoundTripper>(spec.round_tripper.as_ref()).await? {
            Some(t) => t,
            None => Arc::new(ClientRoundTripper::default()) as Arc<dyn RoundTripper>,
        };
        let handler = JwtHandler::new(spec, transport)?;
        debug_fmt!(
            "JwtHandler",
            "{} has {} signing key(s) and {} static validating key(s)",
            object.identity,
            handler.signing.len(),
            handler.store.static_keys().len()
        );
        Ok(Component::new().provide(Arc::new(handler)))
    }
}
