// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP Digest authentication (RFC 7616, `qop=auth`).
//!
//! Nonces are stateless: `base64url(issued_at ‖ hmac(issued_at))` under a
//! per-instance random key, valid for [`NONCE_LIFETIME`].  An expired nonce
//! gets a fresh challenge with `stale=true`.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::RngCore;
use serde_json::json;
use sha2::{Digest, Sha256, Sha512_256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

use super::credentials::{CredentialOptions, CredentialStore};
use super::{authorization_param, store_claims};
use crate::container::{Component, Factory, Resolver, unexpected_spec};
use crate::error::{ErrorHandler, GatewayError};
use crate::logging::ComponentLogger;
use crate::manifest::{APP_V1, DigestAlgorithm, DigestAuthnSpec, KIND_DIGEST_AUTHN, KindSpec, ManifestObject};
use crate::pipeline::{GatewayRequest, GatewayResponse, Handler, Middleware};

pub const NONCE_LIFETIME: Duration = Duration::from_secs(300);

type HmacSha256 = Hmac<Sha256>;

/// Hex digest of `input` under `algorithm`.
pub fn digest_hex(algorithm: DigestAlgorithm, input: &str) -> String {
    let bytes = match algorithm {
        DigestAlgorithm::Md5 => Md5::digest(input.as_bytes()).to_vec(),
        DigestAlgorithm::Sha256 => Sha256::digest(input.as_bytes()).to_vec(),
        DigestAlgorithm::Sha512_256 => Sha512_256::digest(input.as_bytes()).to_vec(),
    };
    data_encoding::HEXLOWER.encode(&bytes)
}

/// Split `k1="v1", k2=v2` into a map; keys are lower-cased.
pub fn parse_params(raw: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut rest = raw.trim();
    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else { break };
        let key = key.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let after = after.trim_start();
        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            }
        } else {
            match after.find(',') {
                Some(end) => (after[..end].trim(), &after[end..]),
                None => (after.trim(), ""),
            }
        };
        params.insert(key, value.to_string());
        rest = remaining.trim_start().trim_start_matches(',').trim_start();
    }
    params
}

#[derive(Debug, PartialEq, Eq)]
enum NonceState {
    Fresh,
    Stale,
    Invalid,
}

#[derive(Debug)]
pub struct DigestAuthn {
    realm: String,
    claims_key: String,
    keep_credentials: bool,
    algorithm: DigestAlgorithm,
    store: CredentialStore,
    nonce_key: [u8; 32],
    opaque: String,
    error_handler: Arc<ErrorHandler>,
    logger: ComponentLogger,
}

impl DigestAuthn {
    pub fn new(
        spec: &DigestAuthnSpec,
        store: CredentialStore,
        error_handler: Arc<ErrorHandler>,
        logger: ComponentLogger,
    ) -> Self {
        let mut nonce_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce_key);
        let mut opaque = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut opaque);
        Self {
            realm: spec.realm.clone(),
            claims_key: spec.claims_key.clone(),
            keep_credentials: spec.keep_credentials,
            algorithm: spec.algorithm,
            store,
            nonce_key,
            opaque: data_encoding::HEXLOWER.encode(&opaque),
            error_handler,
            logger,
        }
    }

    fn mac(&self, issued: &[u8]) -> Vec<u8> {
        // Keys of any length are accepted by HMAC.
        let mut mac = match HmacSha256::new_from_slice(&self.nonce_key) {
            Ok(m) => m,
            Err(_) => return Vec::new(),
        };
        mac.update(issued);
        mac.finalize().into_bytes().to_vec()
    }

    fn nonce_at(&self, issued_at: u64) -> String {
        let issued = issued_at.to_be_bytes();
        let mut raw = issued.to_vec();
        raw.extend(self.mac(&issued));
        URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn nonce(&self) -> String {
        self.nonce_at(now_secs())
    }

    fn check_nonce(&self, nonce: &str) -> NonceState {
        let Ok(raw) = URL_SAFE_NO_PAD.decode(nonce) else {
            return NonceState::Invalid;
        };
        if raw.len() <= 8 {
            return NonceState::Invalid;
        }
        let (issued, tag) = raw.split_at(8);
        if !bool::from(self.mac(issued).ct_eq(tag)) {
            return NonceState::Invalid;
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(issued);
        let issued_at = u64::from_be_bytes(buf);
        if now_secs().saturating_sub(issued_at) > NONCE_LIFETIME.as_secs() {
            NonceState::Stale
        } else {
            NonceState::Fresh
        }
    }

    fn challenge(&self, description: &str, stale: bool) -> GatewayError {
        let mut header = format!(
            "Digest realm=\"{}\", qop=\"auth\", algorithm={}, nonce=\"{}\", opaque=\"{}\"",
            self.realm,
            self.algorithm.as_str(),
            self.nonce(),
            self.opaque
        );
        if stale {
            header.push_str(", stale=true");
        }
        GatewayError::unauthorized(description).with_header("WWW-Authenticate", header)
    }

    /// The response a client holding `password` would compute.
    pub fn expected_response(&self, params: &HashMap<String, String>, method: &str, password: &str) -> Option<String> {
        let get = |k: &str| params.get(k).map(String::as_str);
        let user = get("username")?;
        let nonce = get("nonce")?;
        let uri = get("uri")?;
        let ha1 = digest_hex(self.algorithm, &format!("{user}:{}:{password}", self.realm));
        let ha2 = digest_hex(self.algorithm, &format!("{method}:{uri}"));
        let response = match get("qop") {
            Some(qop) => {
                let nc = get("nc")?;
                let cnonce = get("cnonce")?;
                digest_hex(self.algorithm, &format!("{ha1}:{nonce}:{nc}:{cnonce}:{qop}:{ha2}"))
            }
            None => digest_hex(self.algorithm, &format!("{ha1}:{nonce}:{ha2}")),
        };
        Some(response)
    }

    fn authenticate(&self, req: &GatewayRequest) -> Result<String, GatewayError> {
        let raw = authorization_param(req, "digest").ok_or_else(|| self.challenge("digest credentials required", false))?;
        let params = parse_params(raw);
        let get = |k: &str| params.get(k).map(String::as_str);

        if get("realm") != Some(self.realm.as_str()) || get("opaque").is_some_and(|o| o != self.opaque) {
            return Err(self.challenge("digest realm mismatch", false));
        }
        if let Some(alg) = get("algorithm") {
            if !alg.eq_ignore_ascii_case(self.algorithm.as_str()) {
                return Err(self.challenge("unsupported digest algorithm", false));
            }
        }
        if get("qop").is_some_and(|q| q != "auth") {
            return Err(self.challenge("unsupported qop", false));
        }
        if get("uri") != Some(req.uri().as_str()) && get("uri") != Some(req.path.as_str()) {
            return Err(GatewayError::bad_request("digest uri does not match the request"));
        }
        match self.check_nonce(get("nonce").unwrap_or_default()) {
            NonceState::Fresh => {}
            NonceState::Stale => return Err(self.challenge("stale nonce", true)),
            NonceState::Invalid => return Err(self.challenge("invalid nonce", false)),
        }

        let user = get("username").ok_or_else(|| self.challenge("username missing", false))?;
        let password = self.store.secret(user);
        let expected = password.and_then(|p| self.expected_response(&params, req.method.as_str(), p));
        let given = get("response").unwrap_or_default();
        let matched = expected.is_some_and(|e| bool::from(e.as_bytes().ct_eq(given.to_ascii_lowercase().as_bytes())));
        if matched {
            Ok(user.to_string())
        } else {
            self.logger.info(format_args!("Rejected digest credentials for {}", user));
            Err(self.challenge("invalid username or password", false))
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[async_trait]
impl Middleware for DigestAuthn {
    fn name(&self) -> &str {
        "DigestAuthn"
    }

    async fn handle(&self, mut req: GatewayRequest, next: &dyn Handler) -> Result<GatewayResponse, GatewayError> {
        let user = match self.authenticate(&req) {
            Ok(user) => user,
            Err(e) => return Ok(self.error_handler.serve_http_error(&req, &e)),
        };
        store_claims(&req, &self.claims_key, json!({ "sub": user })).await;
        if !self.keep_credentials {
            req.headers.remove("authorization");
        }
        next.handle(req).await
    }
}

/// Builds `app/v1 DigestAuthnMiddleware` objects.
#[derive(Debug, Default)]
pub struct DigestAuthnFactory;

#[async_trait]
impl Factory for DigestAuthnFactory {
    fn api_version(&self) -> &'static str {
        APP_V1
    }

    fn kind(&self) -> &'static str {
        KIND_DIGEST_AUTHN
    }

    async fn create(&self, resolver: &Resolver<'_>, object: &ManifestObject) -> Result<Component, GatewayError> {
        let KindSpec::DigestAuthn(spec) = &object.spec else {
            return Err(unexpected_spec(object));
        };
        let store = CredentialStore::load(&CredentialOptions {
            env_provider: spec.env_provider.as_ref(),
            file_provider: spec.file_provider.as_ref(),
            password_crypt: spec.password_crypt,
            common_key_crypt_type: spec.common_key_crypt_type,
            crypt_secret: spec.crypt_secret.as_deref(),
        })?;
        let middleware = Arc::new(DigestAuthn::new(
            spec,
            store,
            resolver.error_handler(spec.error_handler.as_ref()).await?,
            resolver.logger(object, spec.logger.as_ref()).await?,
        ));
        Ok(Component::new()
            .provide::<dyn Middleware>(middleware.clone())
            .provide(middleware))
    }
}
