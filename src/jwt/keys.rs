// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signing and validating keys.

use base64::Engine;
use base64::engine::general_purpose;
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use p521::ecdsa::signature::{Signer as _, Verifier as _};
use p521::pkcs8::{DecodePrivateKey, DecodePublicKey};
use serde_json::Value;
use sha1::{Digest, Sha1};
use sha3::Sha3_512;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{ErrorKind, GatewayError};
use crate::manifest::{KeyType, SigningAlgorithm, SigningKeySpec};

/// Library algorithm for a manifest algorithm. `none` and ES512 have no
/// library counterpart; ES512 signs with a P-521 key directly.
fn library_algorithm(alg: SigningAlgorithm) -> Result<Algorithm, GatewayError> {
    let algorithm = match alg {
        SigningAlgorithm::HS256 => Algorithm::HS256,
        SigningAlgorithm::HS384 => Algorithm::HS384,
        SigningAlgorithm::HS512 => Algorithm::HS512,
        SigningAlgorithm::RS256 => Algorithm::RS256,
        SigningAlgorithm::RS384 => Algorithm::RS384,
        SigningAlgorithm::RS512 => Algorithm::RS512,
        SigningAlgorithm::PS256 => Algorithm::PS256,
        SigningAlgorithm::PS384 => Algorithm::PS384,
        SigningAlgorithm::PS512 => Algorithm::PS512,
        SigningAlgorithm::ES256 => Algorithm::ES256,
        SigningAlgorithm::ES384 => Algorithm::ES384,
        SigningAlgorithm::EdDSA => Algorithm::EdDSA,
        SigningAlgorithm::ES512 | SigningAlgorithm::None => {
            return Err(GatewayError::new(
                ErrorKind::InvalidAlgorithm,
                format!("algorithm {alg} is not supported for signatures"),
            ));
        }
    };
    Ok(algorithm)
}

fn key_parse(alg: SigningAlgorithm, err: impl fmt::Display) -> GatewayError {
    GatewayError::new(ErrorKind::KeyParse, format!("cannot parse {alg} key")).with_detail(err.to_string())
}

fn pem_text(alg: SigningAlgorithm, bytes: &[u8]) -> Result<&str, GatewayError> {
    std::str::from_utf8(bytes).map_err(|e| key_parse(alg, e))
}

/// A P-521 private key from PKCS#8 or SEC1 PEM.
fn p521_secret(bytes: &[u8]) -> Result<p521::SecretKey, GatewayError> {
    let alg = SigningAlgorithm::ES512;
    let text = pem_text(alg, bytes)?;
    match p521::SecretKey::from_pkcs8_pem(text) {
        Ok(secret) => Ok(secret),
        Err(_) => p521::SecretKey::from_sec1_pem(text).map_err(|e| key_parse(alg, e)),
    }
}

fn p521_signing_key(bytes: &[u8]) -> Result<p521::ecdsa::SigningKey, GatewayError> {
    let secret = p521_secret(bytes)?;
    p521::ecdsa::SigningKey::from_slice(&secret.to_bytes()).map_err(|e| key_parse(SigningAlgorithm::ES512, e))
}

/// A P-521 public key from SPKI PEM, or the public half of a private PEM.
fn p521_verifying_key(bytes: &[u8]) -> Result<p521::ecdsa::VerifyingKey, GatewayError> {
    let alg = SigningAlgorithm::ES512;
    let public = match p521::PublicKey::from_public_key_pem(pem_text(alg, bytes)?) {
        Ok(public) => public,
        Err(_) => p521_secret(bytes)?.public_key(),
    };
    p521::ecdsa::VerifyingKey::from_sec1_bytes(&public.to_sec1_bytes()).map_err(|e| key_parse(alg, e))
}

/// A P-521 key from the `x`/`y` members of an EC JWK.
fn p521_from_jwk(raw: &Value) -> Result<p521::ecdsa::VerifyingKey, GatewayError> {
    let alg = SigningAlgorithm::ES512;
    let coordinate = |name: &str| {
        raw.get(name)
            .and_then(Value::as_str)
            .and_then(|c| general_purpose::URL_SAFE_NO_PAD.decode(c).ok())
            .ok_or_else(|| key_parse(alg, format!("JWK member {name} is missing or not base64url")))
    };
    let mut point = vec![0x04];
    point.extend(coordinate("x")?);
    point.extend(coordinate("y")?);
    p521::ecdsa::VerifyingKey::from_sec1_bytes(&point).map_err(|e| key_parse(alg, e))
}

#[derive(Clone)]
enum Signer {
    Library(EncodingKey),
    P521(p521::ecdsa::SigningKey),
}

#[derive(Clone)]
enum Verifier {
    Library(DecodingKey),
    P521(p521::ecdsa::VerifyingKey),
}

impl Verifier {
    /// The verifier for `alg` over PEM (or secret) `bytes`; `None` for `none`.
    fn from_material(alg: SigningAlgorithm, bytes: &[u8]) -> Result<Option<Self>, GatewayError> {
        let key = match alg {
            SigningAlgorithm::None => return Ok(None),
            SigningAlgorithm::ES512 => return Ok(Some(Verifier::P521(p521_verifying_key(bytes)?))),
            SigningAlgorithm::HS256 | SigningAlgorithm::HS384 | SigningAlgorithm::HS512 => {
                Ok(DecodingKey::from_secret(bytes))
            }
            SigningAlgorithm::ES256 | SigningAlgorithm::ES384 => DecodingKey::from_ec_pem(bytes),
            SigningAlgorithm::EdDSA => DecodingKey::from_ed_pem(bytes),
            _ => DecodingKey::from_rsa_pem(bytes),
        };
        Ok(Some(Verifier::Library(key.map_err(|e| key_parse(alg, e))?)))
    }

    fn verify(&self, alg: SigningAlgorithm, message: &[u8], signature: &str) -> Result<bool, GatewayError> {
        match (self, alg) {
            (Verifier::P521(key), SigningAlgorithm::ES512) => {
                let Ok(raw) = general_purpose::URL_SAFE_NO_PAD.decode(signature) else {
                    return Ok(false);
                };
                Ok(p521::ecdsa::Signature::from_slice(&raw).is_ok_and(|sig| key.verify(message, &sig).is_ok()))
            }
            (Verifier::P521(_), _) | (Verifier::Library(_), SigningAlgorithm::ES512) => Ok(false),
            (Verifier::Library(key), alg) => {
                let library = library_algorithm(alg)?;
                // A family mismatch is reported as an error by the library.
                Ok(jsonwebtoken::crypto::verify(signature, message, key, library).unwrap_or(false))
            }
        }
    }
}

/// Check a compact JWS against a single key and return its decoded payload.
pub fn verify_compact(token: &str, alg: SigningAlgorithm, material: &[u8]) -> Result<Value, GatewayError> {
    let invalid = |what: &str| GatewayError::new(ErrorKind::Unauthorized, what.to_string());
    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid("token is not a compact JWS"));
    };
    let decode = |segment: &str| {
        general_purpose::URL_SAFE_NO_PAD
            .decode(segment)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
    };
    let header_alg = decode(header)
        .and_then(|h| h.get("alg").and_then(Value::as_str).map(str::to_string))
        .ok_or_else(|| invalid("token header has no alg"))?;
    if header_alg != alg.as_str() {
        return Err(GatewayError::new(
            ErrorKind::InvalidAlgorithm,
            format!("token algorithm {header_alg} does not match key algorithm {alg}"),
        ));
    }
    let Some(verifier) = Verifier::from_material(alg, material)? else {
        return Err(GatewayError::new(ErrorKind::InvalidAlgorithm, "unsigned tokens are not accepted"));
    };
    if !verifier.verify(alg, format!("{header}.{payload}").as_bytes(), signature)? {
        return Err(invalid("token signature is invalid"));
    }
    decode(payload).ok_or_else(|| invalid("token payload is not JSON"))
}

/// Raw key bytes from `keyString` (Base64) or `keyFilePath`.
fn material(spec: &SigningKeySpec) -> Result<Vec<u8>, GatewayError> {
    if let Some(encoded) = &spec.key_string {
        return general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| GatewayError::wrap(ErrorKind::KeyParse, "keyString is not valid base64", e));
    }
    if let Some(path) = &spec.key_file_path {
        return std::fs::read(path)
            .map_err(|e| GatewayError::wrap(ErrorKind::KeyParse, format!("cannot read key file {path}"), e));
    }
    Err(GatewayError::new(
        ErrorKind::KeyParse,
        "one of keyString or keyFilePath is required",
    ))
}

/// `base32(SHA1(SHA3-512(alg ‖ keyType ‖ keyPath ‖ headerJSON)))`.
///
/// Keys given inline use their Base64 string in place of the path.
pub fn derive_kid(spec: &SigningKeySpec) -> Result<String, GatewayError> {
    let header = serde_json::to_string(&spec.jwt_header)
        .map_err(|e| GatewayError::wrap(ErrorKind::KeyParse, "cannot serialize jwtHeader", e))?;
    let key_path = spec
        .key_file_path
        .as_deref()
        .or(spec.key_string.as_deref())
        .unwrap_or_default();

    let mut inner = Sha3_512::new();
    inner.update(spec.algorithm.as_str().as_bytes());
    inner.update(spec.key_type.as_str().as_bytes());
    inner.update(key_path.as_bytes());
    inner.update(header.as_bytes());
    let outer = Sha1::digest(inner.finalize());
    Ok(data_encoding::BASE32.encode(&outer))
}

/// A private or common key able to sign tokens.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    algorithm: SigningAlgorithm,
    key_type: KeyType,
    signer: Option<Signer>,
    header: BTreeMap<String, Value>,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("key_type", &self.key_type)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    pub fn from_spec(spec: &SigningKeySpec) -> Result<Self, GatewayError> {
        let kid = match &spec.key_id {
            Some(kid) => kid.clone(),
            None => derive_kid(spec)?,
        };
        let signer = match spec.algorithm {
            SigningAlgorithm::None => None,
            SigningAlgorithm::ES512 => Some(Signer::P521(p521_signing_key(&material(spec)?)?)),
            alg => {
                let bytes = material(spec)?;
                let key = match alg {
                    SigningAlgorithm::HS256 | SigningAlgorithm::HS384 | SigningAlgorithm::HS512 => {
                        Ok(EncodingKey::from_secret(&bytes))
                    }
                    SigningAlgorithm::ES256 | SigningAlgorithm::ES384 => EncodingKey::from_ec_pem(&bytes),
                    SigningAlgorithm::EdDSA => EncodingKey::from_ed_pem(&bytes),
                    _ => EncodingKey::from_rsa_pem(&bytes),
                };
                Some(Signer::Library(key.map_err(|e| key_parse(alg, e))?))
            }
        };
        Ok(Self {
            kid,
            algorithm: spec.algorithm,
            key_type: spec.key_type,
            signer,
            header: spec.jwt_header.clone(),
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Header defaults merged into every token signed by this key.
    pub fn header_defaults(&self) -> &BTreeMap<String, Value> {
        &self.header
    }

    /// Base64url signature over `message`; empty for `none`.
    pub fn sign(&self, message: &[u8]) -> Result<String, GatewayError> {
        match &self.signer {
            None => Ok(String::new()),
            Some(Signer::P521(key)) => {
                let signature: p521::ecdsa::Signature = key
                    .try_sign(message)
                    .map_err(|e| GatewayError::new(ErrorKind::Internal, "signing failed").with_detail(e.to_string()))?;
                Ok(general_purpose::URL_SAFE_NO_PAD.encode(signature.to_bytes()))
            }
            Some(Signer::Library(key)) => {
                let alg = library_algorithm(self.algorithm)?;
                jsonwebtoken::crypto::sign(message, key, alg)
                    .map_err(|e| GatewayError::wrap(ErrorKind::Internal, "signing failed", e))
            }
        }
    }
}

/// Where a validating key came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    Static,
    Jwks(String),
}

/// A key able to verify token signatures.
#[derive(Clone)]
pub struct ValidatingKey {
    kid: Option<String>,
    algorithm: Option<SigningAlgorithm>,
    verifier: Option<Verifier>,
    source: KeySource,
}

impl fmt::Debug for ValidatingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatingKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl ValidatingKey {
    /// A key from `publicKeys`, or the verifying half of a COMMON private key.
    pub fn from_spec(spec: &SigningKeySpec) -> Result<Self, GatewayError> {
        let kid = match &spec.key_id {
            Some(kid) => kid.clone(),
            None => derive_kid(spec)?,
        };
        let verifier = match spec.algorithm {
            SigningAlgorithm::None => None,
            alg => Verifier::from_material(alg, &material(spec)?)?,
        };
        Ok(Self {
            kid: Some(kid),
            algorithm: Some(spec.algorithm),
            verifier,
            source: KeySource::Static,
        })
    }

    /// Convert one JWKS entry. Returns `Ok(None)` for keys not meant for
    /// signatures (`use: enc`) or with algorithms we cannot verify.
    pub fn from_jwk(raw: &Value, jku: &str) -> Result<Option<Self>, GatewayError> {
        if raw.get("use").and_then(Value::as_str) == Some("enc") {
            return Ok(None);
        }
        let mut algorithm = match raw.get("alg").and_then(Value::as_str) {
            Some(name) => match SigningAlgorithm::from_str(name) {
                Ok(SigningAlgorithm::None) | Err(_) => return Ok(None),
                Ok(alg) => Some(alg),
            },
            None => None,
        };
        let p521_curve = raw.get("crv").and_then(Value::as_str) == Some("P-521");
        let verifier = if p521_curve || algorithm == Some(SigningAlgorithm::ES512) {
            // P-521 only signs ES512.
            algorithm = Some(SigningAlgorithm::ES512);
            Verifier::P521(p521_from_jwk(raw)?)
        } else {
            let jwk: Jwk = serde_json::from_value(raw.clone())
                .map_err(|e| GatewayError::wrap(ErrorKind::KeyParse, "invalid JWK", e))?;
            let decoding = DecodingKey::from_jwk(&jwk)
                .map_err(|e| GatewayError::wrap(ErrorKind::KeyParse, "unsupported JWK", e))?;
            Verifier::Library(decoding)
        };
        Ok(Some(Self {
            kid: raw.get("kid").and_then(Value::as_str).map(str::to_string),
            algorithm,
            verifier: Some(verifier),
            source: KeySource::Jwks(jku.to_string()),
        }))
    }

    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    pub fn algorithm(&self) -> Option<SigningAlgorithm> {
        self.algorithm
    }

    pub fn source(&self) -> &KeySource {
        &self.source
    }

    pub fn is_none(&self) -> bool {
        self.algorithm == Some(SigningAlgorithm::None)
    }

    /// Verify `signature` over `message` as `alg`.
    ///
    /// A key with an algorithm only verifies that algorithm; a key without
    /// one accepts any algorithm of its family.
    pub fn verify(&self, alg: SigningAlgorithm, message: &[u8], signature: &str) -> Result<bool, GatewayError> {
        if let Some(own) = self.algorithm {
            if own != alg {
                return Err(GatewayError::new(
                    ErrorKind::InvalidAlgorithm,
                    format!("token algorithm {alg} does not match key algorithm {own}"),
                ));
            }
        }
        match (&self.verifier, alg) {
            (None, SigningAlgorithm::None) => Ok(signature.is_empty()),
            (None, _) | (Some(_), SigningAlgorithm::None) => Ok(false),
            (Some(verifier), alg) => verifier.verify(alg, message, signature),
        }
    }
}
