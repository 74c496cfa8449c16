// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Secure framing for opaque tokens and cookies.
//!
//! Encoding runs `compress? → encrypt? → mac?`; decoding reverses it.  The
//! MAC covers the ciphertext and is checked in constant time before any
//! decryption is attempted.
//!
//! Frame layout: `[nonce(12) ‖ ciphertext+tag]` when encrypted, followed by
//! `hmac-sha256(32)` when the MAC is enabled.

mod encoding;


pub use encoding::IdEncoding;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use base64::Engine;
use base64::engine::general_purpose;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use std::io::{Read, Write};
use thiserror::Error;

use crate::error::{ErrorKind, GatewayError};

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;
const MAC_LEN: usize = 32;
const COMPRESSION_LEVEL: u32 = 6;
/// Upper bound on the inflated size of a compressed payload.
pub const MAX_INFLATED_LEN: u64 = 1 << 20;

/// Errors produced by [`SecureEncoder`].
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid MAC")]
    InvalidMac,

    #[error("invalid {name} secret: {reason}")]
    InvalidSecret { name: &'static str, reason: String },

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed")]
    Decrypt,

    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("payload inflates beyond {0} bytes")]
    TooLarge(u64),
}

impl From<CodecError> for GatewayError {
    fn from(err: CodecError) -> Self {
        let kind = match err {
            CodecError::InvalidSecret { .. } => ErrorKind::ManifestInvalid,
            CodecError::InvalidMac | CodecError::Malformed(_) | CodecError::Decrypt | CodecError::TooLarge(_) => {
                ErrorKind::BadRequest
            }
            _ => ErrorKind::Internal,
        };
        GatewayError::wrap(kind, "secure encoding failed", err).with_package("gatehouse::codec")
    }
}

/// Independent knobs of a [`SecureEncoder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderOptions {
    pub enable_compression: bool,
    pub disable_encryption: bool,
    pub disable_hmac: bool,
}

enum Cipher {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl Cipher {
    fn new(key: &[u8]) -> Result<Self, CodecError> {
        match key.len() {
            16 => Ok(Cipher::Aes128(Box::new(Aes128Gcm::new(GenericArray::from_slice(key))))),
            32 => Ok(Cipher::Aes256(Box::new(Aes256Gcm::new(GenericArray::from_slice(key))))),
            n => Err(CodecError::InvalidSecret {
                name: "cipher",
                reason: format!("AES-GCM keys are 16 or 32 bytes, got {n}"),
            }),
        }
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce_ga = GenericArray::from_slice(&nonce);

        let ciphertext = match self {
            Cipher::Aes128(c) => c.encrypt(nonce_ga, plaintext),
            Cipher::Aes256(c) => c.encrypt(nonce_ga, plaintext),
        }
        .map_err(|_| CodecError::Encrypt)?;

        // Prepend nonce to ciphertext
        let mut out = nonce.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        if data.len() < NONCE_LEN {
            return Err(CodecError::Malformed("ciphertext shorter than nonce".into()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let nonce_ga = GenericArray::from_slice(nonce);
        match self {
            Cipher::Aes128(c) => c.decrypt(nonce_ga, ciphertext),
            Cipher::Aes256(c) => c.decrypt(nonce_ga, ciphertext),
        }
        .map_err(|_| CodecError::Decrypt)
    }
}

/// Compress, encrypt and authenticate byte strings.
pub struct SecureEncoder {
    options: EncoderOptions,
    mac_key: Vec<u8>,
    cipher: Option<Cipher>,
}

impl fmt::Debug for SecureEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureEncoder")
            .field("options", &self.options)
            .field("mac_key", &"<redacted>")
            .field("cipher", &self.cipher.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn decode_secret(name: &'static str, secret: &str) -> Result<Vec<u8>, CodecError> {
    general_purpose::STANDARD.decode(secret).map_err(|e| CodecError::InvalidSecret {
        name,
        reason: e.to_string(),
    })
}

impl SecureEncoder {
    /// Build an encoder from Base64 secrets.
    ///
    /// Secrets for disabled stages are ignored.
    pub fn new(hmac_secret: &str, cipher_secret: &str, options: EncoderOptions) -> Result<Self, CodecError> {
        let mac_key = if options.disable_hmac {
            Vec::new()
        } else {
            let key = decode_secret("hmac", hmac_secret)?;
            if key.is_empty() {
                return Err(CodecError::InvalidSecret {
                    name: "hmac",
                    reason: "must not be empty".into(),
                });
            }
            key
        };

        let cipher = if options.disable_encryption {
            None
        } else {
            Some(Cipher::new(&decode_secret("cipher", cipher_secret)?)?)
        };

        Ok(Self {
            options,
            mac_key,
            cipher,
        })
    }

    pub fn options(&self) -> EncoderOptions {
        self.options
    }

    fn mac(&self) -> Result<HmacSha256, CodecError> {
        <HmacSha256 as Mac>::new_from_slice(&self.mac_key).map_err(|e| CodecError::InvalidSecret {
            name: "hmac",
            reason: e.to_string(),
        })
    }

    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = if self.options.enable_compression {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(COMPRESSION_LEVEL));
            encoder.write_all(data)?;
            encoder.finish()?
        } else {
            data.to_vec()
        };

        if let Some(cipher) = &self.cipher {
            out = cipher.encrypt(&out)?;
        }

        if !self.options.disable_hmac {
            let mut mac = self.mac()?;
            mac.update(&out);
            out.extend_from_slice(&mac.finalize().into_bytes());
        }
        Ok(out)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut body = data;
        if !self.options.disable_hmac {
            if data.len() < MAC_LEN {
                return Err(CodecError::InvalidMac);
            }
            let (payload, tag) = data.split_at(data.len() - MAC_LEN);
            let mut mac = self.mac()?;
            mac.update(payload);
            mac.verify_slice(tag).map_err(|_| CodecError::InvalidMac)?;
            body = payload;
        }

        let plain = match &self.cipher {
            Some(cipher) => cipher.decrypt(body)?,
            None => body.to_vec(),
        };

        if self.options.enable_compression {
            let mut out = Vec::new();
            DeflateDecoder::new(&plain[..])
                .take(MAX_INFLATED_LEN + 1)
                .read_to_end(&mut out)?;
            if out.len() as u64 > MAX_INFLATED_LEN {
                return Err(CodecError::TooLarge(MAX_INFLATED_LEN));
            }
            Ok(out)
        } else {
            Ok(plain)
        }
    }

    /// [`encode`](Self::encode) rendered as unpadded base64url.
    pub fn encode_to_string(&self, data: &[u8]) -> Result<String, CodecError> {
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(self.encode(data)?))
    }

    pub fn decode_str(&self, text: &str) -> Result<Vec<u8>, CodecError> {
        let raw = general_purpose::URL_SAFE_NO_PAD
            .decode(text)
            .map_err(|e| CodecError::Malformed(e.to_string()))?;
        self.decode(&raw)
    }
}
