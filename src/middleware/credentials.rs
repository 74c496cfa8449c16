// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Username/password stores for the Basic and Digest middleware.
//!
//! Stored passwords go through two optional layers: a common-key cipher
//! (`AESGCM`, unwrapped once at load) and a one-way hash (`SHA256`/`SHA512`,
//! compared as hex at request time).

use sha2::{Digest, Sha256, Sha512};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use subtle::ConstantTimeEq;

use crate::codec::{EncoderOptions, SecureEncoder};
use crate::error::{ErrorKind, GatewayError};
use crate::manifest::{CommonKeyCryptType, EnvProviderSpec, FileProviderSpec, PasswordCrypt};
use crate::{debug_fmt, warn_fmt};

fn credential_error(description: impl Into<String>) -> GatewayError {
    GatewayError::new(ErrorKind::ManifestInvalid, description).with_package("gatehouse::middleware")
}

/// Env var suffixes are paired by numeric value when both parse, so
/// `USER_1` and `PASS_001` belong together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum SuffixKey {
    Number(u64),
    Text(String),
}

impl SuffixKey {
    fn parse(suffix: &str) -> Self {
        match suffix.parse::<u64>() {
            Ok(n) if !suffix.is_empty() => SuffixKey::Number(n),
            _ => SuffixKey::Text(suffix.to_string()),
        }
    }
}

/// Pair `<usernamePrefix><n>` with `<passwordPrefix><n>` among `vars`.
pub fn env_entries<I>(spec: &EnvProviderSpec, vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut users: BTreeMap<SuffixKey, String> = BTreeMap::new();
    let mut passwords: HashMap<SuffixKey, String> = HashMap::new();
    for (name, value) in vars {
        // The longer prefix wins when one prefix extends the other.
        let (user_match, pass_match) = (
            name.strip_prefix(&spec.username_prefix),
            name.strip_prefix(&spec.password_prefix),
        );
        match (user_match, pass_match) {
            (Some(_), Some(p)) if spec.password_prefix.len() > spec.username_prefix.len() => {
                passwords.insert(SuffixKey::parse(p), value);
            }
            (Some(u), _) => {
                users.insert(SuffixKey::parse(u), value);
            }
            (None, Some(p)) => {
                passwords.insert(SuffixKey::parse(p), value);
            }
            (None, None) => {}
        }
    }

    let mut entries = Vec::with_capacity(users.len());
    for (key, user) in users {
        match passwords.remove(&key) {
            Some(password) => entries.push((user, password)),
            None => warn_fmt!("CredentialStore", "User variable {:?} has no matching password", key),
        }
    }
    entries
}

/// Parse `user:password` lines; blank lines and `#` comments are skipped.
pub fn parse_credential_lines(source: &str, text: &str) -> Result<Vec<(String, String)>, GatewayError> {
    let mut entries = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once(':') {
            Some((user, password)) if !user.is_empty() => entries.push((user.to_string(), password.to_string())),
            _ => {
                return Err(credential_error(format!(
                    "{source}:{}: expected user:password",
                    number + 1
                )));
            }
        }
    }
    Ok(entries)
}

fn file_entries(spec: &FileProviderSpec) -> Result<Vec<(String, String)>, GatewayError> {
    let mut entries = Vec::new();
    for path in &spec.paths {
        let text = std::fs::read_to_string(path)
            .map_err(|e| credential_error(format!("cannot read credential file {path}")).with_cause(e))?;
        entries.extend(parse_credential_lines(path, &text)?);
    }
    Ok(entries)
}

/// Hex digest of `password` under `crypt`; the password itself for `NONE`.
pub fn hash_password(crypt: PasswordCrypt, password: &str) -> String {
    match crypt {
        PasswordCrypt::None => password.to_string(),
        PasswordCrypt::Sha256 => data_encoding::HEXLOWER.encode(&Sha256::digest(password.as_bytes())),
        PasswordCrypt::Sha512 => data_encoding::HEXLOWER.encode(&Sha512::digest(password.as_bytes())),
    }
}

/// Configuration shared by the credential-checking middleware.
#[derive(Debug, Clone)]
pub struct CredentialOptions<'a> {
    pub env_provider: Option<&'a EnvProviderSpec>,
    pub file_provider: Option<&'a FileProviderSpec>,
    pub password_crypt: PasswordCrypt,
    pub common_key_crypt_type: CommonKeyCryptType,
    pub crypt_secret: Option<&'a str>,
}

/// Known users and their stored passwords.
pub struct CredentialStore {
    entries: HashMap<String, String>,
    crypt: PasswordCrypt,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut users: Vec<&String> = self.entries.keys().collect();
        users.sort();
        f.debug_struct("CredentialStore")
            .field("users", &users)
            .field("crypt", &self.crypt)
            .finish()
    }
}

impl CredentialStore {
    /// Load from the process environment and credential files.  Later
    /// sources override earlier ones for the same user.
    pub fn load(options: &CredentialOptions<'_>) -> Result<Self, GatewayError> {
        let mut raw = Vec::new();
        if let Some(env) = options.env_provider {
            raw.extend(env_entries(env, std::env::vars()));
        }
        if let Some(file) = options.file_provider {
            raw.extend(file_entries(file)?);
        }
        Self::from_entries(raw, options)
    }

    pub fn from_entries(
        raw: Vec<(String, String)>,
        options: &CredentialOptions<'_>,
    ) -> Result<Self, GatewayError> {
        let decrypter = match options.common_key_crypt_type {
            CommonKeyCryptType::None => None,
            CommonKeyCryptType::AesGcm => {
                let secret = options
                    .crypt_secret
                    .ok_or_else(|| credential_error("cryptSecret is required for AESGCM"))?;
                let encoder_options = EncoderOptions {
                    disable_hmac: true,
                    ..EncoderOptions::default()
                };
                Some(SecureEncoder::new("", secret, encoder_options)?)
            }
        };

        let mut entries = HashMap::with_capacity(raw.len());
        for (user, stored) in raw {
            let stored = match &decrypter {
                None => stored,
                Some(d) => {
                    let plain = d
                        .decode_str(&stored)
                        .map_err(|e| GatewayError::from(e).with_context(format!("decrypting password of {user}")))?;
                    String::from_utf8(plain).map_err(|e| credential_error(format!("password of {user} is not UTF-8")).with_cause(e))?
                }
            };
            entries.insert(user, stored);
        }
        debug_fmt!("CredentialStore", "Loaded {} user(s)", entries.len());
        Ok(Self {
            entries,
            crypt: options.password_crypt,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check `password` for `user` in constant time with respect to the
    /// stored value.
    pub fn verify(&self, user: &str, password: &str) -> bool {
        let candidate = hash_password(self.crypt, password);
        match self.entries.get(user) {
            Some(stored) => {
                let stored = if self.crypt == PasswordCrypt::None {
                    stored.clone()
                } else {
                    stored.to_ascii_lowercase()
                };
                bool::from(stored.as_bytes().ct_eq(candidate.as_bytes()))
            }
            None => {
                // Same amount of work for unknown users.
                let _ = candidate.as_bytes().ct_eq(candidate.as_bytes());
                false
            }
        }
    }

    /// The stored secret, usable for challenge-response schemes only when
    /// passwords are kept unhashed.
    pub fn secret(&self, user: &str) -> Option<&str> {
        match self.crypt {
            PasswordCrypt::None => self.entries.get(user).map(String::as_str),
            _ => None,
        }
    }
}
