// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Policy bundles.
//!
//! A bundle is a gzipped tarball or a directory holding `.rego` modules,
//! `data.json`/`data.yaml` documents placed at their directory path, an
//! optional `.manifest` and an optional `.signatures.json`.

use flate2::read::GzDecoder;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::store::{DataFormat, insert_at};
use crate::error::{ErrorKind, GatewayError};
use crate::jwt::verify_compact;
use crate::manifest::{BundleVerificationSpec, SigningAlgorithm};
use crate::pipeline::RoundTripper;
use crate::{debug_fmt, info_fmt};

const MANIFEST_FILE: &str = ".manifest";
const SIGNATURES_FILE: &str = ".signatures.json";
/// Upper bound on the unpacked size of a bundle tarball.
pub const MAX_BUNDLE_LEN: u64 = 64 << 20;

fn bundle_error(source: &str, description: impl Into<String>) -> GatewayError {
    GatewayError::new(ErrorKind::PolicyCompile, description)
        .with_package("gatehouse::policy")
        .with_context(format!("loading bundle {source}"))
}

#[derive(Debug, Default, Deserialize)]
struct BundleManifest {
    #[serde(default)]
    revision: Option<String>,
    #[serde(default)]
    roots: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SignaturesFile {
    signatures: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SignedFile {
    name: String,
    hash: String,
    #[serde(default = "default_hash_algorithm")]
    algorithm: String,
}

fn default_hash_algorithm() -> String {
    "SHA-256".to_string()
}

#[derive(Debug, Deserialize)]
struct SignaturePayload {
    files: Vec<SignedFile>,
    #[serde(default)]
    keyid: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// A loaded bundle.
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    pub source: String,
    pub revision: Option<String>,
    pub roots: Vec<String>,
    /// Module path to Rego source.
    pub policies: BTreeMap<String, String>,
    /// Documents merged at their directory paths.
    pub data: Value,
    pub signed: bool,
}

fn normalize(path: &str) -> String {
    path.trim_start_matches("./").trim_start_matches('/').to_string()
}

impl Bundle {
    /// Assemble a bundle from `(path, content)` pairs.
    pub fn from_files(
        source: &str,
        files: Vec<(String, Vec<u8>)>,
        verification: Option<&BundleVerificationSpec>,
    ) -> Result<Self, GatewayError> {
        let files: BTreeMap<String, Vec<u8>> = files.into_iter().map(|(p, c)| (normalize(&p), c)).collect();

        let signed = match verification {
            Some(config) => {
                verify_signatures(source, &files, config)?;
                true
            }
            None => false,
        };

        let mut bundle = Bundle {
            source: source.to_string(),
            data: Value::Object(Map::new()),
            signed,
            ..Default::default()
        };

        if let Some(raw) = files.get(MANIFEST_FILE) {
            let manifest: BundleManifest = serde_json::from_slice(raw)
                .map_err(|e| bundle_error(source, "invalid .manifest").with_cause(e))?;
            bundle.revision = manifest.revision;
            bundle.roots = manifest.roots;
        }

        for (path, content) in &files {
            let file_name = path.rsplit('/').next().unwrap_or(path);
            if path.ends_with(".rego") {
                let text = String::from_utf8(content.clone())
                    .map_err(|e| bundle_error(source, format!("{path} is not UTF-8")).with_cause(e))?;
                bundle.policies.insert(path.clone(), text);
            } else if matches!(file_name, "data.json" | "data.yaml" | "data.yml") {
                let format = DataFormat::from_extension(file_name).unwrap_or(DataFormat::Json);
                let value = format
                    .decode(content)
                    .map_err(|e| e.with_context(format!("loading bundle {source}")))?;
                let segments: Vec<String> = path
                    .rsplit_once('/')
                    .map(|(dir, _)| dir.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect())
                    .unwrap_or_default();
                bundle.check_root(&segments)?;
                merge_at(&mut bundle.data, &segments, value)?;
            }
        }

        info_fmt!(
            "Bundle",
            "Loaded {} (revision {}, {} module(s))",
            source,
            bundle.revision.as_deref().unwrap_or("-"),
            bundle.policies.len()
        );
        Ok(bundle)
    }

    /// Data outside the declared roots is rejected.
    fn check_root(&self, segments: &[String]) -> Result<(), GatewayError> {
        if self.roots.is_empty() || self.roots.iter().any(|r| r.is_empty()) {
            return Ok(());
        }
        let path = segments.join("/");
        let inside = self.roots.iter().any(|root| {
            let root = root.trim_matches('/');
            path == root || path.starts_with(&format!("{root}/"))
        });
        if inside {
            Ok(())
        } else {
            Err(bundle_error(&self.source, format!("data path '/{path}' is outside the bundle roots")))
        }
    }

    /// Read a gzipped tarball.
    pub fn from_tarball(
        source: &str,
        bytes: &[u8],
        verification: Option<&BundleVerificationSpec>,
    ) -> Result<Self, GatewayError> {
        let unpacked = inflate(source, bytes, MAX_BUNDLE_LEN)?;
        let mut archive = tar::Archive::new(unpacked.as_slice());
        let mut files = Vec::new();
        let entries = archive
            .entries()
            .map_err(|e| bundle_error(source, "cannot read archive").with_cause(e))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| bundle_error(source, "cannot read archive entry").with_cause(e))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry
                .path()
                .map_err(|e| bundle_error(source, "invalid path in archive").with_cause(e))?
                .to_string_lossy()
                .to_string();
            let mut content = Vec::new();
            entry
                .read_to_end(&mut content)
                .map_err(|e| bundle_error(source, format!("cannot read {path}")).with_cause(e))?;
            files.push((path, content));
        }
        Self::from_files(source, files, verification)
    }

    /// Read a directory tree.
    pub fn from_directory(
        source: &str,
        dir: &Path,
        verification: Option<&BundleVerificationSpec>,
    ) -> Result<Self, GatewayError> {
        let mut files = Vec::new();
        collect_dir(source, dir, dir, &mut files)?;
        Self::from_files(source, files, verification)
    }
}

/// Gunzip `bytes`, failing once the output would exceed `limit`.
pub fn inflate(source: &str, bytes: &[u8], limit: u64) -> Result<Vec<u8>, GatewayError> {
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .take(limit + 1)
        .read_to_end(&mut out)
        .map_err(|e| bundle_error(source, "cannot decompress archive").with_cause(e))?;
    if out.len() as u64 > limit {
        return Err(bundle_error(source, format!("archive unpacks beyond {limit} bytes")));
    }
    Ok(out)
}

fn collect_dir(source: &str, base: &Path, dir: &Path, files: &mut Vec<(String, Vec<u8>)>) -> Result<(), GatewayError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| bundle_error(source, format!("cannot read {}", dir.display())).with_cause(e))?;
    for entry in entries {
        let path = entry
            .map_err(|e| bundle_error(source, "cannot list directory").with_cause(e))?
            .path();
        if path.is_dir() {
            collect_dir(source, base, &path, files)?;
            continue;
        }
        let relative = path
            .strip_prefix(base)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        let content = std::fs::read(&path)
            .map_err(|e| bundle_error(source, format!("cannot read {}", path.display())).with_cause(e))?;
        files.push((relative, content));
    }
    Ok(())
}

fn merge_at(root: &mut Value, segments: &[String], value: Value) -> Result<(), GatewayError> {
    if segments.is_empty() {
        match (root, value) {
            (Value::Object(existing), Value::Object(incoming)) => {
                existing.extend(incoming);
                Ok(())
            }
            (root, value) => {
                *root = value;
                Ok(())
            }
        }
    } else {
        insert_at(root, segments, value)
    }
}

/// Translate a glob with `*` and `**` into an anchored regex.
fn exclude_pattern(glob: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                pattern.push_str(".*");
            }
            '*' => pattern.push_str("[^/]*"),
            '?' => pattern.push_str("[^/]"),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
}

/// Data documents and the manifest are hashed over their canonical JSON
/// form, everything else over its raw bytes.
fn is_structured(name: &str) -> bool {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    matches!(file_name, "data.json" | "data.yaml" | "data.yml" | MANIFEST_FILE | SIGNATURES_FILE)
}

/// Compact JSON with object keys sorted and no HTML escaping.
pub fn canonical_json(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonical_string(key, out);
                out.push(':');
                canonical_json(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonical_json(item, out);
            }
            out.push(']');
        }
        Value::String(text) => canonical_string(text, out),
        other => out.push_str(&other.to_string()),
    }
}

fn canonical_string(text: &str, out: &mut String) {
    let quoted = Value::String(text.to_string()).to_string();
    out.push_str(&quoted.replace('\u{2028}', "\\u2028").replace('\u{2029}', "\\u2029"));
}

/// Hex SHA-256 of a bundle file as listed in `.signatures.json`.
pub fn file_digest(source: &str, name: &str, content: &[u8]) -> Result<String, GatewayError> {
    let digest = if is_structured(name) {
        let format = DataFormat::from_extension(name).unwrap_or(DataFormat::Json);
        let value = format
            .decode(content)
            .map_err(|e| e.with_context(format!("hashing {name} of bundle {source}")))?;
        let mut canonical = String::new();
        canonical_json(&value, &mut canonical);
        Sha256::digest(canonical.as_bytes())
    } else {
        Sha256::digest(content)
    };
    Ok(data_encoding::HEXLOWER.encode(&digest))
}

fn verify_signatures(
    source: &str,
    files: &BTreeMap<String, Vec<u8>>,
    config: &BundleVerificationSpec,
) -> Result<(), GatewayError> {
    let raw = files
        .get(SIGNATURES_FILE)
        .ok_or_else(|| bundle_error(source, "bundle is not signed"))?;
    let signatures: SignaturesFile = serde_json::from_slice(raw)
        .map_err(|e| bundle_error(source, "invalid .signatures.json").with_cause(e))?;
    let [token] = signatures.signatures.as_slice() else {
        return Err(bundle_error(source, "exactly one bundle signature is expected"));
    };

    let segment = |index: usize| {
        token
            .split('.')
            .nth(index)
            .and_then(|p| base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, p).ok())
    };
    let header: Value = segment(0)
        .and_then(|h| serde_json::from_slice(&h).ok())
        .ok_or_else(|| bundle_error(source, "invalid signature header"))?;
    let unverified: SignaturePayload = segment(1)
        .and_then(|p| serde_json::from_slice(&p).ok())
        .ok_or_else(|| bundle_error(source, "invalid signature payload"))?;

    let key_id = header
        .get("kid")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or(unverified.keyid.clone())
        .unwrap_or_else(|| config.key_id.clone());
    let key = config
        .keys
        .iter()
        .find(|k| k.key_id == key_id)
        .ok_or_else(|| bundle_error(source, format!("no verification key '{key_id}'")))?;
    let algorithm = SigningAlgorithm::from_str(&key.algorithm)
        .map_err(|e| e.with_context(format!("loading bundle {source}")))?;
    let claims = match verify_compact(token, algorithm, key.pem.as_bytes()) {
        Ok(claims) => claims,
        Err(e) if e.kind() == ErrorKind::Unauthorized => {
            return Err(bundle_error(source, "bundle signature is invalid").with_cause(e));
        }
        Err(e) => return Err(e.with_context(format!("verifying bundle {source} with key {key_id}"))),
    };
    let payload: SignaturePayload = serde_json::from_value(claims)
        .map_err(|e| bundle_error(source, "invalid signature payload").with_cause(e))?;

    let expected_scope = key.scope.as_ref().or(config.scope.as_ref());
    if let Some(scope) = expected_scope {
        if payload.scope.as_ref() != Some(scope) {
            return Err(bundle_error(source, format!("bundle scope does not match '{scope}'")));
        }
    }

    let excludes = config
        .excludes
        .iter()
        .map(|glob| exclude_pattern(glob))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| bundle_error(source, "invalid exclude pattern").with_cause(e))?;
    let mut remaining: BTreeMap<&str, &[u8]> = files
        .iter()
        .filter(|(name, _)| name.as_str() != SIGNATURES_FILE && !excludes.iter().any(|re| re.is_match(name)))
        .map(|(name, content)| (name.as_str(), content.as_slice()))
        .collect();

    for signed in &payload.files {
        if !signed.algorithm.eq_ignore_ascii_case("SHA-256") {
            return Err(bundle_error(source, format!("unsupported hash algorithm {}", signed.algorithm)));
        }
        let name = normalize(&signed.name);
        let content = remaining
            .remove(name.as_str())
            .ok_or_else(|| bundle_error(source, format!("signed file {name} is missing")))?;
        let actual = file_digest(source, &name, content)?;
        if !actual.eq_ignore_ascii_case(&signed.hash) {
            return Err(bundle_error(source, format!("digest mismatch for {name}")));
        }
    }
    if let Some((name, _)) = remaining.into_iter().next() {
        return Err(bundle_error(source, format!("file {name} is not covered by the signature")));
    }
    debug_fmt!("Bundle", "Verified signature of {} with key {}", source, key_id);
    Ok(())
}

fn is_remote(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// Load the bundle at `path`: a URL, a directory or a tarball file.
pub async fn load_bundle(
    path: &str,
    verification: Option<&BundleVerificationSpec>,
    transport: Arc<dyn RoundTripper>,
    cancel: &CancellationToken,
) -> Result<Bundle, GatewayError> {
    if is_remote(path) {
        let file = download(path, transport, cancel).await?;
        let bytes = tokio::fs::read(file.path())
            .await
            .map_err(|e| bundle_error(path, "cannot read downloaded bundle").with_cause(e))?;
        return Bundle::from_tarball(path, &bytes, verification);
    }
    let local = Path::new(path);
    if local.is_dir() {
        return Bundle::from_directory(path, local, verification);
    }
    let bytes = tokio::fs::read(local)
        .await
        .map_err(|e| bundle_error(path, "cannot read bundle file").with_cause(e))?;
    Bundle::from_tarball(path, &bytes, verification)
}

/// Fetch `url` into a temporary file removed on drop.
async fn download(
    url: &str,
    transport: Arc<dyn RoundTripper>,
    cancel: &CancellationToken,
) -> Result<tempfile::NamedTempFile, GatewayError> {
    let request = reqwest::Client::new()
        .get(url)
        .build()
        .map_err(|e| bundle_error(url, "invalid bundle URL").with_cause(e))?;
    let fetch = async {
        let response = transport.round_trip(request).await?;
        if !response.status().is_success() {
            return Err(bundle_error(url, format!("bundle server returned {}", response.status())));
        }
        Ok::<_, GatewayError>(response.bytes().await?)
    };
    let body = tokio::select! {
        _ = cancel.cancelled() => return Err(bundle_error(url, "bundle download cancelled")),
        result = fetch => result?,
    };
    let mut file = tempfile::NamedTempFile::new()
        .map_err(|e| bundle_error(url, "cannot create temporary file").with_cause(e))?;
    file.write_all(&body)
        .map_err(|e| bundle_error(url, "cannot write temporary file").with_cause(e))?;
    debug_fmt!("Bundle", "Downloaded {} byte(s) from {}", body.len(), url);
    Ok(file)
}
