// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Policy data stores.
//!
//! A store is built once from a file or HTTP spec and is read-only
//! afterwards.  Every document of one build is staged in a [`Transaction`]
//! and becomes visible only on commit; any failure aborts the whole build.
//!
//! Storage paths (`/a/b`) address nodes of the `data` document.  The disk
//! backend partitions the document by its first path segment, one JSON file
//! per partition.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, GatewayError};
use crate::manifest::{FileStoreSpec, HttpStoreSpec};
use crate::pipeline::RoundTripper;
use crate::{debug_fmt, trace_fmt};

const CURRENT_DIR: &str = "current";

fn store_error(description: impl Into<String>) -> GatewayError {
    GatewayError::new(ErrorKind::PolicyCompile, description).with_package("gatehouse::policy")
}

/// Content formats understood by the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Json,
    Yaml,
}

impl DataFormat {
    pub fn from_extension(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".csv") {
            Some(DataFormat::Csv)
        } else if lower.ends_with(".json") {
            Some(DataFormat::Json)
        } else if lower.ends_with(".yaml") || lower.ends_with(".yml") {
            Some(DataFormat::Yaml)
        } else {
            None
        }
    }

    pub fn from_media_type(content_type: &str) -> Option<Self> {
        let media = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match media.as_str() {
            "text/csv" | "application/csv" => Some(DataFormat::Csv),
            "application/json" | "text/json" => Some(DataFormat::Json),
            "application/yaml" | "application/x-yaml" | "text/yaml" | "text/x-yaml" => Some(DataFormat::Yaml),
            m if m.ends_with("+json") => Some(DataFormat::Json),
            m if m.ends_with("+yaml") => Some(DataFormat::Yaml),
            _ => None,
        }
    }

    /// Decode `bytes`; CSV becomes a table of strings.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, GatewayError> {
        match self {
            DataFormat::Json => serde_json::from_slice(bytes)
                .map_err(|e| store_error("invalid JSON data").with_cause(e)),
            DataFormat::Yaml => serde_yaml::from_slice(bytes)
                .map_err(|e| store_error("invalid YAML data").with_cause(e)),
            DataFormat::Csv => {
                let mut reader = csv::ReaderBuilder::new()
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(bytes);
                let mut rows = Vec::new();
                for record in reader.records() {
                    let record = record.map_err(|e| store_error("invalid CSV data").with_cause(e))?;
                    rows.push(Value::Array(record.iter().map(|f| Value::String(f.to_string())).collect()));
                }
                Ok(Value::Array(rows))
            }
        }
    }
}

/// Split `/a/b` into `["a", "b"]`.
pub fn storage_segments(path: &str) -> Result<Vec<String>, GatewayError> {
    let segments: Vec<String> = path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect();
    if segments.is_empty() {
        return Err(store_error(format!("storage path '{path}' addresses the root")));
    }
    Ok(segments)
}

/// Place `value` at `segments` inside `root`, creating objects on the way.
pub fn insert_at(root: &mut Value, segments: &[String], value: Value) -> Result<(), GatewayError> {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return Ok(());
    };
    let mut node = root;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map.entry(segment.clone()).or_insert_with(|| Value::Object(Map::new())),
            _ => return Err(store_error(format!("cannot descend into '{segment}'"))),
        };
    }
    match node {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        _ => {
            let mut map = Map::new();
            map.insert(last.clone(), value);
            *node = Value::Object(map);
            Ok(())
        }
    }
}

#[derive(Debug)]
enum Backend {
    Memory(RwLock<Value>),
    Disk(PathBuf),
}

/// A committed `data` document.
#[derive(Debug)]
pub struct DataStore {
    backend: Backend,
}

impl DataStore {
    /// A memory store, or a disk store under `directory`.
    pub fn new(directory: Option<&str>) -> Self {
        let backend = match directory {
            Some(dir) if !dir.is_empty() => Backend::Disk(PathBuf::from(dir)),
            _ => Backend::Memory(RwLock::new(Value::Object(Map::new()))),
        };
        Self { backend }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, Backend::Disk(_))
    }

    pub fn begin(&self) -> Transaction<'_> {
        Transaction {
            store: self,
            staged: BTreeMap::new(),
        }
    }

    /// The whole document.
    pub fn document(&self) -> Result<Value, GatewayError> {
        match &self.backend {
            Backend::Memory(doc) => doc
                .read()
                .map(|d| d.clone())
                .map_err(|_| store_error("data store lock poisoned")),
            Backend::Disk(dir) => read_partitions(&dir.join(CURRENT_DIR)),
        }
    }

    /// The node at `path`, if any.
    pub fn read(&self, path: &str) -> Result<Option<Value>, GatewayError> {
        let document = self.document()?;
        let mut node = &document;
        for segment in storage_segments(path)? {
            match node.get(&segment) {
                Some(next) => node = next,
                None => return Ok(None),
            }
        }
        Ok(Some(node.clone()))
    }
}

fn read_partitions(dir: &Path) -> Result<Value, GatewayError> {
    let mut document = Map::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Value::Object(document)),
        Err(e) => return Err(store_error(format!("cannot read store {}", dir.display())).with_cause(e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| store_error("cannot list store partitions").with_cause(e))?;
        let path = entry.path();
        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let bytes = std::fs::read(&path)
            .map_err(|e| store_error(format!("cannot read partition {}", path.display())).with_cause(e))?;
        document.insert(name, DataFormat::Json.decode(&bytes)?);
    }
    Ok(Value::Object(document))
}

/// Staged writes of one store build.
#[derive(Debug)]
pub struct Transaction<'a> {
    store: &'a DataStore,
    staged: BTreeMap<String, Value>,
}

impl Transaction<'_> {
    pub fn write(&mut self, path: &str, value: Value) -> Result<(), GatewayError> {
        storage_segments(path)?;
        self.staged.insert(path.to_string(), value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Make every staged write visible at once.
    pub fn commit(self) -> Result<(), GatewayError> {
        let mut document = Value::Object(Map::new());
        for (path, value) in self.staged {
            insert_at(&mut document, &storage_segments(&path)?, value)?;
        }
        match &self.store.backend {
            Backend::Memory(doc) => {
                let mut doc = doc.write().map_err(|_| store_error("data store lock poisoned"))?;
                *doc = document;
                Ok(())
            }
            Backend::Disk(dir) => commit_partitions(dir, &document),
        }
    }
}

fn commit_partitions(dir: &Path, document: &Value) -> Result<(), GatewayError> {
    let io = |what: String| move |e: std::io::Error| store_error(what).with_cause(e);
    std::fs::create_dir_all(dir).map_err(io(format!("cannot create store directory {}", dir.display())))?;

    let staging = dir.join(format!(".txn-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir(&staging).map_err(io(format!("cannot create {}", staging.display())))?;
    let written = (|| {
        if let Value::Object(partitions) = document {
            for (name, value) in partitions {
                let bytes = serde_json::to_vec(value)
                    .map_err(|e| store_error(format!("cannot encode partition {name}")).with_cause(e))?;
                let file = staging.join(format!("{name}.json"));
                std::fs::write(&file, bytes).map_err(io(format!("cannot write {}", file.display())))?;
            }
        }
        Ok::<(), GatewayError>(())
    })();
    if let Err(e) = written {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }

    let current = dir.join(CURRENT_DIR);
    let retired = dir.join(format!(".old-{}", uuid::Uuid::new_v4()));
    if current.exists() {
        std::fs::rename(&current, &retired).map_err(io(format!("cannot retire {}", current.display())))?;
    }
    if let Err(e) = std::fs::rename(&staging, &current) {
        let _ = std::fs::rename(&retired, &current);
        let _ = std::fs::remove_dir_all(&staging);
        return Err(store_error(format!("cannot commit {}", current.display())).with_cause(e));
    }
    let _ = std::fs::remove_dir_all(&retired);
    Ok(())
}

/// Build a store from local files.
pub async fn build_file_store(spec: &FileStoreSpec) -> Result<Arc<DataStore>, GatewayError> {
    let store = DataStore::new(spec.directory.as_deref());
    let mut txn = store.begin();
    for (storage_path, file) in &spec.files {
        let format = DataFormat::from_extension(file)
            .ok_or_else(|| store_error(format!("cannot tell the format of '{file}'")))?;
        let bytes = tokio::fs::read(file)
            .await
            .map_err(|e| store_error(format!("cannot read data file {file}")).with_cause(e))?;
        let value = format
            .decode(&bytes)
            .map_err(|e| e.with_context(format!("loading {file} into {storage_path}")))?;
        trace_fmt!("DataStore", "Staged {} at {}", file, storage_path);
        txn.write(storage_path, value)?;
    }
    let count = txn.len();
    txn.commit()?;
    debug_fmt!("DataStore", "Committed {} file(s)", count);
    Ok(Arc::new(store))
}

/// Build a store from HTTP endpoints.  Any non-200 response aborts the build.
pub async fn build_http_store(
    spec: &HttpStoreSpec,
    transport: Arc<dyn RoundTripper>,
    cancel: &CancellationToken,
) -> Result<Arc<DataStore>, GatewayError> {
    let store = DataStore::new(spec.directory.as_deref());
    let client = reqwest::Client::new();
    let mut txn = store.begin();
    for (storage_path, url) in &spec.endpoints {
        let request = client
            .get(url)
            .build()
            .map_err(|e| store_error(format!("invalid endpoint {url}")).with_cause(e))?;
        let fetch = async {
            let response = transport.round_trip(request).await?;
            if response.status() != reqwest::StatusCode::OK {
                return Err(store_error(format!("{url} returned {}", response.status())));
            }
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.bytes().await?;
            Ok::<_, GatewayError>((content_type, body))
        };
        let (content_type, body) = tokio::select! {
            _ = cancel.cancelled() => return Err(store_error("data store build cancelled")),
            result = fetch => result?,
        };
        let format = content_type
            .as_deref()
            .and_then(DataFormat::from_media_type)
            .or_else(|| DataFormat::from_extension(url))
            .unwrap_or(DataFormat::Json);
        let value = format
            .decode(&body)
            .map_err(|e| e.with_context(format!("loading {url} into {storage_path}")))?;
        txn.write(storage_path, value)?;
    }
    let count = txn.len();
    txn.commit()?;
    debug_fmt!("DataStore", "Committed {} endpoint(s)", count);
    Ok(Arc::new(store))
}
