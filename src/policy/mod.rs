// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rego policy evaluation.
//!
//! Each `regos[]` entry of an authorization spec becomes one
//! [`PreparedQuery`]: an engine loaded with the policy files, bundle modules
//! and store documents of that entry, compiled once at construction.  Every
//! evaluation runs on a private clone of the engine, so a prepared query can
//! be shared by any number of concurrent requests.
//!
//! [`PolicyEvaluator`] walks its queries in declaration order and allows the
//! request as soon as one of them does.  A query that fails to evaluate
//! counts as a denial.

pub mod bundle;
pub mod store;

#[cfg(test)]
mod tests;

pub use bundle::{Bundle, MAX_BUNDLE_LEN, canonical_json, file_digest, inflate, load_bundle};
pub use store::{DataFormat, DataStore, Transaction, build_file_store, build_http_store};

use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, GatewayError};
use crate::logging::ComponentLogger;
use crate::manifest::RegoSpec;
use crate::pipeline::RoundTripper;
use crate::{debug_fmt, warn_fmt};

fn compile_error(description: impl Into<String>) -> GatewayError {
    GatewayError::new(ErrorKind::PolicyCompile, description).with_package("gatehouse::policy")
}

fn eval_error(query: &str, detail: impl Into<String>) -> GatewayError {
    GatewayError::new(ErrorKind::PolicyEvalFailure, format!("evaluation of {query} failed"))
        .with_package("gatehouse::policy")
        .with_detail(detail)
}

/// Outbound transports used while preparing a query.
#[derive(Debug, Clone)]
pub struct QueryTransports {
    /// Bundle downloads.
    pub bundles: Arc<dyn RoundTripper>,
    /// HTTP data store endpoints.
    pub store: Arc<dyn RoundTripper>,
}

/// A compiled, immutable query.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    query: String,
    engine: regorus::Engine,
    print_statements: bool,
    revisions: Vec<String>,
}

impl PreparedQuery {
    /// Load every source named by `spec` and compile the query.
    pub async fn prepare(
        spec: &RegoSpec,
        transports: &QueryTransports,
        cancel: &CancellationToken,
    ) -> Result<Self, GatewayError> {
        let mut engine = regorus::Engine::new();
        engine.set_strict_builtin_errors(spec.strict_builtin_errors);
        engine.set_gather_prints(spec.enable_print_statements);

        for path in &spec.policy_files {
            let source = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| compile_error(format!("cannot read policy file {path}")).with_cause(e))?;
            engine
                .add_policy(path.clone(), source)
                .map_err(|e| compile_error(format!("cannot compile {path}")).with_detail(e.to_string()))?;
        }

        let verification = if spec.skip_bundle_verification {
            None
        } else {
            spec.bundle_verification.as_ref()
        };
        let mut revisions = Vec::new();
        for path in &spec.bundle_paths {
            let loaded = load_bundle(path, verification, transports.bundles.clone(), cancel).await?;
            for (module, source) in loaded.policies {
                engine
                    .add_policy(format!("{path}#{module}"), source)
                    .map_err(|e| compile_error(format!("cannot compile {module} of {path}")).with_detail(e.to_string()))?;
            }
            add_data(&mut engine, loaded.data, path)?;
            revisions.extend(loaded.revision);
        }

        if let Some(file_store) = &spec.file_store {
            let store = build_file_store(file_store).await?;
            add_data(&mut engine, store.document()?, "file store")?;
        }
        if let Some(http_store) = &spec.http_store {
            let store = build_http_store(http_store, transports.store.clone(), cancel).await?;
            add_data(&mut engine, store.document()?, "http store")?;
        }

        let prepared = Self {
            query: spec.query_parameter.clone(),
            engine,
            print_statements: spec.enable_print_statements,
            revisions,
        };
        if spec.strict {
            prepared
                .run(&Value::Object(Map::new()))
                .map_err(|e| compile_error(format!("query {} does not evaluate", prepared.query)).with_cause(e))?;
        }
        debug_fmt!("PreparedQuery", "Prepared {}", prepared.query);
        Ok(prepared)
    }

    /// A query over in-memory modules, mostly useful to embedders.
    pub fn from_modules(query: &str, modules: &[(&str, &str)], data: Option<Value>) -> Result<Self, GatewayError> {
        let mut engine = regorus::Engine::new();
        for (name, source) in modules {
            engine
                .add_policy(name.to_string(), source.to_string())
                .map_err(|e| compile_error(format!("cannot compile {name}")).with_detail(e.to_string()))?;
        }
        if let Some(data) = data {
            add_data(&mut engine, data, "data")?;
        }
        Ok(Self {
            query: query.to_string(),
            engine,
            print_statements: false,
            revisions: Vec::new(),
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Revisions of the bundles this query was built from.
    pub fn revisions(&self) -> &[String] {
        &self.revisions
    }

    fn run(&self, input: &Value) -> Result<(bool, Vec<String>), GatewayError> {
        let mut engine = self.engine.clone();
        engine.set_input(input.clone().into());
        let results = engine
            .eval_query(self.query.clone(), false)
            .map_err(|e| eval_error(&self.query, e.to_string()))?;
        let allowed = results.result.iter().any(|r| {
            !r.expressions.is_empty()
                && r.expressions.iter().all(|expr| matches!(expr.value, regorus::Value::Bool(true)))
        });
        let prints = if self.print_statements {
            engine.take_prints().unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok((allowed, prints))
    }

    /// Evaluate against `input`.  Print output and, when `trace` is set, the
    /// decision are flushed to `logger` at DEBUG.
    pub fn evaluate(&self, input: &Value, logger: &ComponentLogger, trace: bool) -> Result<bool, GatewayError> {
        let (allowed, prints) = self.run(input)?;
        for line in prints {
            logger.debug(format_args!("[{}] {}", self.query, line));
        }
        if trace {
            logger.debug(format_args!("{} with input {} => {}", self.query, input, allowed));
        }
        Ok(allowed)
    }
}

fn add_data(engine: &mut regorus::Engine, data: Value, origin: &str) -> Result<(), GatewayError> {
    if data.as_object().is_some_and(Map::is_empty) {
        return Ok(());
    }
    engine
        .add_data(data.into())
        .map_err(|e| compile_error(format!("cannot add data from {origin}")).with_detail(e.to_string()))
}

/// The outcome of walking every prepared query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The query at this index allowed the request.
    Allowed(usize),
    Denied,
}

/// Ordered prepared queries; the first allow wins.
#[derive(Debug, Clone, Default)]
pub struct PolicyEvaluator {
    queries: Vec<Arc<PreparedQuery>>,
    trace: bool,
}

impl PolicyEvaluator {
    pub fn new(queries: Vec<PreparedQuery>, trace: bool) -> Self {
        Self {
            queries: queries.into_iter().map(Arc::new).collect(),
            trace,
        }
    }

    /// Prepare one query per spec, in order.
    pub async fn prepare(
        specs: &[RegoSpec],
        transports: &[QueryTransports],
        trace: bool,
        cancel: &CancellationToken,
    ) -> Result<Self, GatewayError> {
        if specs.len() != transports.len() {
            return Err(compile_error("every rego entry needs its transports"));
        }
        let mut queries = Vec::with_capacity(specs.len());
        for (spec, transport) in specs.iter().zip(transports) {
            queries.push(PreparedQuery::prepare(spec, transport, cancel).await?);
        }
        Ok(Self::new(queries, trace))
    }

    pub fn queries(&self) -> &[Arc<PreparedQuery>] {
        &self.queries
    }

    pub fn decide(&self, input: &Value, logger: &ComponentLogger, cancel: &CancellationToken) -> Decision {
        for (index, query) in self.queries.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            match query.evaluate(input, logger, self.trace) {
                Ok(true) => return Decision::Allowed(index),
                Ok(false) => {}
                Err(e) => warn_fmt!("PolicyEvaluator", "{}", e),
            }
        }
        Decision::Denied
    }
}
