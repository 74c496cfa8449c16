// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rego-based authorization.
//!
//! The policy input is
//!
//! ```text
//! { auth, host, remote, method, api, query, header, env }
//! ```
//!
//! where `auth` holds the claims stored by an earlier authentication
//! middleware under `claimsKey` and `env` carries the process facts enabled
//! by `envData`.  The request is forwarded when any query allows it and
//! rejected as `Forbidden` otherwise.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::claims;
use crate::container::{Component, Factory, Resolver, unexpected_spec};
use crate::error::{ErrorHandler, GatewayError};
use crate::logging::ComponentLogger;
use crate::manifest::{APP_V1, EnvDataSpec, KIND_OPA_AUTHZ, KindSpec, ManifestObject, OpaAuthzSpec};
use crate::pipeline::{GatewayRequest, GatewayResponse, Handler, Middleware, RoundTripper, outbound_transport};
use crate::policy::{Decision, PolicyEvaluator, QueryTransports};

/// The `env` object of the policy input, fixed at construction.
pub fn env_data(spec: &EnvDataSpec) -> Value {
    let mut env = Map::new();
    if !spec.vars.is_empty() {
        let vars: Map<String, Value> = spec
            .vars
            .iter()
            .map(|name| (name.clone(), Value::String(std::env::var(name).unwrap_or_default())))
            .collect();
        env.insert("vars".to_string(), Value::Object(vars));
    }
    if spec.pid {
        env.insert("pid".to_string(), json!(std::process::id()));
    }
    #[cfg(unix)]
    {
        if spec.ppid {
            env.insert("ppid".to_string(), json!(std::os::unix::process::parent_id()));
        }
        if let Some((uid, gid)) = process_owner() {
            if spec.uid {
                env.insert("uid".to_string(), json!(uid));
            }
            if spec.gid {
                env.insert("gid".to_string(), json!(gid));
            }
        }
    }
    Value::Object(env)
}

/// User and group owning this process, read from `/proc/self`.
#[cfg(unix)]
fn process_owner() -> Option<(u32, u32)> {
    use std::os::unix::fs::MetadataExt;

    std::fs::metadata("/proc/self").ok().map(|meta| (meta.uid(), meta.gid()))
}

#[derive(Debug)]
pub struct OpaAuthz {
    claims_key: String,
    env: Value,
    evaluator: PolicyEvaluator,
    error_handler: Arc<ErrorHandler>,
    logger: ComponentLogger,
}

impl OpaAuthz {
    pub fn new(
        claims_key: impl Into<String>,
        env: Value,
        evaluator: PolicyEvaluator,
        error_handler: Arc<ErrorHandler>,
        logger: ComponentLogger,
    ) -> Self {
        Self {
            claims_key: claims_key.into(),
            env,
            evaluator,
            error_handler,
            logger,
        }
    }

    pub async fn input(&self, req: &GatewayRequest) -> Value {
        let host = req
            .host
            .clone()
            .or_else(|| req.header("host").map(str::to_string))
            .unwrap_or_default();
        json!({
            "auth": claims(req, &self.claims_key).await.unwrap_or(Value::Null),
            "host": host,
            "remote": req.remote_addr.map(|a| a.to_string()).unwrap_or_default(),
            "method": req.method.as_str(),
            "api": req.path,
            "query": req.query_params(),
            "header": req.header_map(),
            "env": self.env,
        })
    }
}

#[async_trait]
impl Middleware for OpaAuthz {
    fn name(&self) -> &str {
        "OPAAuthz"
    }

    async fn handle(&self, req: GatewayRequest, next: &dyn Handler) -> Result<GatewayResponse, GatewayError> {
        let input = self.input(&req).await;
        match self.evaluator.decide(&input, &self.logger, &req.cancel) {
            Decision::Allowed(index) => {
                self.logger.debug(format_args!("{} {} allowed by query #{}", req.method, req.path, index));
                next.handle(req).await
            }
            Decision::Denied => Ok(self.error_handler.serve_http_error(&req, &GatewayError::forbidden())),
        }
    }
}

/// Builds `app/v1 OPAAuthzMiddleware` objects.
#[derive(Debug, Default)]
pub struct OpaAuthzFactory;

impl OpaAuthzFactory {
    async fn transports(resolver: &Resolver<'_>, spec: &OpaAuthzSpec) -> Result<Vec<QueryTransports>, GatewayError> {
        let mut out = Vec::with_capacity(spec.regos.len());
        for rego in &spec.regos {
            let bundle_client = resolver.resolve_opt::<dyn RoundTripper>(rego.round_tripper.as_ref()).await?;
            let store_client = match &rego.http_store {
                Some(store) => resolver.resolve_opt::<dyn RoundTripper>(store.round_tripper.as_ref()).await?,
                None => None,
            };
            let store_headers = rego.http_store.as_ref().map(|s| s.header.clone()).unwrap_or_default();
            out.push(QueryTransports {
                bundles: outbound_transport(bundle_client, &rego.header)?,
                store: outbound_transport(store_client, &store_headers)?,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl Factory for OpaAuthzFactory {
    fn api_version(&self) -> &'static str {
        APP_V1
    }

    fn kind(&self) -> &'static str {
        KIND_OPA_AUTHZ
    }

    async fn create(&self, resolver: &Resolver<'_>, object: &ManifestObject) -> Result<Component, GatewayError> {
        let KindSpec::OpaAuthz(spec) = &object.spec else {
            return Err(unexpected_spec(object));
        };
        let transports = Self::transports(resolver, spec).await?;
        let evaluator =
            PolicyEvaluator::prepare(&spec.regos, &transports, spec.enable_trace, &CancellationToken::new()).await?;
        let logger = resolver.logger(object, spec.logger.as_ref()).await?;
        logger.info(format_args!("{} prepared {} query(ies)", object.identity, evaluator.queries().len()));

        let middleware = Arc::new(OpaAuthz::new(
            spec.claims_key.clone(),
            env_data(&spec.env_data),
            evaluator,
            resolver.error_handler(spec.error_handler.as_ref()).await?,
            logger,
        ));
        Ok(Component::new()
            .provide::<dyn Middleware>(middleware.clone())
            .provide(middleware))
    }
}
