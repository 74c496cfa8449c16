// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bearer token authentication backed by a [`JwtHandler`].

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{authorization_param, store_claims};
use crate::container::{Component, Factory, Resolver, unexpected_spec};
use crate::error::{ErrorHandler, ErrorKind, GatewayError};
use crate::jwt::{JwtHandler, ValidationOptions};
use crate::logging::ComponentLogger;
use crate::manifest::{APP_V1, BearerAuthnSpec, KIND_BEARER_AUTHN, KindSpec, ManifestObject};
use crate::pipeline::{GatewayRequest, GatewayResponse, Handler, Middleware};

#[derive(Debug)]
pub struct BearerAuthn {
    realm: String,
    claims_key: String,
    keep_credentials: bool,
    options: ValidationOptions,
    jwt: Arc<JwtHandler>,
    error_handler: Arc<ErrorHandler>,
    logger: ComponentLogger,
}

impl BearerAuthn {
    pub fn new(
        spec: &BearerAuthnSpec,
        jwt: Arc<JwtHandler>,
        error_handler: Arc<ErrorHandler>,
        logger: ComponentLogger,
    ) -> Self {
        Self {
            realm: spec.realm.clone(),
            claims_key: spec.claims_key.clone(),
            keep_credentials: spec.keep_credentials,
            options: ValidationOptions {
                issuers: spec.issuers.clone(),
                audiences: spec.audiences.clone(),
                required_claims: spec.required_claims.clone(),
                leeway: spec.leeway.as_duration(),
                ..ValidationOptions::default()
            },
            jwt,
            error_handler,
            logger,
        }
    }

    fn challenge(&self, error: Option<&str>, description: &str) -> GatewayError {
        let header = match error {
            Some(code) => format!("Bearer realm=\"{}\", error=\"{code}\"", self.realm),
            None => format!("Bearer realm=\"{}\"", self.realm),
        };
        GatewayError::unauthorized(description).with_header("WWW-Authenticate", header)
    }

    async fn authenticate(&self, req: &GatewayRequest) -> Result<Value, GatewayError> {
        let token = authorization_param(req, "bearer").ok_or_else(|| self.challenge(None, "bearer token required"))?;
        match self.jwt.valid_map_claims_with_cancel(token.trim(), &self.options, &req.cancel).await {
            Ok(claims) => Ok(Value::Object(claims.into_iter().collect())),
            // Key server trouble is not the client's fault.
            Err(e) if e.kind() == ErrorKind::RefreshFailed => Err(e),
            Err(e) => {
                self.logger.info(format_args!("Rejected bearer token: {}", e));
                Err(self.challenge(Some("invalid_token"), "invalid bearer token").with_cause(e))
            }
        }
    }
}

#[async_trait]
impl Middleware for BearerAuthn {
    fn name(&self) -> &str {
        "BearerAuthn"
    }

    async fn handle(&self, mut req: GatewayRequest, next: &dyn Handler) -> Result<GatewayResponse, GatewayError> {
        let claims = match self.authenticate(&req).await {
            Ok(claims) => claims,
            Err(e) => return Ok(self.error_handler.serve_http_error(&req, &e)),
        };
        store_claims(&req, &self.claims_key, claims).await;
        if !self.keep_credentials {
            req.headers.remove("authorization");
        }
        next.handle(req).await
    }
}

/// Builds `app/v1 BearerAuthnMiddleware` objects.
#[derive(Debug, Default)]
pub struct BearerAuthnFactory;

#[async_trait]
impl Factory for BearerAuthnFactory {
    fn api_version(&self) -> &'static str {
        APP_V1
    }

    fn kind(&self) -> &'static str {
        KIND_BEARER_AUTHN
    }

    async fn create(&self, resolver: &Resolver<'_>, object: &ManifestObject) -> Result<Component, GatewayError> {
        let KindSpec::BearerAuthn(spec) = &object.spec else {
            return Err(unexpected_spec(object));
        };
        let middleware = Arc::new(BearerAuthn::new(
            spec,
            resolver.resolve::<JwtHandler>(&spec.jwt_handler).await?,
            resolver.error_handler(spec.error_handler.as_ref()).await?,
            resolver.logger(object, spec.logger.as_ref()).await?,
        ));
        Ok(Component::new()
            .provide::<dyn Middleware>(middleware.clone())
            .provide(middleware))
    }
}
