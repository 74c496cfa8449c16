// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP Basic authentication.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use serde_json::json;
use std::sync::Arc;

use super::credentials::{CredentialOptions, CredentialStore};
use super::{authorization_param, store_claims};
use crate::container::{Component, Factory, Resolver, unexpected_spec};
use crate::error::{ErrorHandler, GatewayError};
use crate::logging::ComponentLogger;
use crate::manifest::{APP_V1, BasicAuthnSpec, KIND_BASIC_AUTHN, KindSpec, ManifestObject};
use crate::pipeline::{GatewayRequest, GatewayResponse, Handler, Middleware};

#[derive(Debug)]
pub struct BasicAuthn {
    realm: String,
    claims_key: String,
    keep_credentials: bool,
    store: CredentialStore,
    error_handler: Arc<ErrorHandler>,
    logger: ComponentLogger,
}

impl BasicAuthn {
    pub fn new(
        spec: &BasicAuthnSpec,
        store: CredentialStore,
        error_handler: Arc<ErrorHandler>,
        logger: ComponentLogger,
    ) -> Self {
        Self {
            realm: spec.realm.clone(),
            claims_key: spec.claims_key.clone(),
            keep_credentials: spec.keep_credentials,
            store,
            error_handler,
            logger,
        }
    }

    fn challenge(&self, description: &str) -> GatewayError {
        GatewayError::unauthorized(description)
            .with_header("WWW-Authenticate", format!("Basic realm=\"{}\"", self.realm))
    }

    /// `(user, password)` from an `Authorization: Basic` header.
    fn credentials(&self, req: &GatewayRequest) -> Result<(String, String), GatewayError> {
        let encoded = authorization_param(req, "basic").ok_or_else(|| self.challenge("basic credentials required"))?;
        let decoded = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| self.challenge("malformed basic credentials"))?;
        let text = String::from_utf8(decoded).map_err(|_| self.challenge("malformed basic credentials"))?;
        let (user, password) = text
            .split_once(':')
            .ok_or_else(|| self.challenge("malformed basic credentials"))?;
        Ok((user.to_string(), password.to_string()))
    }
}

#[async_trait]
impl Middleware for BasicAuthn {
    fn name(&self) -> &str {
        "BasicAuthn"
    }

    async fn handle(&self, mut req: GatewayRequest, next: &dyn Handler) -> Result<GatewayResponse, GatewayError> {
        let (user, password) = match self.credentials(&req) {
            Ok(c) => c,
            Err(e) => return Ok(self.error_handler.serve_http_error(&req, &e)),
        };
        if !self.store.verify(&user, &password) {
            self.logger.info(format_args!("Rejected basic credentials for {}", user));
            let err = self.challenge("invalid username or password");
            return Ok(self.error_handler.serve_http_error(&req, &err));
        }

        self.logger.debug(format_args!("Authenticated {} on {}", user, req.path));
        store_claims(&req, &self.claims_key, json!({ "sub": user })).await;
        if !self.keep_credentials {
            req.headers.remove("authorization");
        }
        next.handle(req).await
    }
}

/// Builds `app/v1 BasicAuthnMiddleware` objects.
#[derive(Debug, Default)]
pub struct BasicAuthnFactory;

#[async_trait]
impl Factory for BasicAuthnFactory {
    fn api_version(&self) -> &'static str {
        APP_V1
    }

    fn kind(&self) -> &'static str {
        KIND_BASIC_AUTHN
    }

    async fn create(&self, resolver: &Resolver<'_>, object: &ManifestObject) -> Result<Component, GatewayError> {
        let KindSpec::BasicAuthn(spec) = &object.spec else {
            return Err(unexpected_spec(object));
        };
        let store = CredentialStore::load(&CredentialOptions {
            env_provider: spec.env_provider.as_ref(),
            file_provider: spec.file_provider.as_ref(),
            password_crypt: spec.password_crypt,
            common_key_crypt_type: spec.common_key_crypt_type,
            crypt_secret: spec.crypt_secret.as_deref(),
        })?;
        let middleware = Arc::new(BasicAuthn::new(
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
