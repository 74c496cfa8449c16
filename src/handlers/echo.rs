// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Writes the parsed request back as JSON.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;

use crate::container::{Component, Factory, Resolver, unexpected_spec};
use crate::error::GatewayError;
use crate::manifest::{APP_V1, KIND_ECHO_HANDLER, KindSpec, ManifestObject};
use crate::pipeline::{GatewayRequest, GatewayResponse, Handler, Routes};

#[derive(Debug, Default)]
pub struct EchoHandler;

impl EchoHandler {
    /// The JSON document describing `req`.
    pub async fn describe(req: &GatewayRequest) -> Value {
        let ctx = req.context.read().await;
        let attributes: Map<String, Value> = ctx
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        json!({
            "method": req.method.as_str(),
            "path": req.path,
            "query": req.query_params(),
            "host": req.host.clone().or_else(|| req.header("host").map(str::to_string)),
            "remote": req.remote_addr.map(|a| a.to_string()),
            "header": req.header_map(),
            "body": String::from_utf8_lossy(&req.body),
            "requestId": ctx.request_id,
            "traceId": ctx.trace_id,
            "attributes": attributes,
        })
    }
}

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, req: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        Ok(GatewayResponse::json(200, &Self::describe(&req).await))
    }
}

/// Builds `app/v1 EchoHandler` objects.
#[derive(Debug, Default)]
pub struct EchoHandlerFactory;

#[async_trait]
impl Factory for EchoHandlerFactory {
    fn api_version(&self) -> &'static str {
        APP_V1
    }

    fn kind(&self) -> &'static str {
        KIND_ECHO_HANDLER
    }

    async fn create(&self, _resolver: &Resolver<'_>, object: &ManifestObject) -> Result<Component, GatewayError> {
        let KindSpec::EchoHandler(spec) = &object.spec else {
            return Err(unexpected_spec(object));
        };
        let handler = Arc::new(EchoHandler);
        Ok(Component::new()
            .provide::<dyn Handler>(handler.clone())
            .provide(Arc::new(Routes::from(spec)))
            .provide(handler))
    }
}
