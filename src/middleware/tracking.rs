// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request and trace identifiers.

use async_trait::async_trait;
use rand::RngCore;
use std::sync::Arc;

use crate::codec::IdEncoding;
use crate::container::{Component, Factory, Resolver, unexpected_spec};
use crate::error::{ErrorHandler, GatewayError};
use crate::manifest::{APP_V1, KIND_TRACKING, KindSpec, ManifestObject, TrackingSpec};
use crate::pipeline::{GatewayRequest, GatewayResponse, Handler, Middleware};
use crate::trace_fmt;

const ID_BYTES: usize = 16;

/// An incoming trace ID longer than this is ignored.
const MAX_EXTRACTED_LEN: usize = 256;

#[derive(Debug)]
pub struct Tracking {
    encoding: IdEncoding,
    request_id_proxy_name: Option<String>,
    trace_id_proxy_name: Option<String>,
    trace_id_extract_name: Option<String>,
    error_handler: Arc<ErrorHandler>,
}

impl Tracking {
    pub fn new(spec: &TrackingSpec, error_handler: Arc<ErrorHandler>) -> Self {
        Self {
            encoding: spec.encoding,
            request_id_proxy_name: spec.request_id_proxy_name.clone(),
            trace_id_proxy_name: spec.trace_id_proxy_name.clone(),
            trace_id_extract_name: spec.trace_id_extract_name.clone(),
            error_handler,
        }
    }

    pub fn new_id(&self) -> String {
        let mut bytes = [0u8; ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        self.encoding.encode(&bytes)
    }

    fn extracted_trace_id(&self, req: &GatewayRequest) -> Option<String> {
        let name = self.trace_id_extract_name.as_deref()?;
        req.header(name)
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.len() <= MAX_EXTRACTED_LEN)
            .map(str::to_string)
    }
}

#[async_trait]
impl Middleware for Tracking {
    fn name(&self) -> &str {
        "Tracking"
    }

    async fn handle(&self, req: GatewayRequest, next: &dyn Handler) -> Result<GatewayResponse, GatewayError> {
        let request_id = self.new_id();
        let trace_id = self.extracted_trace_id(&req).unwrap_or_else(|| self.new_id());
        {
            let mut ctx = req.context.write().await;
            ctx.request_id = Some(request_id.clone());
            ctx.trace_id = Some(trace_id.clone());
        }
        trace_fmt!("Tracking", "{} {} request={} trace={}", req.method, req.path, request_id, trace_id);

        let mut req = req;
        let proxied = [
            (self.request_id_proxy_name.as_deref(), &request_id),
            (self.trace_id_proxy_name.as_deref(), &trace_id),
        ];
        for (name, value) in proxied {
            if let Some(name) = name {
                req.headers.remove(name);
                req = req.with_header(name, value);
            }
        }

        let mut response = match next.handle(req.clone()).await {
            Ok(response) => response,
            Err(e) => self.error_handler.serve_http_error(&req, &e),
        };
        for (name, value) in proxied {
            if let Some(name) = name {
                response = response.with_header(name, value);
            }
        }
        Ok(response)
    }
}

/// Identifiers set by [`Tracking`] on `req`, if it ran.
pub async fn ids(req: &GatewayRequest) -> (Option<String>, Option<String>) {
    let ctx = req.context.read().await;
    (ctx.request_id.clone(), ctx.trace_id.clone())
}

/// Builds `app/v1 TrackingMiddleware` objects.
#[derive(Debug, Default)]
pub struct TrackingFactory;

#[async_trait]
impl Factory for TrackingFactory {
    fn api_version(&self) -> &'static str {
        APP_V1
    }

    fn kind(&self) -> &'static str {
        KIND_TRACKING
    }

    async fn create(&self, resolver: &Resolver<'_>, object: &ManifestObject) -> Result<Component, GatewayError> {
        let KindSpec::Tracking(spec) = &object.spec else {
            return Err(unexpected_spec(object));
        };
        let tracking = Arc::new(Tracking::new(spec, resolver.error_handler(spec.error_handler.as_ref()).await?));
        Ok(Component::new()
            .provide::<dyn Middleware>(tracking.clone())
            .provide(tracking))
    }
}
