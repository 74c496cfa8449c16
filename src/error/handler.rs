// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rendering of errors onto the HTTP surface.

use async_trait::async_trait;
use log::Level;
use reqwest::StatusCode;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use super::{ErrorKind, GatewayError};
use crate::container::{Component, Factory, Resolver, unexpected_spec};
use crate::logging::ComponentLogger;
use crate::manifest::{CORE_V1, KIND_ERROR_HANDLER, KindSpec, ManifestObject};
use crate::pipeline::{GatewayRequest, GatewayResponse};

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    status: u16,
    #[serde(rename = "statusText")]
    status_text: &'a str,
}

/// Response formats an error can be rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFormat {
    Json,
    Text,
    Xml,
    Html,
}

impl ErrorFormat {
    /// Pick a format from an `Accept` header, honouring q-values.
    /// JSON is used when nothing acceptable is offered.
    pub fn negotiate(accept: Option<&str>) -> Self {
        let Some(accept) = accept else {
            return ErrorFormat::Json;
        };
        let mut ranges: Vec<(f32, &str)> = accept
            .split(',')
            .filter_map(|part| {
                let mut params = part.split(';');
                let media = params.next()?.trim();
                let q = params
                    .filter_map(|p| p.trim().strip_prefix("q="))
                    .find_map(|q| q.parse::<f32>().ok())
                    .unwrap_or(1.0);
                (q > 0.0 && !media.is_empty()).then_some((q, media))
            })
            .collect();
        // Stable sort keeps declaration order among equal weights.
        ranges.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        ranges
            .into_iter()
            .find_map(|(_, media)| match media.to_ascii_lowercase().as_str() {
                "application/json" | "application/*" | "*/*" => Some(ErrorFormat::Json),
                "text/plain" | "text/*" => Some(ErrorFormat::Text),
                "application/xml" | "text/xml" => Some(ErrorFormat::Xml),
                "text/html" | "application/xhtml+xml" => Some(ErrorFormat::Html),
                _ => None,
            })
            .unwrap_or(ErrorFormat::Json)
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ErrorFormat::Json => "application/json; charset=utf-8",
            ErrorFormat::Text => "text/plain; charset=utf-8",
            ErrorFormat::Xml => "application/xml; charset=utf-8",
            ErrorFormat::Html => "text/html; charset=utf-8",
        }
    }
}

/// Maps error kinds to statuses and renders the response body.
#[derive(Debug, Clone)]
pub struct ErrorHandler {
    overrides: HashMap<ErrorKind, u16>,
    logger: ComponentLogger,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new(HashMap::new(), ComponentLogger::for_component(KIND_ERROR_HANDLER))
    }
}

impl ErrorHandler {
    pub fn new(overrides: HashMap<ErrorKind, u16>, logger: ComponentLogger) -> Self {
        Self { overrides, logger }
    }

    pub fn status_for(&self, kind: ErrorKind) -> u16 {
        self.overrides.get(&kind).copied().unwrap_or_else(|| kind.status())
    }

    /// Render `err` without logging it.
    pub fn render(&self, err: &GatewayError, accept: Option<&str>) -> GatewayResponse {
        let status = self.status_for(err.kind());
        let text = StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown");
        let format = ErrorFormat::negotiate(accept);

        let body = match format {
            ErrorFormat::Json => serde_json::to_vec(&ErrorBody {
                status,
                status_text: text,
            })
            .unwrap_or_default(),
            ErrorFormat::Text => format!("{status} {text}").into_bytes(),
            ErrorFormat::Xml => format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?><error><status>{status}</status><statusText>{text}</statusText></error>"
            )
            .into_bytes(),
            ErrorFormat::Html => format!(
                "<!DOCTYPE html><html><head><title>{status} {text}</title></head><body><h1>{status} {text}</h1></body></html>"
            )
            .into_bytes(),
        };

        let mut response = GatewayResponse::new(status)
            .with_body(format.content_type(), body)
            .with_header("x-content-type-options", "nosniff");
        for (name, value) in err.headers() {
            response = response.with_header(name, value);
        }
        response
    }

    /// Log `err` and render it for `req`.
    pub fn serve_http_error(&self, req: &GatewayRequest, err: &GatewayError) -> GatewayResponse {
        let status = self.status_for(err.kind());
        let level = if status >= 500 { Level::Error } else { Level::Info };
        self.logger.log(
            level,
            format_args!("{} {} -> {}: {}", req.method, req.path, status, err),
        );
        self.render(err, req.header("accept"))
    }
}

/// Builds `core/v1 ErrorHandler` objects.
#[derive(Debug, Default)]
pub struct ErrorHandlerFactory;

#[async_trait]
impl Factory for ErrorHandlerFactory {
    fn api_version(&self) -> &'static str {
        CORE_V1
    }

    fn kind(&self) -> &'static str {
        KIND_ERROR_HANDLER
    }

    async fn create(&self, resolver: &Resolver<'_>, object: &ManifestObject) -> Result<Component, GatewayError> {
        let KindSpec::ErrorHandler(spec) = &object.spec else {
            return Err(unexpected_spec(object));
        };
        let mut overrides = HashMap::new();
        for (label, status) in &spec.status_overrides {
            overrides.insert(ErrorKind::from_str(label)?, *status);
        }
        let logger = resolver.logger(object, None).await?;
        Ok(Component::new().provide(Arc::new(ErrorHandler::new(overrides, logger))))
    }
}
