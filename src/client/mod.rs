// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Outbound HTTP clients (`core/v1 HTTPClient`).
//!
//! A client is a `reqwest::Client` wrapped by the tripperware named in its
//! manifest.  It is consumed as a `dyn RoundTripper` by the JWT handler,
//! bundle downloads and HTTP policy stores.


use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::container::{Component, Factory, Resolver, unexpected_spec};
use crate::error::GatewayError;
use crate::manifest::{CORE_V1, HttpClientSpec, KIND_HTTP_CLIENT, KindSpec, ManifestObject};
use crate::pipeline::{ClientRoundTripper, RoundTripper, Tripperware, TripperwareChain};
use crate::debug_fmt;

/// A configured outbound client.
#[derive(Debug, Clone)]
pub struct HttpClient {
    transport: Arc<dyn RoundTripper>,
    request_timeout: Option<Duration>,
}

impl HttpClient {
    pub fn new(spec: &HttpClientSpec, tripperware: Vec<Arc<dyn Tripperware>>) -> Result<Self, GatewayError> {
        let mut builder = reqwest::Client::builder();
        if let Some(d) = spec.connect_timeout {
            builder = builder.connect_timeout(d.as_duration());
        }
        if let Some(d) = spec.pool_idle_timeout {
            builder = builder.pool_idle_timeout(d.as_duration());
        }
        if let Some(n) = spec.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let client = builder.build()?;

        let base: Arc<dyn RoundTripper> = Arc::new(ClientRoundTripper::new(client));
        let transport: Arc<dyn RoundTripper> = if tripperware.is_empty() {
            base
        } else {
            Arc::new(TripperwareChain::new(tripperware, base))
        };
        Ok(Self {
            transport,
            request_timeout: spec.request_timeout.map(|d| d.as_duration()),
        })
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }
}

#[async_trait]
impl RoundTripper for HttpClient {
    async fn round_trip(&self, req: reqwest::Request) -> Result<reqwest::Response, GatewayError> {
        let Some(limit) = self.request_timeout else {
            return self.transport.round_trip(req).await;
        };
        match tokio::time::timeout(limit, self.transport.round_trip(req)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::timeout(limit)),
        }
    }
}

/// Builds `core/v1 HTTPClient` objects.
#[derive(Debug, Default)]
pub struct HttpClientFactory;

#[async_trait]
impl Factory for HttpClientFactory {
    fn api_version(&self) -> &'static str {
        CORE_V1
    }

    fn kind(&self) -> &'static str {
        KIND_HTTP_CLIENT
    }

    async fn create(&self, resolver: &Resolver<'_>, object: &ManifestObject) -> Result<Component, GatewayError> {
        let KindSpec::HttpClient(spec) = &object.spec else {
            return Err(unexpected_spec(object));
        };
        let tripperware = resolver.resolve_each::<dyn Tripperware>(&spec.tripperware).await?;
        debug_fmt!("HttpClient", "{} wraps {} tripperware", object.identity, tripperware.len());
        let client = Arc::new(HttpClient::new(spec, tripperware)?);
        Ok(Component::new()
            .provide::<dyn RoundTripper>(client.clone())
            .provide(client))
    }
}
