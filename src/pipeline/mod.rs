// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pipeline engine – handlers, middleware and their outbound analogues.
//!
//! A [`Pipeline`] applies `[m1, m2, …, mn]` around a terminal handler `h` so
//! that a request flows through `m1(m2(…mn(h)))`.  Middleware may
//! short-circuit by returning a response without calling `next`.  Outbound
//! calls use the same shape: a [`RoundTripper`] wrapped by [`Tripperware`].

mod request;
pub mod skipper;

#[cfg(test)]
mod tests;

pub use request::{GatewayRequest, GatewayResponse, HttpMethod, RequestContext};
pub use skipper::{Matcher, SkipCondition, Skipper, SkipperFactory};

use async_trait::async_trait;
use futures_util::FutureExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::error::{ErrorKind, GatewayError};
use crate::{error_fmt, trace_fmt};

/// Produces a response for a request.
#[async_trait]
pub trait Handler: fmt::Debug + Send + Sync {
    async fn handle(&self, req: GatewayRequest) -> Result<GatewayResponse, GatewayError>;
}

/// Intercepts a request on its way to `next`.
#[async_trait]
pub trait Middleware: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, req: GatewayRequest, next: &dyn Handler) -> Result<GatewayResponse, GatewayError>;
}

/// Where a terminal handler is mounted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Routes {
    pub patterns: Vec<String>,
    /// Empty means any method.
    pub methods: Vec<HttpMethod>,
}

impl Routes {
    pub fn allows(&self, method: HttpMethod) -> bool {
        self.methods.is_empty() || self.methods.contains(&method)
    }
}

/// The remainder of a middleware chain, ending in a terminal handler.
#[derive(Debug)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    terminal: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [Arc<dyn Middleware>], terminal: &'a dyn Handler) -> Self {
        Self { chain, terminal }
    }
}

#[async_trait]
impl<'a> Handler for Next<'a> {
    async fn handle(&self, req: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        match self.chain.split_first() {
            Some((head, rest)) => {
                trace_fmt!("Pipeline", "Entering middleware {}", head.name());
                head.handle(req, &Next::new(rest, self.terminal)).await
            }
            None => self.terminal.handle(req).await,
        }
    }
}

/// A middleware chain bound to its terminal handler.
///
/// Panics raised anywhere inside the chain are recovered here and reported
/// as `Internal`.
#[derive(Debug, Clone)]
pub struct Pipeline {
    middleware: Vec<Arc<dyn Middleware>>,
    terminal: Arc<dyn Handler>,
}

impl Pipeline {
    pub fn new(middleware: Vec<Arc<dyn Middleware>>) -> PipelineBuilder {
        PipelineBuilder { middleware }
    }

    pub fn middleware(&self) -> &[Arc<dyn Middleware>] {
        &self.middleware
    }
}

/// Collects middleware until the terminal handler is known.
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl PipelineBuilder {
    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn then(self, terminal: Arc<dyn Handler>) -> Pipeline {
        Pipeline {
            middleware: self.middleware,
            terminal,
        }
    }
}

#[async_trait]
impl Handler for Pipeline {
    async fn handle(&self, req: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let next = Next::new(&self.middleware, self.terminal.as_ref());
        match AssertUnwindSafe(next.handle(req)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error_fmt!("Pipeline", "Recovered panic: {}", message);
                Err(GatewayError::new(ErrorKind::Internal, "panic recovered in pipeline").with_detail(message))
            }
        }
    }
}

/// Performs one outbound HTTP exchange.
#[async_trait]
pub trait RoundTripper: fmt::Debug + Send + Sync {
    async fn round_trip(&self, req: reqwest::Request) -> Result<reqwest::Response, GatewayError>;
}

/// The outbound analogue of [`Middleware`].
#[async_trait]
pub trait Tripperware: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    async fn round_trip(
        &self,
        req: reqwest::Request,
        next: &dyn RoundTripper,
    ) -> Result<reqwest::Response, GatewayError>;
}

/// Sends requests with a `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ClientRoundTripper {
    client: reqwest::Client,
}

impl ClientRoundTripper {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl RoundTripper for ClientRoundTripper {
    async fn round_trip(&self, req: reqwest::Request) -> Result<reqwest::Response, GatewayError> {
        Ok(self.client.execute(req).await?)
    }
}

/// The remainder of a tripperware chain, ending in a transport.
#[derive(Debug)]
pub struct NextTrip<'a> {
    chain: &'a [Arc<dyn Tripperware>],
    transport: &'a dyn RoundTripper,
}

impl<'a> NextTrip<'a> {
    pub fn new(chain: &'a [Arc<dyn Tripperware>], transport: &'a dyn RoundTripper) -> Self {
        Self { chain, transport }
    }
}

#[async_trait]
impl<'a> RoundTripper for NextTrip<'a> {
    async fn round_trip(&self, req: reqwest::Request) -> Result<reqwest::Response, GatewayError> {
        match self.chain.split_first() {
            Some((head, rest)) => head.round_trip(req, &NextTrip::new(rest, self.transport)).await,
            None => self.transport.round_trip(req).await,
        }
    }
}

/// A transport wrapped by tripperware, outermost first.
#[derive(Debug, Clone)]
pub struct TripperwareChain {
    tripperware: Vec<Arc<dyn Tripperware>>,
    transport: Arc<dyn RoundTripper>,
}

impl TripperwareChain {
    pub fn new(tripperware: Vec<Arc<dyn Tripperware>>, transport: Arc<dyn RoundTripper>) -> Self {
        Self {
            tripperware,
            transport,
        }
    }
}

#[async_trait]
impl RoundTripper for TripperwareChain {
    async fn round_trip(&self, req: reqwest::Request) -> Result<reqwest::Response, GatewayError> {
        NextTrip::new(&self.tripperware, self.transport.as_ref()).round_trip(req).await
    }
}

/// Sets fixed headers on outbound requests.
#[derive(Debug, Clone, Default)]
pub struct HeaderTripperware {
    headers: HeaderMap,
}

impl HeaderTripperware {
    pub fn new(headers: &BTreeMap<String, String>) -> Result<Self, GatewayError> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| GatewayError::wrap(ErrorKind::ManifestInvalid, format!("invalid header name '{name}'"), e))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| GatewayError::wrap(ErrorKind::ManifestInvalid, format!("invalid value for header '{name}'"), e))?;
            map.insert(name, value);
        }
        Ok(Self { headers: map })
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

#[async_trait]
impl Tripperware for HeaderTripperware {
    fn name(&self) -> &str {
        "header"
    }

    async fn round_trip(
        &self,
        mut req: reqwest::Request,
        next: &dyn RoundTripper,
    ) -> Result<reqwest::Response, GatewayError> {
        for (name, value) in &self.headers {
            req.headers_mut().insert(name.clone(), value.clone());
        }
        next.round_trip(req).await
    }
}

/// Build a transport from an optional configured client plus fixed headers.
pub fn outbound_transport(
    round_tripper: Option<Arc<dyn RoundTripper>>,
    headers: &BTreeMap<String, String>,
) -> Result<Arc<dyn RoundTripper>, GatewayError> {
    let transport = round_tripper.unwrap_or_else(|| Arc::new(ClientRoundTripper::default()));
    if headers.is_empty() {
        return Ok(transport);
    }
    let header = Arc::new(HeaderTripperware::new(headers)?);
    Ok(Arc::new(TripperwareChain::new(vec![header], transport)))
}
