// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request metrics in the Prometheus text format.
//!
//! A [`PrometheusMeter`] is both a middleware, counting requests and
//! observing their latency, and the handler exposing what it counted.  Each
//! meter owns its own recorder so several servers can be measured apart.

use async_trait::async_trait;
use metrics::{counter, describe_counter, describe_histogram, histogram, with_local_recorder};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::container::{Component, Factory, Resolver, unexpected_spec};
use crate::error::{ErrorKind, GatewayError};
use crate::manifest::{APP_V1, KIND_PROMETHEUS_METER, KindSpec, ManifestObject};
use crate::pipeline::{GatewayRequest, GatewayResponse, Handler, Middleware, Routes};

pub const REQUESTS_TOTAL: &str = "gatehouse_http_requests_total";
pub const REQUEST_DURATION: &str = "gatehouse_http_request_duration_seconds";

const BUCKETS: [f64; 12] = [0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

pub struct PrometheusMeter {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl fmt::Debug for PrometheusMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrometheusMeter").finish_non_exhaustive()
    }
}

impl PrometheusMeter {
    pub fn new() -> Result<Self, GatewayError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets(&BUCKETS)
            .map_err(|e| GatewayError::wrap(ErrorKind::Internal, "cannot configure metric buckets", e))?
            .build_recorder();
        let handle = recorder.handle();
        with_local_recorder(&recorder, || {
            describe_counter!(REQUESTS_TOTAL, "Requests served, by method and status code");
            describe_histogram!(REQUEST_DURATION, "Request latency in seconds, by method");
        });
        Ok(Self { recorder, handle })
    }

    pub fn record(&self, method: &'static str, status: u16, seconds: f64) {
        with_local_recorder(&self.recorder, || {
            counter!(REQUESTS_TOTAL, "method" => method, "code" => status.to_string()).increment(1);
            histogram!(REQUEST_DURATION, "method" => method).record(seconds);
        });
    }

    /// Current values in the exposition format.
    pub fn render(&self) -> String {
        self.handle.run_upkeep();
        self.handle.render()
    }
}

#[async_trait]
impl Middleware for PrometheusMeter {
    fn name(&self) -> &str {
        "PrometheusMeter"
    }

    async fn handle(&self, req: GatewayRequest, next: &dyn Handler) -> Result<GatewayResponse, GatewayError> {
        let method = req.method.as_str();
        let started = Instant::now();
        let result = next.handle(req).await;
        let status = match &result {
            Ok(response) => response.status,
            Err(e) => e.status(),
        };
        self.record(method, status, started.elapsed().as_secs_f64());
        result
    }
}

#[async_trait]
impl Handler for PrometheusMeter {
    async fn handle(&self, _req: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        Ok(GatewayResponse::new(200).with_body("text/plain; version=0.0.4; charset=utf-8", self.render()))
    }
}

/// Builds `app/v1 PrometheusMeter` objects.
#[derive(Debug, Default)]
pub struct PrometheusMeterFactory;

#[async_trait]
impl Factory for PrometheusMeterFactory {
    fn api_version(&self) -> &'static str {
        APP_V1
    }

    fn kind(&self) -> &'static str {
        KIND_PROMETHEUS_METER
    }

    async fn create(&self, _resolver: &Resolver<'_>, object: &ManifestObject) -> Result<Component, GatewayError> {
        let KindSpec::PrometheusMeter(spec) = &object.spec else {
            return Err(unexpected_spec(object));
        };
        let meter = Arc::new(PrometheusMeter::new()?);
        Ok(Component::new()
            .provide::<dyn Middleware>(meter.clone())
            .provide::<dyn Handler>(meter.clone())
            .provide(Arc::new(Routes::from(spec)))
            .provide(meter))
    }
}
