// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;
use crate::container::{Container, FactoryRegistry};
use crate::error::GatewayError;
use crate::manifest::{APP_V1, KIND_ECHO_HANDLER, KIND_PROMETHEUS_METER, Reference, parse_documents};
use crate::pipeline::{GatewayRequest, GatewayResponse, Handler, HttpMethod, Middleware, Pipeline, Routes};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Debug)]
struct Fails;

#[async_trait]
impl Handler for Fails {
    async fn handle(&self, _req: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        Err(GatewayError::forbidden())
    }
}

#[tokio::test]
async fn test_echo_writes_request_back() {
    let req = GatewayRequest::new(HttpMethod::Post, "/echo?a=1")
        .with_header("x-test", "yes")
        .with_host("gw.example.com")
        .with_body("hello");
    req.context.write().await.attributes.insert("AuthnClaims".into(), json!({"sub": "alice"}));

    let response = EchoHandler.handle(req).await.unwrap();
    assert_eq!(response.status, 200);
    let body: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["method"], "POST");
    assert_eq!(body["path"], "/echo");
    assert_eq!(body["query"]["a"], json!(["1"]));
    assert_eq!(body["host"], "gw.example.com");
    assert_eq!(body["header"]["x-test"], json!(["yes"]));
    assert_eq!(body["body"], "hello");
    assert_eq!(body["attributes"]["AuthnClaims"]["sub"], "alice");
}

#[tokio::test]
async fn test_meter_counts_through_middleware() {
    let meter = Arc::new(PrometheusMeter::new().unwrap());
    let ok = Pipeline::new(vec![meter.clone() as Arc<dyn Middleware>]).then(Arc::new(EchoHandler));
    let failing = Pipeline::new(vec![meter.clone() as Arc<dyn Middleware>]).then(Arc::new(Fails));

    ok.handle(GatewayRequest::new(HttpMethod::Get, "/")).await.unwrap();
    ok.handle(GatewayRequest::new(HttpMethod::Get, "/")).await.unwrap();
    failing.handle(GatewayRequest::new(HttpMethod::Get, "/")).await.unwrap_err();

    let response = Handler::handle(meter.as_ref(), GatewayRequest::new(HttpMethod::Get, "/metrics"))
        .await
        .unwrap();
    assert!(response.header("content-type").unwrap().starts_with("text/plain"));
    let text = String::from_utf8(response.body.to_vec()).unwrap();
    assert_eq!(sample(&text, r#"code="200""#), Some("2"), "{text}");
    assert_eq!(sample(&text, r#"code="403""#), Some("1"), "{text}");
    assert!(text.contains("gatehouse_http_request_duration_seconds_bucket"), "{text}");
}

/// Value of the request counter sample whose labels contain `label`.
fn sample<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    text.lines()
        .filter(|l| l.starts_with("gatehouse_http_requests_total{") && l.contains(label))
        .find_map(|l| l.rsplit(' ').next())
}

#[tokio::test]
async fn test_meters_are_independent() {
    let first = PrometheusMeter::new().unwrap();
    let second = PrometheusMeter::new().unwrap();
    first.record("GET", 200, 0.01);
    assert_eq!(sample(&first.render(), r#"code="200""#), Some("1"));
    assert_eq!(sample(&second.render(), r#"code="200""#), None);
}

#[tokio::test]
async fn test_factories_provide_routes() {
    let registry = Arc::new(FactoryRegistry::new());
    registry.register(Arc::new(EchoHandlerFactory));
    registry.register(Arc::new(PrometheusMeterFactory));
    let container = Container::with_registry(registry);
    container
        .load(
            parse_documents(
                r#"
apiVersion: app/v1
kind: EchoHandler
metadata: {name: echo}
spec:
  patterns: ["/echo/"]
  methods: [GET, POST]
---
apiVersion: app/v1
kind: PrometheusMeter
metadata: {name: meter}
spec:
  patterns: ["/metrics"]
"#,
            )
            .unwrap(),
        )
        .unwrap();

    let echo = Reference::new(APP_V1, KIND_ECHO_HANDLER, "default", "echo");
    let routes = container.resolve::<Routes>(&echo).await.unwrap();
    assert_eq!(routes.patterns, vec!["/echo/".to_string()]);
    assert!(routes.allows(HttpMethod::Post));
    assert!(!routes.allows(HttpMethod::Delete));
    container.resolve::<dyn Handler>(&echo).await.unwrap();

    let meter = Reference::new(APP_V1, KIND_PROMETHEUS_METER, "default", "meter");
    container.resolve::<dyn Middleware>(&meter).await.unwrap();
    container.resolve::<dyn Handler>(&meter).await.unwrap();
    assert!(container.resolve::<Routes>(&meter).await.unwrap().methods.is_empty());
}
