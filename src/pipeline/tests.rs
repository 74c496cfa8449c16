// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;
use crate::manifest::MatchType;
use serde_json::json;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
}

#[derive(Debug)]
struct Tagging {
    tag: &'static str,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl Middleware for Tagging {
    fn name(&self) -> &str {
        self.tag
    }

    async fn handle(&self, req: GatewayRequest, next: &dyn Handler) -> Result<GatewayResponse, GatewayError> {
        self.recorder.calls.lock().unwrap().push(format!("{}-in", self.tag));
        let resp = next.handle(req).await;
        self.recorder.calls.lock().unwrap().push(format!("{}-out", self.tag));
        resp
    }
}

#[derive(Debug, Default)]
struct Counting {
    hits: AtomicUsize,
}

#[async_trait]
impl Middleware for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    async fn handle(&self, req: GatewayRequest, next: &dyn Handler) -> Result<GatewayResponse, GatewayError> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        next.handle(req).await
    }
}

#[derive(Debug)]
struct Deny;

#[async_trait]
impl Middleware for Deny {
    fn name(&self) -> &str {
        "deny"
    }

    async fn handle(&self, _req: GatewayRequest, _next: &dyn Handler) -> Result<GatewayResponse, GatewayError> {
        Err(GatewayError::forbidden())
    }
}

#[derive(Debug)]
struct Panicking;

#[async_trait]
impl Middleware for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn handle(&self, _req: GatewayRequest, _next: &dyn Handler) -> Result<GatewayResponse, GatewayError> {
        panic!("middleware exploded");
    }
}

#[derive(Debug)]
struct Ok200 {
    recorder: Arc<Recorder>,
}

#[async_trait]
impl Handler for Ok200 {
    async fn handle(&self, req: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        self.recorder.calls.lock().unwrap().push("handler".to_string());
        Ok(GatewayResponse::json(200, &json!({"path": req.path})))
    }
}

fn terminal(recorder: &Arc<Recorder>) -> Arc<dyn Handler> {
    Arc::new(Ok200 {
        recorder: recorder.clone(),
    })
}

#[tokio::test]
async fn test_declaration_order_wraps_outermost_first() {
    let recorder = Arc::new(Recorder::default());
    let pipeline = Pipeline::new(vec![])
        .with(Arc::new(Tagging { tag: "m1", recorder: recorder.clone() }))
        .with(Arc::new(Tagging { tag: "m2", recorder: recorder.clone() }))
        .then(terminal(&recorder));

    let resp = pipeline.handle(GatewayRequest::new(HttpMethod::Get, "/x")).await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(
        *recorder.calls.lock().unwrap(),
        vec!["m1-in", "m2-in", "handler", "m2-out", "m1-out"]
    );
}

#[tokio::test]
async fn test_short_circuit_skips_handler() {
    let recorder = Arc::new(Recorder::default());
    let pipeline = Pipeline::new(vec![Arc::new(Deny) as Arc<dyn Middleware>]).then(terminal(&recorder));

    let err = pipeline.handle(GatewayRequest::new(HttpMethod::Get, "/x")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert!(recorder.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_panic_is_recovered_as_internal() {
    let recorder = Arc::new(Recorder::default());
    let pipeline = Pipeline::new(vec![Arc::new(Panicking) as Arc<dyn Middleware>]).then(terminal(&recorder));

    let err = pipeline.handle(GatewayRequest::new(HttpMethod::Get, "/x")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(err.status(), 500);
    assert_eq!(err.detail(), Some("middleware exploded"));
}

#[test]
fn test_request_query_and_headers() {
    let req = GatewayRequest::new(HttpMethod::Get, "/search?q=a+b&tag=x&tag=y%21")
        .with_header("X-One", "1")
        .with_header("x-one", "2");

    assert_eq!(req.path, "/search");
    let params = req.query_params();
    assert_eq!(params["q"], vec!["a b"]);
    assert_eq!(params["tag"], vec!["x", "y!"]);
    assert_eq!(req.header_map()["x-one"], vec!["1", "2"]);
    assert_eq!(req.uri(), "/search?q=a+b&tag=x&tag=y%21");
}

#[test]
fn test_matcher_literal_types() {
    let prefix = Matcher::new(MatchType::Prefix, &["/healthz".to_string()]).unwrap();
    assert!(prefix.matches("/healthz"));
    assert!(prefix.matches("/healthz/live"));
    assert!(!prefix.matches("/api"));

    let exact = Matcher::new(MatchType::Exact, &["/a".to_string()]).unwrap();
    assert!(exact.matches("/a"));
    assert!(!exact.matches("/a/b"));

    let suffix = Matcher::new(MatchType::Suffix, &[".png".to_string()]).unwrap();
    assert!(suffix.matches("/img/logo.png"));

    let contains = Matcher::new(MatchType::Contains, &["admin".to_string()]).unwrap();
    assert!(contains.matches("/v1/admin/users"));
    assert!(!contains.matches("/v1/users"));
}

#[test]
fn test_matcher_path_segments() {
    let m = Matcher::new(MatchType::Path, &["/api/*/items".to_string(), "/static/**".to_string()]).unwrap();
    assert!(m.matches("/api/v1/items"));
    assert!(!m.matches("/api/v1/v2/items"));
    assert!(!m.matches("/api/items"));
    assert!(m.matches("/static"));
    assert!(m.matches("/static/css/site.css"));
    assert!(!m.matches("/other/static"));
}

#[test]
fn test_matcher_regex() {
    let m = Matcher::new(MatchType::Regex, &[r"^/users/\d+$".to_string()]).unwrap();
    assert!(m.matches("/users/42"));
    assert!(!m.matches("/users/abc"));
    assert!(Matcher::new(MatchType::Regex, &["(".to_string()]).is_err());
}

#[tokio::test]
async fn test_skipper_bypasses_wrapped_middleware() {
    let counting = Arc::new(Counting::default());
    let condition = SkipCondition::new(
        Matcher::new(MatchType::Prefix, &["/healthz".to_string()]).unwrap(),
        vec![HttpMethod::Get],
    );
    let skipper = Skipper::new(vec![condition]).wrap_middleware(counting.clone());
    let recorder = Arc::new(Recorder::default());
    let pipeline = Pipeline::new(vec![Arc::new(skipper) as Arc<dyn Middleware>]).then(terminal(&recorder));

    pipeline.handle(GatewayRequest::new(HttpMethod::Get, "/healthz")).await.unwrap();
    assert_eq!(counting.hits.load(Ordering::SeqCst), 0);

    // Method restriction: POST is not skipped.
    pipeline.handle(GatewayRequest::new(HttpMethod::Post, "/healthz")).await.unwrap();
    assert_eq!(counting.hits.load(Ordering::SeqCst), 1);

    pipeline.handle(GatewayRequest::new(HttpMethod::Get, "/api")).await.unwrap();
    assert_eq!(counting.hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_header_tripperware_sets_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bundle.tar.gz"))
        .and(header("authorization", "Bearer abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let mut headers = BTreeMap::new();
    headers.insert("Authorization".to_string(), "Bearer abc".to_string());
    let transport = outbound_transport(None, &headers).unwrap();

    let req = reqwest::Client::new()
        .get(format!("{}/bundle.tar.gz", server.uri()))
        .build()
        .unwrap();
    let resp = transport.round_trip(req).await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_skipper_bypasses_tripperware() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut headers = BTreeMap::new();
    headers.insert("x-tag".to_string(), "set".to_string());
    let skipper = Skipper::new(vec![SkipCondition::new(
        Matcher::new(MatchType::Exact, &["/public".to_string()]).unwrap(),
        vec![],
    )])
    .wrap_tripperware(Arc::new(HeaderTripperware::new(&headers).unwrap()));
    let chain = TripperwareChain::new(vec![Arc::new(skipper) as Arc<dyn Tripperware>], Arc::new(ClientRoundTripper::default()));

    let client = reqwest::Client::new();
    chain
        .round_trip(client.get(format!("{}/public", server.uri())).build().unwrap())
        .await
        .unwrap();
    chain
        .round_trip(client.get(format!("{}/private", server.uri())).build().unwrap())
        .await
        .unwrap();

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    assert!(received[0].headers.get("x-tag").is_none());
    assert_eq!(received[1].headers.get("x-tag").unwrap(), "set");
}
