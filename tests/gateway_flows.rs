// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Requests through fully assembled gateways.

mod common;

use base64::{Engine as _, engine::general_purpose};
use common::{TestGateway, client, echo_server, sign, signer, temp_file};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ISSUER: &str = "https://idp.example.com";

fn basic(user: &str, password: &str) -> String {
    format!("Basic {}", general_purpose::STANDARD.encode(format!("{user}:{password}")))
}

fn basic_authn(name: &str, credentials_path: &str) -> String {
    format!(
        r#"
---
apiVersion: app/v1
kind: BasicAuthnMiddleware
metadata: {{name: {name}}}
spec:
  realm: api
  fileProvider:
    paths: ["{credentials_path}"]
"#
    )
}

fn bearer_authn(jwt_spec: &str) -> String {
    format!(
        r#"
---
apiVersion: app/v1
kind: JWTHandler
metadata: {{name: jwt}}
spec:
{jwt_spec}
---
apiVersion: app/v1
kind: BearerAuthnMiddleware
metadata: {{name: bearer}}
spec:
  realm: api
  issuers: ["{ISSUER}"]
  jwtHandler: {{apiVersion: app/v1, kind: JWTHandler, name: jwt}}
"#
    )
}

fn hs256_private_keys() -> String {
    format!(
        "  privateKeys:\n    - {{keyID: k1, algorithm: HS256, keyType: COMMON, keyString: \"{}\"}}",
        common::COMMON_KEY
    )
}

const ALICE_READS_PUBLIC: &str = r#"
package gateway.authz
import rego.v1

default allow := false

allow if {
    input.auth.sub == "alice"
    input.method == "GET"
    startswith(input.api, "/public")
}
"#;

const ADMIN_HEADER: &str = r#"
package gateway.admin
import rego.v1

default allow := false

allow if input.header["x-role"][0] == "admin"
"#;

fn opa_authz(regos: &[(&str, &str)]) -> String {
    let regos: Vec<String> = regos
        .iter()
        .map(|(query, file)| format!("    - queryParameter: {query}\n      policyFiles: [\"{file}\"]"))
        .collect();
    format!(
        r#"
---
apiVersion: app/v1
kind: OPAAuthzMiddleware
metadata: {{name: authz}}
spec:
  regos:
{}
"#,
        regos.join("\n")
    )
}

#[tokio::test]
async fn test_basic_authentication() {
    let credentials = temp_file(".txt", "# users\nalice:wonderland\n");
    let manifest = basic_authn("basic", &credentials.path().display().to_string())
        + &echo_server(&[("BasicAuthnMiddleware", "basic")]);
    let gateway = TestGateway::start(&manifest).await;

    let anonymous = client().get(gateway.url("/data")).send().await.unwrap();
    assert_eq!(anonymous.status(), 401);
    assert_eq!(anonymous.headers()["www-authenticate"], "Basic realm=\"api\"");

    let wrong = client()
        .get(gateway.url("/data"))
        .header("authorization", basic("alice", "nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    let ok = client()
        .get(gateway.url("/data"))
        .header("authorization", basic("alice", "wonderland"))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    let echoed: Value = ok.json().await.unwrap();
    assert_eq!(echoed["attributes"]["AuthnClaims"]["sub"], "alice");
    assert!(echoed["header"].get("authorization").is_none());

    gateway.stop().await;
}

#[tokio::test]
async fn test_bearer_hs256() {
    let manifest = bearer_authn(&hs256_private_keys()) + &echo_server(&[("BearerAuthnMiddleware", "bearer")]);
    let gateway = TestGateway::start(&manifest).await;
    let token = sign(&signer("k1"), json!({"sub": "alice", "iss": ISSUER}));

    let ok = client().get(gateway.url("/me")).bearer_auth(&token).send().await.unwrap();
    assert_eq!(ok.status(), 200);
    let echoed: Value = ok.json().await.unwrap();
    assert_eq!(echoed["attributes"]["AuthnClaims"]["sub"], "alice");

    let forged = sign(&signer("k1"), json!({"sub": "mallory", "iss": "https://elsewhere"}));
    let rejected = client().get(gateway.url("/me")).bearer_auth(&forged).send().await.unwrap();
    assert_eq!(rejected.status(), 401);
    assert!(
        rejected.headers()["www-authenticate"]
            .to_str()
            .unwrap()
            .contains("invalid_token")
    );

    let missing = client().get(gateway.url("/me")).send().await.unwrap();
    assert_eq!(missing.status(), 401);

    gateway.stop().await;
}

#[tokio::test]
async fn test_policy_allows_and_denies() {
    let policy = temp_file(".rego", ALICE_READS_PUBLIC);
    let manifest = bearer_authn(&hs256_private_keys())
        + &opa_authz(&[("data.gateway.authz.allow", &policy.path().display().to_string())])
        + &echo_server(&[("BearerAuthnMiddleware", "bearer"), ("OPAAuthzMiddleware", "authz")]);
    let gateway = TestGateway::start(&manifest).await;
    let alice = sign(&signer("k1"), json!({"sub": "alice", "iss": ISSUER}));
    let bob = sign(&signer("k1"), json!({"sub": "bob", "iss": ISSUER}));

    let allowed = client().get(gateway.url("/public/doc")).bearer_auth(&alice).send().await.unwrap();
    assert_eq!(allowed.status(), 200);

    let wrong_user = client().get(gateway.url("/public/doc")).bearer_auth(&bob).send().await.unwrap();
    assert_eq!(wrong_user.status(), 403);
    let body: Value = wrong_user.json().await.unwrap();
    assert_eq!(body["status"], 403);

    let wrong_method = client().post(gateway.url("/public/doc")).bearer_auth(&alice).send().await.unwrap();
    assert_eq!(wrong_method.status(), 403);

    let wrong_path = client().get(gateway.url("/private")).bearer_auth(&alice).send().await.unwrap();
    assert_eq!(wrong_path.status(), 403);

    gateway.stop().await;
}

#[tokio::test]
async fn test_any_policy_query_allows() {
    let authz = temp_file(".rego", ALICE_READS_PUBLIC);
    let admin = temp_file(".rego", ADMIN_HEADER);
    let manifest = bearer_authn(&hs256_private_keys())
        + &opa_authz(&[
            ("data.gateway.authz.allow", &authz.path().display().to_string()),
            ("data.gateway.admin.allow", &admin.path().display().to_string()),
        ])
        + &echo_server(&[("BearerAuthnMiddleware", "bearer"), ("OPAAuthzMiddleware", "authz")]);
    let gateway = TestGateway::start(&manifest).await;
    let bob = sign(&signer("k1"), json!({"sub": "bob", "iss": ISSUER}));

    let plain = client().delete(gateway.url("/private")).bearer_auth(&bob).send().await.unwrap();
    assert_eq!(plain.status(), 403);

    let admin = client()
        .delete(gateway.url("/private"))
        .bearer_auth(&bob)
        .header("x-role", "admin")
        .send()
        .await
        .unwrap();
    assert_eq!(admin.status(), 200);

    gateway.stop().await;
}

#[tokio::test]
async fn test_skipper_bypasses_authentication() {
    let credentials = temp_file(".txt", "alice:wonderland\n");
    let manifest = basic_authn("basic", &credentials.path().display().to_string())
        + r#"
---
apiVersion: app/v1
kind: Skipper
metadata: {name: public}
spec:
  skipConditions:
    - matcher: {matchType: Prefix, patterns: ["/health"]}
      methods: [GET]
  middleware:
    - {apiVersion: app/v1, kind: BasicAuthnMiddleware, name: basic}
"#
        + &echo_server(&[("Skipper", "public")]);
    let gateway = TestGateway::start(&manifest).await;

    let health = client().get(gateway.url("/health/live")).send().await.unwrap();
    assert_eq!(health.status(), 200);

    let post_health = client().post(gateway.url("/health/live")).send().await.unwrap();
    assert_eq!(post_health.status(), 401);

    let api = client().get(gateway.url("/api")).send().await.unwrap();
    assert_eq!(api.status(), 401);

    let api_authed = client()
        .get(gateway.url("/api"))
        .header("authorization", basic("alice", "wonderland"))
        .send()
        .await
        .unwrap();
    assert_eq!(api_authed.status(), 200);

    gateway.stop().await;
}

#[tokio::test]
async fn test_bearer_keys_from_jwks() {
    let idp = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": [
            {"kty": "oct", "kid": "k1", "alg": "HS256", "k": "aW50ZWdyYXRpb24gY29tbW9uIGtleQ"}
        ]})))
        .expect(1)
        .mount(&idp)
        .await;

    let jwks = format!("  jwks:\n    \"{ISSUER}\": \"{}/jwks\"", idp.uri());
    let manifest = bearer_authn(&jwks) + &echo_server(&[("BearerAuthnMiddleware", "bearer")]);
    let gateway = TestGateway::start(&manifest).await;
    let token = sign(&signer("k1"), json!({"sub": "carol", "iss": ISSUER}));

    for _ in 0..2 {
        let response = client().get(gateway.url("/me")).bearer_auth(&token).send().await.unwrap();
        assert_eq!(response.status(), 200);
    }

    gateway.stop().await;
}

#[tokio::test]
async fn test_tracking_and_metrics() {
    let manifest = r#"
apiVersion: app/v1
kind: TrackingMiddleware
metadata: {name: tracking}
spec:
  encoding: Base16
  requestIDProxyName: X-Request-ID
  traceIDExtractName: X-Trace-ID
---
apiVersion: app/v1
kind: PrometheusMeter
metadata: {name: meter}
spec:
  patterns: ["/metrics"]
  methods: [GET]
---
apiVersion: app/v1
kind: EchoHandler
metadata: {name: echo}
spec:
  patterns: ["/"]
---
apiVersion: core/v1
kind: HTTPServer
metadata: {name: main}
spec:
  addr: "127.0.0.1:0"
  handlers:
    - handler: {apiVersion: app/v1, kind: EchoHandler, name: echo}
      middleware:
        - {apiVersion: app/v1, kind: PrometheusMeter, name: meter}
        - {apiVersion: app/v1, kind: TrackingMiddleware, name: tracking}
    - handler: {apiVersion: app/v1, kind: PrometheusMeter, name: meter}
"#;
    let gateway = TestGateway::start(manifest).await;

    let response = client()
        .get(gateway.url("/orders"))
        .header("x-trace-id", "trace-from-client")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();
    assert_eq!(request_id.len(), 32);
    let echoed: Value = response.json().await.unwrap();
    assert_eq!(echoed["traceId"], "trace-from-client");
    assert_eq!(echoed["requestId"], request_id.as_str());

    let metrics = client().get(gateway.url("/metrics")).send().await.unwrap();
    assert_eq!(metrics.status(), 200);
    let text = metrics.text().await.unwrap();
    assert!(text.contains("gatehouse_http_requests_total"), "{text}");

    let wrong_method = client().post(gateway.url("/metrics")).send().await.unwrap();
    assert_eq!(wrong_method.status(), 405);

    gateway.stop().await;
}
