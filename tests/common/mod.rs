// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers for driving an assembled gateway over TCP.

#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;

use gatehouse::jwt::{Claims, JwtHandler};
use gatehouse::manifest::JwtHandlerSpec;
use gatehouse::pipeline::ClientRoundTripper;
use gatehouse::{Gateway, GatewayError};
use serde_json::{Value, json};
use tempfile::NamedTempFile;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Base64 of "integration common key".
pub const COMMON_KEY: &str = "aW50ZWdyYXRpb24gY29tbW9uIGtleQ==";

pub struct TestGateway {
    pub base: String,
    shutdown: CancellationToken,
    running: JoinHandle<Result<(), GatewayError>>,
}

impl TestGateway {
    pub async fn start(manifest: &str) -> Self {
        let gateway = Gateway::loader().with_manifest_str(manifest).build().await.unwrap();
        let shutdown = CancellationToken::new();
        let running = gateway.start(shutdown.clone()).await.unwrap();
        let base = format!("http://{}", running.addrs()[0]);
        Self {
            base,
            shutdown,
            running: tokio::spawn(running.wait()),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.running.await.unwrap().unwrap();
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// An HTTPServer on an ephemeral port with an echo handler on `/` behind
/// the given `(kind, name)` middleware of `app/v1`.
pub fn echo_server(middleware: &[(&str, &str)]) -> String {
    let refs: Vec<String> = middleware
        .iter()
        .map(|(kind, name)| format!("    - {{apiVersion: app/v1, kind: {kind}, name: {name}}}"))
        .collect();
    let middleware = if refs.is_empty() {
        "  middleware: []".to_string()
    } else {
        format!("  middleware:\n{}", refs.join("\n"))
    };
    format!(
        r#"
---
apiVersion: app/v1
kind: EchoHandler
metadata: {{name: echo}}
spec:
  patterns: ["/"]
---
apiVersion: core/v1
kind: HTTPServer
metadata: {{name: main}}
spec:
  addr: "127.0.0.1:0"
  shutdownTimeout: 2s
{middleware}
  handlers:
    - handler: {{apiVersion: app/v1, kind: EchoHandler, name: echo}}
"#
    )
}

pub fn temp_file(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

/// A signer holding the HS256 key `kid`.
pub fn signer(kid: &str) -> Arc<JwtHandler> {
    let spec: JwtHandlerSpec = serde_json::from_value(json!({
        "privateKeys": [{"keyID": kid, "algorithm": "HS256", "keyType": "COMMON", "keyString": COMMON_KEY}]
    }))
    .unwrap();
    Arc::new(JwtHandler::new(&spec, Arc::new(ClientRoundTripper::default())).unwrap())
}

pub fn sign(jwt: &JwtHandler, claims: Value) -> String {
    let claims: Claims = serde_json::from_value(claims).unwrap();
    jwt.signed_string(&jwt.token_with_claims(claims).unwrap()).unwrap()
}
