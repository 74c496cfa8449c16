// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;
use crate::server::ServerState;
use serde_json::Value;
use std::io::Write;

const ECHO_SERVER: &str = r#"
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
  shutdownTimeout: 2s
  handlers:
    - handler: {apiVersion: app/v1, kind: EchoHandler, name: echo}
"#;

#[test]
fn test_builtin_registry_kinds() {
    let registry = builtin_registry();
    assert_eq!(registry.kinds().len(), 14);
    assert!(registry.contains("core/v1", "HTTPServer"));
    assert!(registry.contains("app/v1", "OPAAuthzMiddleware"));
    assert!(!registry.contains("app/v1", "CORSMiddleware"));
}

#[test]
fn test_exit_codes() {
    assert_eq!(RunError::Startup(GatewayError::internal("x")).exit_code(), 1);
    assert_eq!(RunError::Runtime(GatewayError::internal("x")).exit_code(), 2);
}

#[tokio::test]
async fn test_start_serve_and_drain() {
    let gateway = Gateway::loader().with_manifest_str(ECHO_SERVER).build().await.unwrap();
    assert_eq!(gateway.servers().len(), 1);

    let shutdown = CancellationToken::new();
    let running = gateway.start(shutdown.clone()).await.unwrap();
    let addr = running.addrs()[0];

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let body: Value = client
        .get(format!("http://{addr}/hello"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["path"], "/hello");

    shutdown.cancel();
    running.wait().await.unwrap();
    assert_eq!(gateway.servers()[0].state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_run_until_signal() {
    let gateway = Gateway::loader().with_manifest_str(ECHO_SERVER).build().await.unwrap();
    let result = gateway
        .run_until(tokio::time::sleep(std::time::Duration::from_millis(100)))
        .await;
    assert!(result.is_ok(), "{result:?}");
    assert_eq!(gateway.servers()[0].state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_manifests_listed_in_settings() {
    let mut manifest = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    manifest.write_all(ECHO_SERVER.as_bytes()).unwrap();
    let mut settings = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    write!(
        settings,
        "gateway:\n  manifests: [\"{}\"]\n  shutdown_timeout_secs: 4\n",
        manifest.path().display()
    )
    .unwrap();

    let gateway = Gateway::loader().with_config_file(settings.path()).build().await.unwrap();
    assert_eq!(gateway.settings().shutdown_timeout, std::time::Duration::from_secs(4));
    assert_eq!(gateway.container().identities().len(), 2);
}

#[tokio::test]
async fn test_build_failures() {
    let err = Gateway::loader()
        .with_manifest_str("apiVersion: app/v1\nkind: EchoHandler\nspec: {patterns: [\"/\"]}\n")
        .build()
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no HTTPServer"), "{err}");

    let err = Gateway::loader()
        .with_manifest_str("apiVersion: app/v1\nkind: Nonsense\n")
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, LoaderError::Gateway(_)), "{err}");

    let err = Gateway::loader().with_config_file("/nonexistent/settings.toml").build().await.unwrap_err();
    assert!(matches!(err, LoaderError::Config(_)), "{err}");
}

#[tokio::test]
async fn test_bind_conflict_is_a_startup_failure() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let manifest = ECHO_SERVER.replace("127.0.0.1:0", &occupied.local_addr().unwrap().to_string());
    let gateway = Gateway::loader().with_manifest_str(manifest).build().await.unwrap();

    let err = gateway.run_until(std::future::pending()).await.unwrap_err();
    assert!(matches!(err, RunError::Startup(_)), "{err}");
    assert_eq!(err.exit_code(), 1);
    assert!(gateway.servers()[0].failure().is_some());
}
