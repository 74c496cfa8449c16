// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;
use std::time::Duration;

const SERVER_AND_ECHO: &str = r#"
apiVersion: core/v1
kind: HTTPServer
metadata:
  namespace: edge
  name: public
spec:
  handlers:
    - handler:
        apiVersion: app/v1
        kind: EchoHandler
        name: echo
---
apiVersion: app/v1
kind: EchoHandler
metadata:
  name: echo
spec:
  patterns: ["/echo"]
"#;

#[test]
fn test_parse_documents_materializes_defaults() {
    let objects = parse_documents(SERVER_AND_ECHO).unwrap();
    assert_eq!(objects.len(), 2);

    let server = &objects[0];
    assert_eq!(server.identity.to_string(), "core/v1:HTTPServer:edge:public");
    let KindSpec::HttpServer(spec) = &server.spec else {
        panic!("expected HTTPServer spec");
    };
    assert_eq!(spec.addr, "0.0.0.0:8080");
    assert_eq!(spec.shutdown_timeout.as_duration(), Duration::from_secs(30));
    assert_eq!(spec.max_body_size, 5 * 1024 * 1024);
    assert!(spec.enable_http2);
    assert_eq!(spec.handlers[0].handler.namespace, "default");

    let echo = &objects[1];
    assert_eq!(echo.identity.namespace, "default");
    assert_eq!(echo.references().len(), 0);
    assert_eq!(server.references().len(), 1);
}

#[test]
fn test_json_documents_are_accepted() {
    let objects = parse_documents(
        r#"{"apiVersion": "core/v1", "kind": "ErrorHandler", "spec": {"statusOverrides": {"Forbidden": 404}}}"#,
    )
    .unwrap();
    let KindSpec::ErrorHandler(spec) = &objects[0].spec else {
        panic!("expected ErrorHandler spec");
    };
    assert_eq!(spec.status_overrides["Forbidden"], 404);
}

#[test]
fn test_missing_spec_uses_defaults() {
    let objects = parse_documents("apiVersion: core/v1\nkind: Logger\n").unwrap();
    let KindSpec::Logger(spec) = &objects[0].spec else {
        panic!("expected Logger spec");
    };
    assert_eq!(spec.level, "info");
    assert!(spec.target.is_none());
}

#[test]
fn test_unknown_field_is_rejected() {
    let err = parse_documents("apiVersion: core/v1\nkind: Logger\nspec:\n  levle: debug\n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ManifestInvalid);
    assert!(err.to_string().contains("levle"), "{err}");

    let err = parse_documents("apiVersion: core/v1\nkind: Logger\nextra: 1\n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ManifestInvalid);
}

#[test]
fn test_unknown_kind() {
    let err = KindSpec::decode(APP_V1, "TeapotMiddleware", Value::Null).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownKind);

    // Known kind under the wrong group
    let err = KindSpec::decode(CORE_V1, KIND_ECHO_HANDLER, Value::Null).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownKind);
}

#[test]
fn test_every_violation_is_reported() {
    let err = parse_documents(
        r#"
apiVersion: core/v1
kind: HTTPServer
spec:
  addr: "not an address"
  maxBodySize: 0
  enableHTTP3: true
"#,
    )
    .unwrap_err();
    let detail = err.to_string();
    assert!(detail.contains("spec.addr"), "{detail}");
    assert!(detail.contains("spec.maxBodySize"), "{detail}");
    assert!(detail.contains("spec.enableHTTP3"), "{detail}");
}

#[test]
fn test_failures_across_documents_are_collected() {
    let text = "apiVersion: core/v1\nkind: Logger\nspec:\n  level: loud\n---\napiVersion: app/v1\nkind: Nope\n";
    let err = parse_documents(text).unwrap_err();
    let detail = err.detail().unwrap_or_default().to_string();
    assert!(detail.contains("document 0"), "{detail}");
    assert!(detail.contains("document 1"), "{detail}");
}

#[test]
fn test_invalid_regex_matcher() {
    let err = parse_documents(
        r#"
apiVersion: app/v1
kind: Skipper
spec:
  skipConditions:
    - matcher:
        matchType: Regex
        patterns: ["("]
  middleware:
    - apiVersion: app/v1
      kind: TrackingMiddleware
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("invalid regex"), "{err}");
}

#[test]
fn test_jwt_key_rules() {
    let err = parse_documents(
        r#"
apiVersion: app/v1
kind: JWTHandler
spec:
  privateKeys:
    - algorithm: HS256
      keyType: PRIVATE
      keyString: "c2VjcmV0"
    - algorithm: RS256
      keyType: PRIVATE
  jwks:
    issuer: "ftp://keys.example.com"
"#,
    )
    .unwrap_err();
    let detail = err.to_string();
    assert!(detail.contains("HMAC keys must be COMMON"), "{detail}");
    assert!(detail.contains("exactly one of keyFilePath and keyString"), "{detail}");
    assert!(detail.contains("not an http(s) URL"), "{detail}");
}

#[test]
fn test_unknown_signing_algorithm() {
    let err = "HS1024".parse::<SigningAlgorithm>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAlgorithm);
    assert_eq!("none".parse::<SigningAlgorithm>().unwrap(), SigningAlgorithm::None);
    assert_eq!(SigningAlgorithm::HS256.to_string(), "HS256");
}

#[test]
fn test_duration_parsing() {
    assert_eq!(DurationSpec::parse("250ms").unwrap().as_duration(), Duration::from_millis(250));
    assert_eq!(DurationSpec::parse("2m").unwrap().as_duration(), Duration::from_secs(120));
    assert_eq!(DurationSpec::parse("1h").unwrap().as_duration(), Duration::from_secs(3600));
    assert_eq!(DurationSpec::parse("15").unwrap().as_duration(), Duration::from_secs(15));
    assert!(DurationSpec::parse("3 weeks").is_err());
    assert!(DurationSpec::parse("ms").is_err());
    assert_eq!(DurationSpec::parse("1500ms").unwrap().to_string(), "1500ms");
}

#[test]
fn test_logger_reference_is_validated() {
    let err = parse_documents(
        r#"
apiVersion: app/v1
kind: EchoHandler
metadata:
  logger:
    apiVersion: core/v1
    kind: ""
spec:
  patterns: ["/echo"]
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("metadata.logger.kind"), "{err}");
}

#[test]
fn test_load_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.yaml");
    std::fs::write(&path, SERVER_AND_ECHO).unwrap();
    assert_eq!(load_file(&path).unwrap().len(), 2);

    let err = load_file(dir.path().join("missing.yaml")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ManifestInvalid);
    assert!(err.to_string().contains("missing.yaml"));
}
