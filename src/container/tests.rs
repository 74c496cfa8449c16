// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;
use crate::manifest::{APP_V1, CORE_V1, KIND_ECHO_HANDLER, KIND_LOGGER, KIND_SKIPPER, KIND_TRACKING, parse_documents};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug)]
struct Marker {
    label: String,
    wrapped: usize,
}

#[derive(Debug)]
struct MarkerFactory {
    api_version: &'static str,
    kind: &'static str,
    built: Arc<AtomicUsize>,
}

impl MarkerFactory {
    fn new(api_version: &'static str, kind: &'static str) -> (Arc<Self>, Arc<AtomicUsize>) {
        let built = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                api_version,
                kind,
                built: built.clone(),
            }),
            built,
        )
    }
}

#[async_trait]
impl Factory for MarkerFactory {
    fn api_version(&self) -> &'static str {
        self.api_version
    }

    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn create(&self, resolver: &Resolver<'_>, object: &ManifestObject) -> Result<Component, GatewayError> {
        // Widen the window in which concurrent resolves could race.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let wrapped = resolver
            .resolve_each::<Marker>(&object.spec.references().into_iter().cloned().collect::<Vec<_>>())
            .await?
            .len();
        self.built.fetch_add(1, Ordering::SeqCst);
        Ok(Component::new().provide(Arc::new(Marker {
            label: object.identity.name.clone(),
            wrapped,
        })))
    }
}

#[derive(Debug)]
struct FailingFactory;

#[async_trait]
impl Factory for FailingFactory {
    fn api_version(&self) -> &'static str {
        APP_V1
    }

    fn kind(&self) -> &'static str {
        KIND_ECHO_HANDLER
    }

    async fn create(&self, _resolver: &Resolver<'_>, _object: &ManifestObject) -> Result<Component, GatewayError> {
        Err(GatewayError::new(ErrorKind::ManifestInvalid, "echo refused"))
    }
}

const MANIFEST: &str = r#"
apiVersion: app/v1
kind: TrackingMiddleware
metadata:
  name: tracking
---
apiVersion: app/v1
kind: Skipper
metadata:
  name: skip-health
spec:
  skipConditions:
    - matcher:
        patterns: ["/healthz"]
  middleware:
    - apiVersion: app/v1
      kind: TrackingMiddleware
      name: tracking
---
apiVersion: core/v1
kind: Logger
metadata:
  name: audit
"#;

fn registry() -> (Arc<FactoryRegistry>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let registry = Arc::new(FactoryRegistry::new());
    let (tracking, tracking_built) = MarkerFactory::new(APP_V1, KIND_TRACKING);
    let (skipper, skipper_built) = MarkerFactory::new(APP_V1, KIND_SKIPPER);
    let (logger, _) = MarkerFactory::new(CORE_V1, KIND_LOGGER);
    registry.register(tracking);
    registry.register(skipper);
    registry.register(logger);
    registry.register(Arc::new(FailingFactory));
    (registry, tracking_built, skipper_built)
}

fn loaded() -> (Container, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let (registry, tracking_built, skipper_built) = registry();
    let container = Container::with_registry(registry);
    container.load(parse_documents(MANIFEST).unwrap()).unwrap();
    (container, tracking_built, skipper_built)
}

fn reference(kind: &str, name: &str) -> Reference {
    let api_version = if kind == KIND_LOGGER { CORE_V1 } else { APP_V1 };
    Reference::new(api_version, kind, "default", name)
}

#[test]
fn test_registry_register_and_unregister() {
    let registry = FactoryRegistry::new();
    let (factory, _) = MarkerFactory::new(APP_V1, KIND_TRACKING);
    registry.register(factory);
    assert!(registry.contains(APP_V1, KIND_TRACKING));
    assert_eq!(registry.kinds(), vec!["app/v1/TrackingMiddleware".to_string()]);

    assert!(registry.unregister(APP_V1, KIND_TRACKING));
    assert!(!registry.unregister(APP_V1, KIND_TRACKING));
    let err = registry.get(APP_V1, KIND_TRACKING).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownKind);
}

#[test]
fn test_load_keeps_declaration_order() {
    let (container, _, _) = loaded();
    let names: Vec<String> = container.identities().into_iter().map(|id| id.name).collect();
    assert_eq!(names, vec!["tracking", "skip-health", "audit"]);
}

#[test]
fn test_load_rejects_duplicates() {
    let (container, _, _) = loaded();
    let again = parse_documents("apiVersion: core/v1\nkind: Logger\nmetadata:\n  name: audit\n").unwrap();
    let err = container.load(again).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateIdentity);
    assert_eq!(container.identities().len(), 3);
}

#[test]
fn test_load_rejects_unresolved_reference() {
    let (registry, _, _) = registry();
    let container = Container::with_registry(registry);
    let objects = parse_documents(
        r#"
apiVersion: app/v1
kind: Skipper
spec:
  skipConditions:
    - matcher:
        patterns: ["/"]
  middleware:
    - apiVersion: app/v1
      kind: TrackingMiddleware
      name: nowhere
"#,
    )
    .unwrap();
    let err = container.load(objects).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReferenceUnresolved);
    assert!(container.identities().is_empty());
}

#[test]
fn test_load_rejects_cycles() {
    let (registry, _, _) = registry();
    let container = Container::with_registry(registry);
    let objects = parse_documents(
        r#"
apiVersion: app/v1
kind: Skipper
metadata:
  name: a
spec:
  skipConditions:
    - matcher:
        patterns: ["/"]
  middleware:
    - apiVersion: app/v1
      kind: Skipper
      name: b
---
apiVersion: app/v1
kind: Skipper
metadata:
  name: b
spec:
  skipConditions:
    - matcher:
        patterns: ["/"]
  middleware:
    - apiVersion: app/v1
      kind: Skipper
      name: a
"#,
    )
    .unwrap();
    let err = container.load(objects).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CyclicReference);
    assert!(err.to_string().contains("Skipper:default:a -> Skipper:default:b -> Skipper:default:a"), "{err}");
}

#[tokio::test]
async fn test_resolve_returns_the_same_instance() {
    let (container, tracking_built, skipper_built) = loaded();
    let skipper = reference(KIND_SKIPPER, "skip-health");

    let first = container.resolve::<Marker>(&skipper).await.unwrap();
    let second = container.resolve::<Marker>(&skipper).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.label, "skip-health");
    assert_eq!(first.wrapped, 1);

    // Dependencies were built once, through the skipper.
    let tracking = container.resolve::<Marker>(&reference(KIND_TRACKING, "tracking")).await.unwrap();
    assert_eq!(tracking.wrapped, 0);
    assert_eq!(tracking_built.load(Ordering::SeqCst), 1);
    assert_eq!(skipper_built.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_resolve_constructs_once() {
    let (container, tracking_built, _) = loaded();
    let container = Arc::new(container);
    let target = reference(KIND_TRACKING, "tracking");

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let container = container.clone();
        let target = target.clone();
        tasks.push(tokio::spawn(async move { container.resolve::<Marker>(&target).await }));
    }
    let mut instances = Vec::new();
    for task in tasks {
        instances.push(task.await.unwrap().unwrap());
    }

    assert_eq!(tracking_built.load(Ordering::SeqCst), 1);
    assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[tokio::test]
async fn test_missing_capability_is_type_mismatch() {
    let (container, _, _) = loaded();
    let err = container
        .resolve::<String>(&reference(KIND_TRACKING, "tracking"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
}

#[tokio::test]
async fn test_unregistered_kind_is_unknown_kind() {
    let (registry, _, _) = registry();
    registry.unregister(CORE_V1, KIND_LOGGER);
    let container = Container::with_registry(registry);
    container.load(parse_documents(MANIFEST).unwrap()).unwrap();

    let err = container.resolve::<Marker>(&reference(KIND_LOGGER, "audit")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownKind);
}

#[tokio::test]
async fn test_factory_failure_names_the_object() {
    let (container, _, _) = loaded();
    container
        .load(parse_documents("apiVersion: app/v1\nkind: EchoHandler\nspec:\n  patterns: [\"/echo\"]\n").unwrap())
        .unwrap();

    let err = container
        .resolve::<Marker>(&reference(KIND_ECHO_HANDLER, "default"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ManifestInvalid);
    assert!(err.to_string().contains("failed to create app/v1:EchoHandler:default:default"), "{err}");
}

#[tokio::test]
async fn test_unknown_reference_at_resolve() {
    let (container, _, _) = loaded();
    let err = container.resolve::<Marker>(&reference(KIND_TRACKING, "ghost")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReferenceUnresolved);

    let wrong_group = Reference::new(CORE_V1, KIND_TRACKING, "default", "tracking");
    let err = container.resolve::<Marker>(&wrong_group).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReferenceUnresolved);
}

#[tokio::test]
async fn test_resolve_all_filters_in_load_order() {
    let (container, _, _) = loaded();
    let resolved = container
        .resolve_all::<Marker, _>(|id| id.api_version == APP_V1)
        .await
        .unwrap();
    let labels: Vec<&str> = resolved.iter().map(|(_, m)| m.label.as_str()).collect();
    assert_eq!(labels, vec!["tracking", "skip-health"]);
}

#[tokio::test]
async fn test_error_handler_falls_back_to_default() {
    let (container, _, _) = loaded();
    let resolver = Resolver::root(&container);
    let handler = resolver.error_handler(None).await.unwrap();
    assert_eq!(handler.status_for(ErrorKind::Forbidden), 403);
}
