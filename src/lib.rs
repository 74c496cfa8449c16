// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Gatehouse - a manifest-driven HTTP API gateway.
//!
//! A gateway process is described by YAML (or JSON) manifest documents.
//! Each document names one object by `(apiVersion, kind, namespace, name)`
//! and configures it through its `spec`; objects refer to each other by the
//! same four-part identity.  A [`Container`] builds objects lazily through
//! kind-specific [`Factory`] implementations and caches the result, so a
//! shared object (a JWT handler, a logger) is built once.
//!
//! # Request flow
//!
//! An `HTTPServer` routes each request to a [`Pipeline`]: server-wide
//! middleware, then the binding's middleware, then the terminal handler.
//! Built-in middleware covers Basic, Digest and Bearer (JWT) authentication,
//! request tracking and Rego policy authorization.  A [`Skipper`] bypasses
//! wrapped middleware for matching requests.
//!
//! # Running
//!
//! ```rust,no_run
//! use gatehouse::Gateway;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Gateway::loader()
//!     .with_config_file("/etc/gatehouse/gatehouse.yaml")
//!     .build()
//!     .await?;
//! gateway.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Custom kinds
//!
//! Implement [`Factory`] and register it next to the built-ins:
//!
//! ```rust,no_run
//! use gatehouse::{Gateway, gateway::builtin_registry};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = builtin_registry();
//! // registry.register(Arc::new(MyFactory));
//! let gateway = Gateway::loader()
//!     .with_registry(registry)
//!     .with_manifest("manifests/gateway.yaml")
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod container;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod jwt;
pub mod logging;
pub mod manifest;
pub mod middleware;
pub mod pipeline;
pub mod policy;
pub mod server;
pub mod storage;

pub use config::{Config, ConfigError, ConfigProvider, ConfigProviderExt, GatewaySettings};
pub use container::{Component, Container, Factory, FactoryRegistry, Resolver};
pub use error::{ErrorHandler, ErrorKind, GatewayError};
pub use gateway::{Gateway, GatewayLoader, LoaderError, RunError};
pub use jwt::JwtHandler;
pub use logging::{ComponentLogger, init as init_logging, init_with_config as init_logging_with_config};
pub use manifest::{ManifestObject, Reference, load_file, parse_documents};
pub use pipeline::{
    GatewayRequest, GatewayResponse, Handler, HttpMethod, Middleware, Pipeline, RoundTripper, Routes, Skipper,
    Tripperware,
};
pub use server::{HttpServer, ServerState};
