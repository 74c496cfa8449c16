// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process assembly.
//!
//! [`GatewayLoader`] reads settings, initializes logging, loads manifests
//! into a [`Container`] over the built-in kinds and builds every
//! `core/v1 HTTPServer`.  The resulting [`Gateway`] starts the servers and
//! drains them when asked to stop.

#[cfg(test)]
mod tests;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::client::HttpClientFactory;
use crate::config::{Config, ConfigError, FileConfigProvider, GatewaySettings};
use crate::container::{Container, FactoryRegistry};
use crate::error::{ErrorHandlerFactory, ErrorKind, GatewayError};
use crate::handlers::{EchoHandlerFactory, PrometheusMeterFactory};
use crate::jwt::JwtHandlerFactory;
use crate::logging::{LoggerFactory, init_with_config};
use crate::manifest::{CORE_V1, KIND_HTTP_SERVER, ManifestObject, load_file, parse_documents};
use crate::middleware::{
    BasicAuthnFactory, BearerAuthnFactory, DigestAuthnFactory, OpaAuthzFactory, TrackingFactory,
};
use crate::pipeline::SkipperFactory;
use crate::server::{HttpServer, HttpServerFactory};
use crate::storage::RedisClientFactory;
use crate::{error_fmt, info_fmt, warn_fmt};

/// Register every built-in kind on `registry`.
pub fn register_builtins(registry: &FactoryRegistry) {
    registry.register(Arc::new(LoggerFactory));
    registry.register(Arc::new(ErrorHandlerFactory));
    registry.register(Arc::new(HttpServerFactory));
    registry.register(Arc::new(HttpClientFactory));
    registry.register(Arc::new(BasicAuthnFactory));
    registry.register(Arc::new(DigestAuthnFactory));
    registry.register(Arc::new(BearerAuthnFactory));
    registry.register(Arc::new(TrackingFactory));
    registry.register(Arc::new(SkipperFactory));
    registry.register(Arc::new(OpaAuthzFactory));
    registry.register(Arc::new(EchoHandlerFactory));
    registry.register(Arc::new(PrometheusMeterFactory));
    registry.register(Arc::new(RedisClientFactory));
    registry.register(Arc::new(JwtHandlerFactory));
}

/// A fresh registry holding the built-in kinds.
pub fn builtin_registry() -> Arc<FactoryRegistry> {
    let registry = Arc::new(FactoryRegistry::new());
    register_builtins(&registry);
    registry
}

/// Failures before any server is running.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("settings error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Why [`Gateway::run`] returned an error.
#[derive(Error, Debug)]
pub enum RunError {
    /// A server failed to start.
    #[error("startup failed: {0}")]
    Startup(GatewayError),

    /// A server failed or panicked after it started, or draining overran.
    #[error("runtime failure: {0}")]
    Runtime(GatewayError),
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Startup(_) => 1,
            RunError::Runtime(_) => 2,
        }
    }
}

#[derive(Debug, Default)]
pub struct GatewayLoader {
    config: Option<Config>,
    config_file: Option<PathBuf>,
    manifests: Vec<PathBuf>,
    documents: Vec<String>,
    registry: Option<Arc<FactoryRegistry>>,
}

impl GatewayLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Read settings from a JSON, TOML or YAML file.
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Add a manifest file on top of `gateway.manifests`.
    pub fn with_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifests.push(path.into());
        self
    }

    /// Add manifest documents given inline.
    pub fn with_manifest_str(mut self, text: impl Into<String>) -> Self {
        self.documents.push(text.into());
        self
    }

    /// Build over a custom registry instead of [`builtin_registry`].
    pub fn with_registry(mut self, registry: Arc<FactoryRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub async fn build(self) -> Result<Gateway, LoaderError> {
        let config = match (self.config, self.config_file) {
            (Some(config), _) => config,
            (None, Some(path)) => Config::builder().with_provider(FileConfigProvider::new(path)?).build(),
            (None, None) => Config::default(),
        };
        let settings = GatewaySettings::from_config(&config)?;
        init_with_config(None, settings.logging.clone());
        info_fmt!("Gateway", "Starting gatehouse {}", env!("CARGO_PKG_VERSION"));

        let mut objects: Vec<ManifestObject> = Vec::new();
        for path in settings.manifests.iter().chain(&self.manifests) {
            let loaded = load_file(path)?;
            info_fmt!("Gateway", "Loaded {} object(s) from {}", loaded.len(), path.display());
            objects.extend(loaded);
        }
        for text in &self.documents {
            objects.extend(parse_documents(text)?);
        }

        let container = Container::with_registry(self.registry.unwrap_or_else(builtin_registry));
        container.load(objects)?;

        let servers: Vec<Arc<HttpServer>> = container
            .resolve_all::<HttpServer, _>(|id| id.api_version == CORE_V1 && id.kind == KIND_HTTP_SERVER)
            .await?
            .into_iter()
            .map(|(_, server)| server)
            .collect();
        if servers.is_empty() {
            return Err(GatewayError::new(ErrorKind::ManifestInvalid, "manifests define no HTTPServer").into());
        }

        Ok(Gateway {
            settings,
            container,
            servers,
        })
    }
}

#[derive(Debug)]
pub struct Gateway {
    settings: GatewaySettings,
    container: Container,
    servers: Vec<Arc<HttpServer>>,
}

impl Gateway {
    pub fn loader() -> GatewayLoader {
        GatewayLoader::new()
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn servers(&self) -> &[Arc<HttpServer>] {
        &self.servers
    }

    /// Start every server and wait until all are accepting.
    ///
    /// When one fails to start the others are stopped again.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<RunningGateway, GatewayError> {
        let mut tasks = JoinSet::new();
        for server in &self.servers {
            let server = server.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move { server.serve(shutdown).await });
        }

        let mut addrs = Vec::with_capacity(self.servers.len());
        for server in &self.servers {
            match server.ready().await {
                Ok(addr) => addrs.push(addr),
                Err(e) => {
                    shutdown.cancel();
                    while tasks.join_next().await.is_some() {}
                    return Err(e);
                }
            }
        }

        Ok(RunningGateway {
            addrs,
            tasks,
            shutdown,
            drain_timeout: self.settings.shutdown_timeout,
        })
    }

    /// Serve until `signal` completes, then drain.
    pub async fn run_until<F>(&self, signal: F) -> Result<(), RunError>
    where
        F: Future<Output = ()> + Send,
    {
        let shutdown = CancellationToken::new();
        let running = self.start(shutdown.clone()).await.map_err(RunError::Startup)?;

        let wait = running.wait();
        tokio::pin!(wait);
        tokio::select! {
            result = &mut wait => return result.map_err(RunError::Runtime),
            _ = signal => {
                info_fmt!("Gateway", "Shutdown requested; draining");
                shutdown.cancel();
            }
        }
        wait.await.map_err(RunError::Runtime)
    }

    /// Serve until Ctrl-C or SIGTERM.
    pub async fn run(&self) -> Result<(), RunError> {
        self.run_until(shutdown_signal()).await
    }
}

/// Servers that are up.
#[derive(Debug)]
pub struct RunningGateway {
    addrs: Vec<SocketAddr>,
    tasks: JoinSet<Result<(), GatewayError>>,
    shutdown: CancellationToken,
    drain_timeout: Duration,
}

impl RunningGateway {
    /// Bound addresses, in server order.
    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wait for shutdown and the drain that follows.
    ///
    /// A server ending on its own also stops the others.
    pub async fn wait(mut self) -> Result<(), GatewayError> {
        let mut failure: Option<GatewayError> = None;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                joined = self.tasks.join_next() => match joined {
                    Some(joined) => {
                        if let Some(e) = outcome(joined) {
                            error_fmt!("Gateway", "Server failed: {}", e);
                            failure.get_or_insert(e);
                        }
                        self.shutdown.cancel();
                    }
                    None => break,
                },
            }
        }

        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(self.drain_timeout, async {
            let mut failures = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                failures.extend(outcome(joined));
            }
            failures
        })
        .await;
        match drained {
            Ok(failures) => {
                for e in failures {
                    error_fmt!("Gateway", "Server failed while draining: {}", e);
                    failure.get_or_insert(e);
                }
            }
            Err(_) => {
                warn_fmt!("Gateway", "Drain exceeded {:?}; aborting servers", self.drain_timeout);
                self.tasks.abort_all();
                failure.get_or_insert(GatewayError::timeout(self.drain_timeout).with_context("draining servers"));
            }
        }

        match failure {
            Some(e) => Err(e),
            None => {
                info_fmt!("Gateway", "All servers stopped");
                Ok(())
            }
        }
    }
}

fn outcome(joined: Result<Result<(), GatewayError>, JoinError>) -> Option<GatewayError> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        Err(e) if e.is_panic() => Some(GatewayError::internal(format!("server task panicked: {e}"))),
        Err(e) => Some(GatewayError::internal(format!("server task aborted: {e}"))),
    }
}

/// Completes on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn_fmt!("Gateway", "Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn_fmt!("Gateway", "Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info_fmt!("Gateway", "Received Ctrl-C"),
        _ = terminate => info_fmt!("Gateway", "Received SIGTERM"),
    }
}
