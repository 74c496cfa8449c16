// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `core/v1 HTTPServer` kind.
//!
//! A server owns one listening socket and a [`RoutingTable`] of pipelines.
//! Connections are served by **hyper-util**'s auto builder, so one socket
//! speaks HTTP/1.1 and (unless disabled) HTTP/2.
//!
//! Request bodies are buffered up to `maxBodySize`.  `readTimeout` bounds
//! the body read, `writeTimeout` bounds the whole pipeline run and
//! `idleTimeout` bounds how long a kept-alive connection may wait for the
//! next request head.
//!
//! On shutdown the server stops accepting, asks every open connection to
//! finish its in-flight requests and waits up to `shutdownTimeout` before
//! aborting the rest.

mod routing;
mod state;


pub use routing::{RoutingTable, pattern_matches};
pub use state::ServerState;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::container::{Component, Factory, Resolver, unexpected_spec};
use crate::error::{ErrorHandler, ErrorKind, GatewayError};
use crate::logging::ComponentLogger;
use crate::manifest::{CORE_V1, HttpServerSpec, KIND_HTTP_SERVER, KindSpec, ManifestObject};
use crate::pipeline::{GatewayRequest, GatewayResponse, Handler, HttpMethod, Middleware, Pipeline, Routes};
use state::StateCell;

/// Everything a connection task needs.
#[derive(Debug)]
struct Shared {
    table: RoutingTable,
    error_handler: Arc<ErrorHandler>,
    logger: ComponentLogger,
    max_body_size: usize,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    enable_http2: bool,
}

#[derive(Debug)]
pub struct HttpServer {
    name: String,
    addr: SocketAddr,
    shutdown_timeout: Duration,
    shared: Arc<Shared>,
    state: StateCell,
    local_addr: OnceLock<SocketAddr>,
    failure: Mutex<Option<Arc<GatewayError>>>,
}

impl HttpServer {
    pub fn new(
        name: impl Into<String>,
        spec: &HttpServerSpec,
        table: RoutingTable,
        error_handler: Arc<ErrorHandler>,
        logger: ComponentLogger,
    ) -> Result<Self, GatewayError> {
        let addr = spec
            .addr
            .parse::<SocketAddr>()
            .map_err(|e| GatewayError::wrap(ErrorKind::ManifestInvalid, format!("bad listen address {}", spec.addr), e))?;
        Ok(Self {
            name: name.into(),
            addr,
            shutdown_timeout: spec.shutdown_timeout.as_duration(),
            shared: Arc::new(Shared {
                table,
                error_handler,
                logger,
                max_body_size: spec.max_body_size,
                read_timeout: spec.read_timeout.map(|d| d.as_duration()),
                write_timeout: spec.write_timeout.map(|d| d.as_duration()),
                idle_timeout: spec.idle_timeout.map(|d| d.as_duration()),
                enable_http2: spec.enable_http2,
            }),
            state: StateCell::default(),
            local_addr: OnceLock::new(),
            failure: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ServerState {
        self.state.get()
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.shared.table
    }

    /// The bound address once the server is running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// The error that stopped the server during startup.
    pub fn failure(&self) -> Option<Arc<GatewayError>> {
        self.failure.lock().ok().and_then(|slot| slot.clone())
    }

    /// Wait until the server is accepting connections.
    pub async fn ready(&self) -> Result<SocketAddr, GatewayError> {
        self.state.reached(ServerState::Running).await;
        if let Some(failure) = self.failure() {
            return Err(GatewayError::wrap(
                failure.kind(),
                format!("server {} failed to start", self.name),
                failure,
            ));
        }
        self.local_addr()
            .ok_or_else(|| GatewayError::internal(format!("server {} is {}", self.name, self.state())))
    }

    fn fail(&self, err: GatewayError) -> GatewayError {
        let kind = err.kind();
        let err = Arc::new(err);
        if let Ok(mut slot) = self.failure.lock() {
            *slot = Some(err.clone());
        }
        self.state.advance(ServerState::Stopped);
        self.shared.logger.error(format_args!("{} failed to start: {}", self.name, err));
        GatewayError::wrap(kind, format!("server {} failed to start", self.name), err)
    }

    /// Serve until `shutdown` is cancelled, then drain.
    ///
    /// A server runs at most once.
    pub async fn serve(&self, shutdown: CancellationToken) -> Result<(), GatewayError> {
        if !self.state.transition(ServerState::Created, ServerState::Starting) {
            return Err(GatewayError::internal(format!(
                "server {} cannot start while {}",
                self.name,
                self.state()
            )));
        }

        let listener = match TcpListener::bind(self.addr).await {
            Ok(listener) => listener,
            Err(e) => {
                return Err(self.fail(GatewayError::wrap(
                    ErrorKind::Internal,
                    format!("cannot listen on {}", self.addr),
                    e,
                )));
            }
        };
        let bound = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => return Err(self.fail(GatewayError::wrap(ErrorKind::Internal, "no local address", e))),
        };
        let _ = self.local_addr.set(bound);
        self.state.advance(ServerState::Running);
        self.shared
            .logger
            .info(format_args!("{} listening on {} ({} route(s))", self.name, bound, self.shared.table.len()));

        let drain = CancellationToken::new();
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        connections.spawn(serve_connection(self.shared.clone(), stream, remote, drain.clone()));
                    }
                    Err(e) => self.shared.logger.warn(format_args!("accept failed on {}: {}", bound, e)),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        self.state.advance(ServerState::Draining);
        drop(listener);
        self.shared
            .logger
            .info(format_args!("{} draining {} connection(s)", self.name, connections.len()));
        drain.cancel();

        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            self.shared.logger.warn(format_args!(
                "{} aborting {} connection(s) after {:?}",
                self.name,
                connections.len(),
                self.shutdown_timeout
            ));
            connections.shutdown().await;
        }

        self.state.advance(ServerState::Stopped);
        self.shared.logger.info(format_args!("{} stopped", self.name));
        Ok(())
    }
}

impl Shared {
    fn connection_builder(&self) -> AutoBuilder<TokioExecutor> {
        let mut builder = AutoBuilder::new(TokioExecutor::new());
        if let Some(idle) = self.idle_timeout {
            builder.http1().timer(TokioTimer::new()).header_read_timeout(idle);
        }
        if self.enable_http2 { builder } else { builder.http1_only() }
    }

    /// Turn a hyper request into a gateway request with its body read.
    async fn accept(
        &self,
        req: Request<Incoming>,
        remote: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<GatewayRequest, (GatewayRequest, GatewayError)> {
        let (parts, body) = req.into_parts();
        let target = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let mut greq = GatewayRequest::new(HttpMethod::Get, target).with_remote_addr(remote);
        greq.host = parts
            .uri
            .authority()
            .map(|a| a.to_string())
            .or_else(|| parts.headers.get("host").and_then(|v| v.to_str().ok()).map(str::to_string));
        greq.headers = parts.headers;
        greq.cancel = cancel;

        match HttpMethod::parse(parts.method.as_str()) {
            Some(method) => greq.method = method,
            None => {
                let err = GatewayError::new(
                    ErrorKind::MethodNotAllowed,
                    format!("unsupported method {}", parts.method),
                );
                return Err((greq, err));
            }
        }

        let collect = Limited::new(body, self.max_body_size).collect();
        let collected = match self.read_timeout {
            Some(limit) => match tokio::time::timeout(limit, collect).await {
                Ok(collected) => collected,
                Err(_) => return Err((greq, GatewayError::timeout(limit).with_context("reading request body"))),
            },
            None => collect.await,
        };
        match collected {
            Ok(body) => {
                greq.body = body.to_bytes();
                Ok(greq)
            }
            Err(e) => {
                let err = GatewayError::bad_request(format!("request body rejected: {e}"));
                Err((greq, err))
            }
        }
    }

    async fn dispatch(&self, req: GatewayRequest) -> GatewayResponse {
        let (pattern, pipeline) = match self.table.route(req.method, &req.path) {
            Ok(found) => found,
            Err(e) => return self.error_handler.serve_http_error(&req, &e),
        };
        {
            let mut ctx = req.context.write().await;
            ctx.matched_route = Some(pattern.to_string());
            ctx.client_ip = req.remote_addr.map(|a| a.ip().to_string());
            ctx.deadline = self.write_timeout.map(|limit| Instant::now() + limit);
        }

        let original = req.clone();
        let result = match self.write_timeout {
            Some(limit) => match tokio::time::timeout(limit, pipeline.handle(req)).await {
                Ok(result) => result,
                Err(_) => {
                    original.cancel.cancel();
                    Err(GatewayError::timeout(limit))
                }
            },
            None => pipeline.handle(req).await,
        };
        match result {
            Ok(response) => response,
            Err(e) => self.error_handler.serve_http_error(&original, &e),
        }
    }
}

async fn serve_connection(shared: Arc<Shared>, stream: TcpStream, remote: SocketAddr, drain: CancellationToken) {
    let builder = shared.connection_builder();
    let service_shared = shared.clone();
    let service = service_fn(move |req: Request<Incoming>| handle_request(service_shared.clone(), req, remote));
    let connection = builder.serve_connection(TokioIo::new(stream), service);
    let mut conn = std::pin::pin!(connection);

    let result = tokio::select! {
        res = &mut conn => res,
        _ = drain.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = result {
        shared.logger.debug(format_args!("connection from {} ended: {}", remote, e));
    }
}

async fn handle_request(
    shared: Arc<Shared>,
    req: Request<Incoming>,
    remote: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    // Dropped with this future, so a vanished client cancels the request.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let started = Instant::now();
    let response = match shared.accept(req, remote, cancel).await {
        Ok(greq) => {
            let (method, path) = (greq.method, greq.path.clone());
            let response = shared.dispatch(greq).await;
            shared.logger.debug(format_args!(
                "{} {} {} -> {} in {:?}",
                remote,
                method,
                path,
                response.status,
                started.elapsed()
            ));
            response
        }
        Err((greq, e)) => {
            shared.logger.debug(format_args!("{} {} rejected: {}", remote, greq.path, e));
            shared.error_handler.serve_http_error(&greq, &e)
        }
    };
    Ok(into_hyper(response))
}

fn into_hyper(response: GatewayResponse) -> Response<Full<Bytes>> {
    let mut out = Response::new(Full::new(response.body));
    *out.status_mut() = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    *out.headers_mut() = response.headers;
    out
}

/// Builds `core/v1 HTTPServer` objects.
///
/// Each binding gets the pipeline `server middleware ++ binding middleware`
/// in front of its handler, mounted on the handler's [`Routes`].
#[derive(Debug, Default)]
pub struct HttpServerFactory;

#[async_trait]
impl Factory for HttpServerFactory {
    fn api_version(&self) -> &'static str {
        CORE_V1
    }

    fn kind(&self) -> &'static str {
        KIND_HTTP_SERVER
    }

    async fn create(&self, resolver: &Resolver<'_>, object: &ManifestObject) -> Result<Component, GatewayError> {
        let KindSpec::HttpServer(spec) = &object.spec else {
            return Err(unexpected_spec(object));
        };
        let server_middleware = resolver.resolve_each::<dyn Middleware>(&spec.middleware).await?;

        let mut table = RoutingTable::new();
        for binding in &spec.handlers {
            let handler = resolver.resolve::<dyn Handler>(&binding.handler).await?;
            let routes = resolver.resolve::<Routes>(&binding.handler).await?;
            let mut chain = server_middleware.clone();
            chain.extend(resolver.resolve_each::<dyn Middleware>(&binding.middleware).await?);
            table.add(&routes, Pipeline::new(chain).then(handler));
        }

        let server = HttpServer::new(
            object.identity.to_string(),
            spec,
            table,
            resolver.error_handler(spec.error_handler.as_ref()).await?,
            resolver.logger(object, None).await?,
        )?;
        Ok(Component::new().provide(Arc::new(server)))
    }
}
