//! HTTPS server, request dispatch and lifecycle.
//!
//! # Lifecycle
//!
//! ```text
//! Server::new ──▶ Initialized ──start()──▶ Serving ──stop()──▶ Stopped
//!                      │                                          ▲
//!                      └──────────────────stop()──────────────────┘
//! ```
//!
//! - [`Server::start`] binds the listener and serves until [`Server::stop`] is
//!   called, then drains in-flight connections for at most
//!   `shutdown_timeout` before returning.
//! - A stopped server cannot be restarted; build a new one.
//! - Without TLS the server never leaves `Initialized`: both `start` and
//!   `endpoint` fail with [`Error::NoTls`].
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//! [`Server::run`] reacts by closing the listener immediately and letting
//! in-flight connections finish. Set the grace period longer than
//! `shutdown_timeout`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use http::header::ALLOW;
use http::{HeaderValue, Method, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::codec::Codecs;
use crate::config::ServerConfig;
use crate::context::Context;
use crate::error::{BoxError, DeadlineExceeded, Error, HttpError};
use crate::filter::{self, Filter, FilterChain, Service, service_fn};
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::middleware::{Middleware, Selector};
use crate::registrar::Registrar;
use crate::request::Request;
use crate::response::Response;
use crate::router::{Resolution, RouteInfo, RouteTable, Router, ServerRouter};
use crate::transport::{self, Transport};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

enum State {
    Initialized,
    Serving { shutdown: watch::Sender<bool>, local_addr: SocketAddr },
    Stopped,
}

/// The HTTPS server.
///
/// Routes and middleware are registered through `&mut self` before serving;
/// `start`, `stop` and `endpoint` take `&self`, so a server shared through an
/// `Arc` can be stopped from another task.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use portico::{BoxError, Context, Server, ServerConfig};
///
/// async fn hello(ctx: Context) -> Result<String, BoxError> {
///     Ok(format!("hello {}", ctx.param("name").unwrap_or("world")))
/// }
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ServerConfig::builder()
///     .address(":8443")
///     .tls_pem_files("cert.pem", "key.pem")
///     .build()?;
/// let mut server = Server::new(config);
/// server.route("/v1", []).get("/hello/{name}", hello, []);
///
/// let server = Arc::new(server);
/// let serving = tokio::spawn({
///     let server = Arc::clone(&server);
///     async move { server.start().await }
/// });
/// // ...
/// server.stop()?;
/// serving.await??;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    config: ServerConfig,
    routes: RouteTable,
    selector: Selector,
    endpoint: Option<Result<Url, url::ParseError>>,
    state: Mutex<State>,
}

impl Server {
    /// Builds the server and resolves its endpoint.
    pub fn new(config: ServerConfig) -> Self {
        let endpoint = config
            .tls
            .as_ref()
            .map(|_| Url::parse(&format!("https://{}", config.address)));
        Self {
            routes: RouteTable::with_prefix(&config.path_prefix, config.strict_slash),
            selector: Selector::new(),
            endpoint,
            state: Mutex::new(State::Initialized),
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// A route group rooted at `prefix` below the server's path prefix.
    pub fn route(&mut self, prefix: &str, filters: impl IntoIterator<Item = Filter>) -> Router<'_> {
        self.routes.route(prefix, filters)
    }

    /// Serves `path` for every method.
    pub fn handle(&mut self, path: &str, handler: impl Handler) {
        self.routes.handle(path, handler.into_boxed_handler());
    }

    /// Serves every path starting with `prefix`.
    pub fn handle_prefix(&mut self, prefix: &str, handler: impl Handler) {
        self.routes.handle_prefix(prefix, handler.into_boxed_handler());
    }

    /// Serves requests whose header `key` equals `value`, whatever the path.
    pub fn handle_header(&mut self, key: &str, value: &str, handler: impl Handler) {
        self.routes.handle_header(key, value, handler.into_boxed_handler());
    }

    /// Applies `middleware` to every operation matching `selector`:
    ///
    /// - `/*` for every operation
    /// - `/helloworld.v1.Greeter/*` for every operation of a service
    /// - `/helloworld.v1.Greeter/SayHello` for one operation
    pub fn use_middleware(&mut self, selector: &str, middleware: impl IntoIterator<Item = Middleware>) {
        self.selector.add(selector, middleware);
    }

    /// Lets `registrar` mount its routes.
    pub fn register(&mut self, registrar: &dyn Registrar) -> Result<(), BoxError> {
        registrar.register(self)
    }

    /// Visits every `(method, template)` pair; see [`RouteTable::walk`].
    pub fn walk_route<E>(&self, visit: impl FnMut(&RouteInfo) -> Result<(), E>) -> Result<(), E> {
        self.routes.walk(visit)
    }

    /// Visits every `(method, template)` pair with a handle that serves
    /// requests through the full server pipeline.
    pub fn walk_handle(&self, mut visit: impl FnMut(&Method, &str, ServeHandle)) {
        let handle = self.handler();
        let Ok(()) = self.routes.walk(|info| {
            visit(&info.method, &info.path, handle.clone());
            Ok::<_, Infallible>(())
        });
    }

    /// The server's request pipeline as an in-process handle.
    pub fn handler(&self) -> ServeHandle {
        ServeHandle(Arc::new(Dispatcher::new(self)))
    }

    /// The `https://` URL of the configured address.
    pub fn endpoint(&self) -> Result<Url, Error> {
        match &self.endpoint {
            None => Err(Error::NoTls),
            Some(Ok(url)) => Ok(url.clone()),
            Some(Err(e)) => Err(Error::Endpoint(*e)),
        }
    }

    /// The bound address while serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock() {
            State::Serving { local_addr, .. } => Some(*local_addr),
            _ => None,
        }
    }

    /// Resolves the configured address, binds the listener and serves until
    /// [`stop`](Self::stop).
    ///
    /// Returns after the listener is closed and in-flight connections have
    /// drained or `shutdown_timeout` has elapsed.
    pub async fn start(&self) -> Result<(), Error> {
        let tls = self.config.tls.clone().ok_or(Error::NoTls)?;
        self.ensure_initialized()?;

        let listener = TcpListener::bind(self.config.address.as_str()).await.map_err(|e| {
            error!(addr = %self.config.address, error = %e, "bind failed");
            Error::Io(e)
        })?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        {
            let mut state = self.state.lock();
            match &*state {
                State::Initialized => {}
                State::Serving { .. } => return Err(Error::AlreadyServing),
                State::Stopped => return Err(Error::Stopped),
            }
            *state = State::Serving { shutdown: shutdown_tx, local_addr };
        }

        info!(addr = %local_addr, "listening");
        let dispatcher = Arc::new(Dispatcher::new(self));
        serve(listener, TlsAcceptor::from(tls), dispatcher, shutdown_rx, self.config.shutdown_timeout).await;
        info!(addr = %local_addr, "stopped");
        Ok(())
    }

    /// Closes the listener. Idempotent.
    pub fn stop(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        if let State::Serving { shutdown, local_addr } = &*state {
            info!(addr = %local_addr, "stopping");
            shutdown.send_replace(true);
        }
        *state = State::Stopped;
        Ok(())
    }

    /// Serves until SIGINT or SIGTERM, then stops and drains.
    pub async fn run(&self) -> Result<(), Error> {
        let serving = self.start();
        tokio::pin!(serving);

        tokio::select! {
            res = &mut serving => return res,
            () = shutdown_signal() => {
                info!("shutdown signal received, draining connections");
            }
        }

        self.stop()?;
        serving.await
    }

    fn ensure_initialized(&self) -> Result<(), Error> {
        match *self.state.lock() {
            State::Initialized => Ok(()),
            State::Serving { .. } => Err(Error::AlreadyServing),
            State::Stopped => Err(Error::Stopped),
        }
    }
}

impl ServerRouter for Server {
    fn handle(&mut self, path: &str, handler: BoxedHandler) {
        self.routes.handle(path, handler);
    }

    fn handle_prefix(&mut self, prefix: &str, handler: BoxedHandler) {
        self.routes.handle_prefix(prefix, handler);
    }

    fn handle_header(&mut self, key: &str, value: &str, handler: BoxedHandler) {
        self.routes.handle_header(key, value, handler);
    }

    fn route(&mut self, prefix: &str, filters: Vec<Filter>) -> Router<'_> {
        self.routes.route(prefix, filters)
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("routes", &self.routes)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn serve(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
    drain_timeout: Duration,
) {
    let graceful = GracefulShutdown::new();
    let http = ConnBuilder::new(TokioExecutor::new());
    // Handshakes run in their own tasks so a slow client cannot stall accept.
    let mut handshakes = JoinSet::new();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                info!(in_flight = connections.len(), "draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, peer) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                handshakes.spawn(async move {
                    match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                        Ok(Ok(tls)) => Some((tls, peer)),
                        Ok(Err(e)) => {
                            debug!(%peer, error = %e, "tls handshake failed");
                            None
                        }
                        Err(_) => {
                            debug!(%peer, "tls handshake timed out");
                            None
                        }
                    }
                });
            }

            Some(joined) = handshakes.join_next(), if !handshakes.is_empty() => {
                let Ok(Some((tls, peer))) = joined else { continue };
                let dispatcher = Arc::clone(&dispatcher);
                let svc = hyper::service::service_fn(move |req| {
                    let dispatcher = Arc::clone(&dispatcher);
                    async move { Ok::<_, Infallible>(dispatcher.serve(req).await.into_inner()) }
                });
                let conn = http.serve_connection(TokioIo::new(tls), svc);
                let conn = graceful.watch(conn.into_owned());
                connections.spawn(async move {
                    if let Err(e) = conn.await {
                        error!(%peer, error = %e, "connection error");
                    }
                });
            }

            // Reap finished connections so the set does not grow without bound.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    handshakes.abort_all();

    let drain = async {
        graceful.shutdown().await;
        while connections.join_next().await.is_some() {}
    };
    if tokio::time::timeout(drain_timeout, drain).await.is_ok() {
        info!("all connections drained");
    } else {
        warn!(timeout = ?drain_timeout, remaining = connections.len(), "drain timed out, aborting remaining connections");
        connections.shutdown().await;
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// An in-process handle to a server's request pipeline: route resolution,
/// filters, handler, error encoding and deadline handling, without a socket.
#[derive(Clone)]
pub struct ServeHandle(Arc<Dispatcher>);

impl ServeHandle {
    /// Serves one request.
    pub async fn call<B>(&self, req: http::Request<B>) -> http::Response<Full<Bytes>>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<BoxError>,
    {
        self.0.serve(req).await.into_inner()
    }
}

impl std::fmt::Debug for ServeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServeHandle").field("endpoint", &self.0.endpoint).finish()
    }
}

/// The compiled request pipeline: one filtered service per route plus the
/// fallbacks, all sharing the same codecs and selector.
struct Dispatcher {
    routes: RouteTable,
    services: Vec<Service>,
    global: FilterChain,
    not_found: Service,
    method_not_allowed: Service,
    codecs: Arc<Codecs>,
    endpoint: String,
    timeout: Duration,
}

impl Dispatcher {
    fn new(server: &Server) -> Self {
        let config = &server.config;
        let codecs = Arc::new(config.codecs.clone());
        let selector = Arc::new(server.selector.clone());
        let global = filter::compose(config.filters.iter().cloned());

        let services = server
            .routes
            .entries()
            .iter()
            .map(|entry| {
                let chain = filter::compose(config.filters.iter().chain(&entry.filters).cloned());
                chain.apply(endpoint(entry.handler.clone(), Arc::clone(&codecs), Arc::clone(&selector)))
            })
            .collect();

        let not_found = config
            .not_found
            .clone()
            .unwrap_or_else(|| status_service(StatusCode::NOT_FOUND));
        let method_not_allowed = config
            .method_not_allowed
            .clone()
            .unwrap_or_else(|| status_service(StatusCode::METHOD_NOT_ALLOWED));

        Self {
            routes: server.routes.clone(),
            services,
            not_found: global.apply(not_found),
            method_not_allowed: global.apply(method_not_allowed),
            global,
            codecs,
            endpoint: server.endpoint.as_ref().and_then(|e| e.as_ref().ok()).map(Url::to_string).unwrap_or_default(),
            timeout: config.timeout,
        }
    }

    async fn serve<B>(&self, req: http::Request<B>) -> Response
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<BoxError>,
    {
        let (mut parts, body) = req.into_parts();
        // The deadline covers reading the body as well as the handler.
        let (deadline, guard) = transport::scope(self.timeout);

        let collect = body.collect();
        let collected = match deadline.at() {
            Some(at) => tokio::time::timeout_at(at, collect).await.ok(),
            None => Some(collect.await),
        };
        let body = match collected {
            Some(Ok(collected)) => collected.to_bytes(),
            Some(Err(e)) => {
                let e: BoxError = e.into();
                warn!(error = %e, "failed to read request body");
                return Response::status(StatusCode::BAD_REQUEST);
            }
            None => {
                warn!(path = %parts.uri.path(), timeout = ?self.timeout, "deadline exceeded reading request body");
                return (self.codecs.error)(&parts.headers, Box::new(DeadlineExceeded));
            }
        };

        let path = parts.uri.path().to_owned();
        let mut allow = None;
        let (service, template, params) = match self.routes.resolve(&parts.method, &path, &parts.headers) {
            Resolution::Matched { index, params } => {
                let template = self.routes.entries()[index].template(&path).to_owned();
                (Arc::clone(&self.services[index]), template, params)
            }
            Resolution::MethodNotAllowed(methods) => {
                allow = Some(methods);
                (Arc::clone(&self.method_not_allowed), path.clone(), HashMap::new())
            }
            Resolution::Redirect(to) => {
                let location = match parts.uri.query() {
                    Some(q) => format!("{to}?{q}"),
                    None => to,
                };
                let redirect = service_fn(move |_req| {
                    let res = Response::redirect(&location);
                    async move { res }
                });
                (self.global.apply(redirect), path.clone(), HashMap::new())
            }
            Resolution::NotFound => (Arc::clone(&self.not_found), path.clone(), HashMap::new()),
        };

        let headers = std::mem::take(&mut parts.headers);
        let request_headers = headers.clone();
        let transport = Transport::new(self.endpoint.clone(), template, headers);
        let reply_header = transport.reply_header();
        let operation = transport.operation().to_owned();
        let request = Request::new(parts, body, params, transport, deadline.clone());

        let call = AssertUnwindSafe(service(request)).catch_unwind();
        let outcome = match deadline.at() {
            Some(at) => tokio::time::timeout_at(at, call).await.ok(),
            None => Some(call.await),
        };
        drop(guard);

        let mut res = match outcome {
            Some(Ok(res)) => res,
            Some(Err(_panic)) => {
                error!(%operation, "handler panicked");
                (self.codecs.error)(&request_headers, Box::new(HttpError::internal("internal server error")))
            }
            None => {
                warn!(%operation, timeout = ?self.timeout, "deadline exceeded");
                (self.codecs.error)(&request_headers, Box::new(DeadlineExceeded))
            }
        };

        if let Some(methods) = allow {
            let joined = methods.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
            if !res.headers().contains_key(ALLOW) {
                if let Ok(value) = HeaderValue::from_str(&joined) {
                    res.headers_mut().insert(ALLOW, value);
                }
            }
        }
        reply_header.merge_into(res.headers_mut());
        res
    }
}

/// The innermost service of a route: runs the handler and sends its error,
/// if any, through the error encoder.
fn endpoint(handler: BoxedHandler, codecs: Arc<Codecs>, selector: Arc<Selector>) -> Service {
    Arc::new(move |req: Request| -> BoxFuture<Response> {
        let handler = Arc::clone(&handler);
        let codecs = Arc::clone(&codecs);
        let selector = Arc::clone(&selector);
        Box::pin(async move {
            let headers = req.headers().clone();
            match handler.call(Context::new(req, Arc::clone(&codecs), selector)).await {
                Ok(res) => res,
                Err(err) => (codecs.error)(&headers, err),
            }
        })
    })
}

fn status_service(status: StatusCode) -> Service {
    service_fn(move |_req| async move { Response::status(status) })
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available. A signal that cannot be installed is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
