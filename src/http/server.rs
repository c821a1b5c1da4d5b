//! HTTP server: registration surface, dispatch and lifecycle.
//!
//! # Responsibilities
//! - Own the configuration, language catalog, route tree and services
//! - Install the core middleware on the root router
//! - Dispatch requests through the precomposed pipelines
//! - Bind the listener, serve HTTP/1.1 and HTTP/2 connections and drain them
//!   on stop
//! - Run startup hooks (background) and shutdown hooks (blocking `stop`)
//!
//! # Design Decisions
//! - Registration takes `&mut Server`; serving takes `&Arc<Server>`. The
//!   tree is therefore read-only once requests flow and needs no lock
//! - Pipelines are composed once, on first use
//! - Draining is bounded by [`SHUTDOWN_TIMEOUT`]; shutdown hooks run even
//!   when it expires
//! - A `stop` issued from inside a handler waits for its own connection to
//!   drain, i.e. until the timeout. Spawn it instead

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, DefaultBodyLimit};
use axum::http::{Extensions, Request};
use axum::response::Response;
use futures_util::future::BoxFuture;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tower::{Service, ServiceBuilder};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::{validate_config, Config, ConfigError};
use crate::database::Database;
use crate::http::middleware::{language, parse, recovery};
use crate::http::pipeline::Pipelines;
use crate::http::request;
use crate::lang::{Catalog, LanguageError};
use crate::lifecycle::{signals, Latch, State, StateCell};
use crate::net::{ConnectionPermit, ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::routing::{RouteRef, RouteTree, RouterMut, RoutingError};
use crate::service::{Service as AppService, Services};

/// Bound on connection draining during `stop`.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle and setup failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("server is already stopped")]
    AlreadyStopped,

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to load languages: {0}")]
    Language(#[from] LanguageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Startup or shutdown hook.
pub type Hook = Box<dyn Fn(Arc<Server>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Derives the base request extensions of an accepted connection.
pub type ConnectionHook = Arc<dyn Fn(&mut Extensions, SocketAddr) + Send + Sync>;

/// The HTTP server.
pub struct Server {
    config: Config,
    catalog: Catalog,
    routes: RouteTree,
    pipelines: OnceLock<Pipelines>,
    services: Services,
    database: Option<Arc<dyn Database>>,
    startup_hooks: Vec<Hook>,
    shutdown_hooks: Vec<Hook>,
    base_extensions: Extensions,
    connection_hook: Option<ConnectionHook>,
    state: StateCell,
    local_addr: OnceLock<SocketAddr>,
    signal_hook: AtomicBool,
    shutdown: Latch,
    drained: Latch,
    done: Latch,
    signals: Latch,
}

impl Server {
    /// Create a server from a configuration.
    ///
    /// Loads the language directory when one is configured and installs the
    /// core middleware (recovery, request id, language, parse) as global
    /// middleware of the root router.
    pub fn new(config: Config) -> Result<Self, ServerError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let mut catalog = match &config.app.language_dir {
            Some(dir) => Catalog::load_dir(dir)?,
            None => Catalog::new(),
        };
        if !catalog.set_default(&config.app.default_language) {
            tracing::warn!(
                language = %config.app.default_language,
                "Default language not available, using en-US"
            );
        }

        let mut routes = RouteTree::new();
        routes
            .root()
            .global_middleware(recovery::middleware())
            .global_middleware(request::middleware())
            .global_middleware(language::middleware())
            .global_middleware(parse::middleware());

        tracing::debug!(
            app = %config.app.name,
            environment = %config.app.environment,
            languages = catalog.tags().count(),
            "Server created"
        );

        Ok(Self {
            config,
            catalog,
            routes,
            pipelines: OnceLock::new(),
            services: Services::new(),
            database: None,
            startup_hooks: Vec::new(),
            shutdown_hooks: Vec::new(),
            base_extensions: Extensions::new(),
            connection_hook: None,
            state: StateCell::new(),
            local_addr: OnceLock::new(),
            signal_hook: AtomicBool::new(false),
            shutdown: Latch::new(),
            drained: Latch::new(),
            done: Latch::new(),
            signals: Latch::new(),
        })
    }

    // ----- registration -----

    /// The root router.
    pub fn router(&mut self) -> RouterMut<'_> {
        self.routes.root()
    }

    pub fn routes(&self) -> &RouteTree {
        &self.routes
    }

    /// Named route lookup.
    pub fn route(&self, name: &str) -> Option<RouteRef<'_>> {
        self.routes.named(name)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// # Panics
    /// When a service with the same name is already registered.
    pub fn register_service<S: AppService>(&self, service: S) {
        self.services.register(service);
    }

    /// # Panics
    /// When no service of type `S` is registered under `name`.
    pub fn service<S: AppService>(&self, name: &str) -> Arc<S> {
        self.services.get(name)
    }

    pub fn lookup_service<S: AppService>(&self, name: &str) -> Option<Arc<S>> {
        self.services.lookup(name)
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Attach the database handle. Ignored when `database.connection` is
    /// `none`.
    pub fn set_database(&mut self, database: Arc<dyn Database>) {
        if !self.config.database.enabled() {
            tracing::warn!(driver = database.driver(), "Database disabled in configuration, handle ignored");
            return;
        }
        self.database = Some(database);
    }

    pub fn database(&self) -> Option<&Arc<dyn Database>> {
        self.database.as_ref()
    }

    /// Run `hook` in the background once the server is ready. Hooks run one
    /// after the other, in registration order.
    pub fn on_startup<F, Fut>(&mut self, hook: F)
    where
        F: Fn(Arc<Server>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.startup_hooks.push(Box::new(move |server| Box::pin(hook(server))));
    }

    /// Run `hook` during `stop`, after connections drained.
    pub fn on_shutdown<F, Fut>(&mut self, hook: F)
    where
        F: Fn(Arc<Server>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.shutdown_hooks.push(Box::new(move |server| Box::pin(hook(server))));
    }

    /// Extension copied into every request before the pipeline runs.
    pub fn base_extension<T: Clone + Send + Sync + 'static>(&mut self, value: T) {
        self.base_extensions.insert(value);
    }

    /// Derive the base extensions of each accepted connection.
    pub fn set_connection_hook<F>(&mut self, hook: F)
    where
        F: Fn(&mut Extensions, SocketAddr) + Send + Sync + 'static,
    {
        self.connection_hook = Some(Arc::new(hook));
    }

    // ----- state -----

    pub fn state(&self) -> State {
        self.state.get()
    }

    pub fn is_ready(&self) -> bool {
        self.state.get() == State::Ready
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// `protocol://host[:port]`, preferring `server.domain` over the bind
    /// host and omitting the protocol's default port.
    pub fn base_url(&self) -> String {
        let server = &self.config.server;
        let host = server
            .domain
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(&server.host);
        let port = match server.port {
            0 => self.local_addr().map(|a| a.port()).unwrap_or(0),
            port => port,
        };
        format_url(&server.protocol, host, Some(port), "")
    }

    /// Externally visible base URL: the reverse proxy address when one is
    /// configured, else [`Server::base_url`].
    pub fn proxy_base_url(&self) -> String {
        match &self.config.server.proxy {
            Some(proxy) => format_url(&proxy.protocol, &proxy.host, proxy.port, &proxy.base),
            None => self.base_url(),
        }
    }

    /// Full URL of the named route with `values` substituted.
    pub fn url(&self, name: &str, values: &[&str]) -> Result<String, RoutingError> {
        let route = self
            .route(name)
            .ok_or_else(|| RoutingError::UnknownRoute(name.to_string()))?;
        Ok(format!("{}{}", self.proxy_base_url(), route.build_uri(values)?))
    }

    // ----- dispatch -----

    fn pipelines(&self) -> &Pipelines {
        self.pipelines.get_or_init(|| Pipelines::build(&self.routes))
    }

    /// Route `request` and run its pipeline.
    pub async fn handle(self: &Arc<Self>, request: Request<Body>) -> Response {
        let start = Instant::now();
        let method = request.method().clone();
        let matched = self.routes.match_request(&method, request.uri().path());
        let handler = self.pipelines().select(&matched).clone();
        let route = match (matched.route(), matched.error()) {
            (Some(id), _) => self.routes.route(id).name().unwrap_or("unnamed").to_string(),
            (None, Some(error)) => error.status().as_u16().to_string(),
            (None, None) => "unmatched".to_string(),
        };

        let ctx = crate::http::context::Context::new(request, matched, Arc::clone(self));
        let response = handler.call(ctx).await;

        metrics::record_request(method.as_str(), &route, response.status().as_u16(), start);
        response
    }

    // ----- lifecycle -----

    /// Bind the listener and serve until [`Server::stop`] completes.
    ///
    /// Fails with [`ServerError::AlreadyRunning`] or
    /// [`ServerError::AlreadyStopped`] when another caller started the server
    /// first, or with the bind error.
    pub async fn start(self: &Arc<Self>) -> Result<(), ServerError> {
        if let Err(state) = self.state.transition(State::Created, State::Preparing) {
            return Err(match state {
                State::Stopped => ServerError::AlreadyStopped,
                _ => ServerError::AlreadyRunning,
            });
        }
        self.pipelines();

        let (listener, addr) = match self.bind().await {
            Ok(bound) => bound,
            Err(e) => {
                tracing::error!(error = %e, "Server failed to start");
                self.state.swap(State::Stopped);
                self.signals.set();
                self.drained.set();
                self.done.set();
                return Err(e);
            }
        };
        let _ = self.local_addr.set(addr);

        if self.state.transition(State::Preparing, State::Ready).is_err() {
            // Stopped while binding.
            drop(listener);
            self.drained.set();
            self.done.wait().await;
            return Ok(());
        }

        tracing::info!(
            address = %addr,
            base_url = %self.base_url(),
            routes = self.routes.route_count(),
            "Server ready"
        );

        let server = Arc::clone(self);
        tokio::spawn(async move {
            for hook in &server.startup_hooks {
                hook(Arc::clone(&server)).await;
            }
        });

        self.serve(listener).await;
        self.drained.set();
        self.done.wait().await;
        Ok(())
    }

    async fn bind(&self) -> Result<(Listener, SocketAddr), ServerError> {
        let server = &self.config.server;
        let listener = Listener::bind(&server.host, server.port, server.max_connections).await?;
        let addr = listener.local_addr()?;
        Ok((listener, addr))
    }

    async fn serve(self: &Arc<Self>, listener: Listener) {
        let tracker = ConnectionTracker::new();
        let mut active = tracker.subscribe();
        tokio::spawn(async move {
            metrics::set_active_connections(0);
            while active.changed().await.is_ok() {
                let count = *active.borrow_and_update();
                metrics::set_active_connections(count);
            }
        });
        loop {
            tokio::select! {
                _ = self.shutdown.wait() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.spawn_connection(stream, peer, permit, &tracker),
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }
        drop(listener);

        tracing::info!(
            active_connections = tracker.active_count(),
            "Listener closed, draining connections"
        );
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, tracker.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                active_connections = tracker.active_count(),
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "Drain timed out"
            );
        }
    }

    #[allow(deprecated)]
    fn spawn_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        permit: ConnectionPermit,
        tracker: &ConnectionTracker,
    ) {
        let guard = tracker.track();

        let mut extensions = self.base_extensions.clone();
        if let Some(hook) = &self.connection_hook {
            hook(&mut extensions, peer);
        }
        extensions.insert(ConnectInfo(peer));

        let server_config = &self.config.server;
        let service = ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(Duration::from_secs(server_config.request_timeout_secs)))
            .map_request(|request: Request<Incoming>| request.map(Body::new))
            .layer(DefaultBodyLimit::max(parse::max_body_bytes(server_config.max_upload_size)))
            .service(Dispatcher {
                server: Arc::clone(self),
                extensions,
            });

        let server = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            tracing::trace!(connection_id = %guard.id(), peer_addr = %peer, "Serving connection");

            let builder = auto::Builder::new(TokioExecutor::new());
            let connection = builder
                .serve_connection_with_upgrades(TokioIo::new(stream), TowerToHyperService::new(service));
            tokio::pin!(connection);

            let result = tokio::select! {
                result = connection.as_mut() => result,
                _ = server.shutdown.wait() => {
                    connection.as_mut().graceful_shutdown();
                    connection.as_mut().await
                }
            };
            if let Err(e) = result {
                tracing::debug!(connection_id = %guard.id(), error = %e, "Connection error");
            }
            drop(guard);
        });
    }

    /// Stop the server and wait until shutdown completes.
    ///
    /// No-op before `start`. Otherwise closes the listener, drains
    /// connections (at most [`SHUTDOWN_TIMEOUT`]), runs shutdown hooks in
    /// registration order, closes the database and releases `start`.
    /// Concurrent callers all return once shutdown is complete.
    pub async fn stop(self: &Arc<Self>) {
        loop {
            match self.state.get() {
                State::Created => {
                    tracing::debug!("Stop before start ignored");
                    return;
                }
                State::Stopped => {
                    self.done.wait().await;
                    return;
                }
                current => {
                    if self.state.transition(current, State::Stopped).is_ok() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Server stopping");
        self.signals.set();
        self.shutdown.set();
        self.drained.wait().await;

        for hook in &self.shutdown_hooks {
            hook(Arc::clone(self)).await;
        }
        if let Some(database) = &self.database {
            database.close().await;
            tracing::debug!(driver = database.driver(), "Database closed");
        }

        self.done.set();
        tracing::info!("Shutdown complete");
    }

    /// Stop the server on SIGINT or SIGTERM.
    ///
    /// Only the first call spawns a listener; later calls, or calls after
    /// `stop`, return `None`. The listener task ends when the server stops.
    pub fn register_signal_hook(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.signal_hook.swap(true, Ordering::SeqCst) || self.signals.is_set() {
            return None;
        }
        Some(signals::spawn(Arc::clone(self)))
    }

    pub(crate) async fn signals_released(&self) {
        self.signals.wait().await;
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("app", &self.config.app.name)
            .field("state", &self.state.get())
            .field("local_addr", &self.local_addr())
            .field("routes", &self.routes.route_count())
            .finish()
    }
}

fn format_url(protocol: &str, host: &str, port: Option<u16>, base: &str) -> String {
    let default_port = match protocol {
        "https" => 443,
        _ => 80,
    };
    match port {
        Some(port) if port != default_port => format!("{protocol}://{host}:{port}{base}"),
        _ => format!("{protocol}://{host}{base}"),
    }
}

/// Tower service handing connection requests to [`Server::handle`].
#[derive(Clone)]
struct Dispatcher {
    server: Arc<Server>,
    extensions: Extensions,
}

impl Service<Request<Body>> for Dispatcher {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        request.extensions_mut().extend(self.extensions.clone());
        let server = Arc::clone(&self.server);
        Box::pin(async move { Ok(server.handle(request).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::http::context::Context;

    fn server(config: Config) -> Server {
        let mut server = Server::new(config).unwrap();
        server
            .router()
            .subrouter("/users")
            .get("/{id:[0-9]+}", |_ctx: Context| async { "user" })
            .name("users.show");
        server
    }

    #[test]
    fn base_url_omits_default_ports() {
        let mut config = Config::default();
        config.server.port = 80;
        assert_eq!(server(config.clone()).base_url(), "http://127.0.0.1");

        config.server.port = 8080;
        config.server.domain = Some("example.org".into());
        assert_eq!(server(config.clone()).base_url(), "http://example.org:8080");

        config.server.protocol = "https".into();
        config.server.port = 443;
        assert_eq!(server(config).base_url(), "https://example.org");
    }

    #[test]
    fn url_uses_proxy_when_configured() {
        let mut config = Config::default();
        config.server.proxy = Some(ProxyConfig {
            protocol: "https".into(),
            host: "api.example.org".into(),
            port: None,
            base: "/v2".into(),
        });
        let server = server(config);
        assert_eq!(
            server.url("users.show", &["7"]).unwrap(),
            "https://api.example.org/v2/users/7"
        );
        assert!(matches!(
            server.url("missing", &[]),
            Err(RoutingError::UnknownRoute(_))
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = Config::default();
        config.server.max_connections = 0;
        assert!(matches!(Server::new(config), Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn stop_before_start_is_a_noop() {
        let server = Arc::new(Server::new(Config::default()).unwrap());
        server.stop().await;
        assert_eq!(server.state(), State::Created);
    }

    #[tokio::test]
    async fn signal_listener_ends_with_stop() {
        let mut config = Config::default();
        config.server.port = 0;
        let server = Arc::new(Server::new(config).unwrap());

        let running = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.start().await })
        };
        while !server.is_ready() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let listener = server.register_signal_hook().expect("first registration spawns");
        assert!(server.register_signal_hook().is_none());
        assert!(!listener.is_finished());

        server.stop().await;
        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener released by stop")
            .unwrap();
        running.await.unwrap().unwrap();
        assert!(server.register_signal_hook().is_none());
    }

    #[tokio::test]
    async fn start_after_stop_fails() {
        let mut config = Config::default();
        config.server.port = 0;
        let server = Arc::new(Server::new(config).unwrap());

        let running = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.start().await })
        };
        while !server.is_ready() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        server.stop().await;
        running.await.unwrap().unwrap();

        assert_eq!(server.state(), State::Stopped);
        assert!(matches!(server.start().await, Err(ServerError::AlreadyStopped)));
    }
}
