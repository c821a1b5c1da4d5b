//! Router tree construction and lookup.
//!
//! # Responsibilities
//! - Own every router and route of the tree in one arena
//! - Compile prefixes and route URIs through the tree's pattern cache
//! - Keep the named-route index for reverse routing
//! - Expose fluent registration handles ([`RouterMut`], [`RouteMut`])
//!
//! # Design Decisions
//! - Index-based parent links: children never own their parent
//! - Prefixes compose by plain concatenation, not path-segment joining
//! - Immutable once the server freezes it (matching takes `&self`, no locks)
//! - Registration errors panic: they are programming errors found at startup

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::http::Method;
use axum::response::IntoResponse;

use crate::http::context::Context;
use crate::http::handler::{Handler, Middleware};
use crate::http::middleware::cors::{self, CorsPolicy};
use crate::routing::pattern::{Pattern, PatternCache, PatternError};
use crate::routing::route::{Metadata, Route, RouteId, RouteMut, RouteRef};

/// Index of a router inside its [`RouteTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouterId(pub(crate) usize);

/// Routing errors surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("route \"{0}\" does not exist")]
    UnknownRoute(String),

    #[error("route name \"{0}\" is already registered")]
    DuplicateName(String),

    #[error("route is already named \"{existing}\", cannot rename it to \"{name}\"")]
    AlreadyNamed { existing: String, name: String },

    #[error("route \"{route}\" expects {expected} parameters, {given} given")]
    ParameterCount {
        route: String,
        expected: usize,
        given: usize,
    },

    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// An internal node of the tree.
pub struct Router {
    pub(crate) prefix: String,
    pub(crate) pattern: Pattern,
    pub(crate) parent: Option<RouterId>,
    pub(crate) routers: Vec<RouterId>,
    pub(crate) routes: Vec<RouteId>,
    pub(crate) global_middleware: Vec<Arc<dyn Middleware>>,
    pub(crate) middleware: Vec<Arc<dyn Middleware>>,
    pub(crate) cors: Option<Arc<CorsPolicy>>,
}

impl Router {
    /// Prefix fragment relative to the parent router.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn parent(&self) -> Option<RouterId> {
        self.parent
    }

    pub fn subrouters(&self) -> &[RouterId] {
        &self.routers
    }

    pub fn routes(&self) -> &[RouteId] {
        &self.routes
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("prefix", &self.prefix)
            .field("parent", &self.parent)
            .field("routers", &self.routers)
            .field("routes", &self.routes)
            .field("global_middleware", &self.global_middleware.len())
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// Arena owning a whole router tree.
pub struct RouteTree {
    pub(crate) routers: Vec<Router>,
    pub(crate) routes: Vec<Route>,
    pub(crate) names: HashMap<String, RouteId>,
    patterns: PatternCache,
}

impl RouteTree {
    pub const ROOT: RouterId = RouterId(0);

    /// Create a tree holding only an empty-prefix root router.
    pub fn new() -> Self {
        let patterns = PatternCache::new();
        let root = Router {
            prefix: String::new(),
            pattern: compile_or_panic("", false, &patterns),
            parent: None,
            routers: Vec::new(),
            routes: Vec::new(),
            global_middleware: Vec::new(),
            middleware: Vec::new(),
            cors: None,
        };
        Self {
            routers: vec![root],
            routes: Vec::new(),
            names: HashMap::new(),
            patterns,
        }
    }

    pub fn root(&mut self) -> RouterMut<'_> {
        RouterMut { tree: self, id: Self::ROOT }
    }

    pub fn router(&self, id: RouterId) -> &Router {
        &self.routers[id.0]
    }

    pub fn route(&self, id: RouteId) -> RouteRef<'_> {
        RouteRef { tree: self, id }
    }

    /// Look up a route by its unique name.
    pub fn named(&self, name: &str) -> Option<RouteRef<'_>> {
        self.names.get(name).map(|&id| self.route(id))
    }

    /// Every route, in registration order.
    pub fn routes(&self) -> impl Iterator<Item = RouteRef<'_>> {
        (0..self.routes.len()).map(move |i| self.route(RouteId(i)))
    }

    pub fn router_count(&self) -> usize {
        self.routers.len()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn patterns(&self) -> &PatternCache {
        &self.patterns
    }

    /// Routers from the root down to `id`, inclusive.
    pub fn ancestors(&self, id: RouterId) -> Vec<RouterId> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.routers[current.0].parent {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Nearest CORS policy set on `id` or one of its ancestors.
    pub(crate) fn inherited_cors(&self, id: RouterId) -> Option<&Arc<CorsPolicy>> {
        let mut current = Some(id);
        while let Some(router_id) = current {
            let router = &self.routers[router_id.0];
            if let Some(policy) = &router.cors {
                return Some(policy);
            }
            current = router.parent;
        }
        None
    }
}

impl Default for RouteTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RouteTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTree")
            .field("routers", &self.routers)
            .field("routes", &self.routes)
            .finish()
    }
}

fn compile_or_panic(template: &str, terminal: bool, cache: &PatternCache) -> Pattern {
    match Pattern::compile(template, terminal, cache) {
        Ok(pattern) => pattern,
        Err(e) => panic!("{e}"),
    }
}

/// Fluent, registration-time handle on a router.
pub struct RouterMut<'a> {
    pub(crate) tree: &'a mut RouteTree,
    pub(crate) id: RouterId,
}

impl<'a> RouterMut<'a> {
    pub fn id(&self) -> RouterId {
        self.id
    }

    /// Create a child router whose prefix is appended to this router's.
    ///
    /// # Panics
    /// When `prefix` is not a valid template.
    pub fn subrouter(&mut self, prefix: &str) -> RouterMut<'_> {
        let pattern = compile_or_panic(prefix, false, &self.tree.patterns);
        let id = RouterId(self.tree.routers.len());
        self.tree.routers.push(Router {
            prefix: prefix.to_string(),
            pattern,
            parent: Some(self.id),
            routers: Vec::new(),
            routes: Vec::new(),
            global_middleware: Vec::new(),
            middleware: Vec::new(),
            cors: None,
        });
        self.tree.routers[self.id.0].routers.push(id);
        RouterMut { tree: self.tree, id }
    }

    /// Register routes on a child router inside a closure.
    pub fn group(&mut self, prefix: &str, register: impl FnOnce(&mut RouterMut<'_>)) -> &mut Self {
        let mut child = self.subrouter(prefix);
        register(&mut child);
        self
    }

    /// Middleware applied to every request reaching this subtree, matched or not.
    pub fn global_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.tree.routers[self.id.0]
            .global_middleware
            .push(Arc::new(middleware));
        self
    }

    /// Middleware applied only to routes matched below this router.
    pub fn middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.tree.routers[self.id.0].middleware.push(Arc::new(middleware));
        self
    }

    /// Enable CORS for this subtree. Routes registered afterwards below this
    /// router also accept `OPTIONS` so preflight requests reach them.
    ///
    /// # Panics
    /// When the policy combines credentials with a wildcard.
    pub fn cors(&mut self, policy: CorsPolicy) -> &mut Self {
        policy.check();
        let inherited = self.tree.inherited_cors(self.id).is_some();
        let router = &mut self.tree.routers[self.id.0];
        router.cors = Some(Arc::new(policy));
        if !inherited {
            router.middleware.insert(0, Arc::new(cors::middleware()));
        }
        self
    }

    /// Register a route matching any of `methods`.
    ///
    /// # Panics
    /// When `uri` is not a valid template.
    pub fn route<F, Fut>(&mut self, methods: &[Method], uri: &str, handler: F) -> RouteMut<'_>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoResponse,
    {
        self.route_handler(methods, uri, Handler::new(handler))
    }

    /// Register a route with an already type-erased handler.
    pub fn route_handler(&mut self, methods: &[Method], uri: &str, handler: Handler) -> RouteMut<'_> {
        let mut methods = methods.to_vec();
        if methods.contains(&Method::GET) && !methods.contains(&Method::HEAD) {
            methods.push(Method::HEAD);
        }
        let implicit_options =
            self.tree.inherited_cors(self.id).is_some() && !methods.contains(&Method::OPTIONS);
        if implicit_options {
            methods.push(Method::OPTIONS);
        }

        let pattern = compile_or_panic(uri, true, &self.tree.patterns);
        let id = RouteId(self.tree.routes.len());
        self.tree.routes.push(Route {
            name: None,
            uri: uri.to_string(),
            methods,
            implicit_options,
            pattern,
            parent: self.id,
            meta: Metadata::default(),
            middleware: Vec::new(),
            handler,
        });
        self.tree.routers[self.id.0].routes.push(id);
        RouteMut { tree: self.tree, id }
    }

    pub fn get<F, Fut>(&mut self, uri: &str, handler: F) -> RouteMut<'_>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoResponse,
    {
        self.route(&[Method::GET], uri, handler)
    }

    pub fn post<F, Fut>(&mut self, uri: &str, handler: F) -> RouteMut<'_>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoResponse,
    {
        self.route(&[Method::POST], uri, handler)
    }

    pub fn put<F, Fut>(&mut self, uri: &str, handler: F) -> RouteMut<'_>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoResponse,
    {
        self.route(&[Method::PUT], uri, handler)
    }

    pub fn patch<F, Fut>(&mut self, uri: &str, handler: F) -> RouteMut<'_>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoResponse,
    {
        self.route(&[Method::PATCH], uri, handler)
    }

    pub fn delete<F, Fut>(&mut self, uri: &str, handler: F) -> RouteMut<'_>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoResponse,
    {
        self.route(&[Method::DELETE], uri, handler)
    }

    pub fn options<F, Fut>(&mut self, uri: &str, handler: F) -> RouteMut<'_>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoResponse,
    {
        self.route(&[Method::OPTIONS], uri, handler)
    }
}
