//! Route leaves of the routing tree.
//!
//! # Responsibilities
//! - Hold one handler, its allowed methods and its compiled terminal pattern
//! - Carry route-scoped middleware and free-form metadata
//! - Rebuild the route's full URI for reverse routing
//!
//! # Design Decisions
//! - Routes live in the tree's arena; the parent link is an index, never an
//!   owning reference
//! - URI and methods are fixed at registration; name, metadata and middleware
//!   stay editable until the server freezes the tree

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::http::Method;

use crate::http::handler::{Handler, Middleware};
use crate::http::middleware::cors::{self, CorsPolicy};
use crate::http::middleware::validate;
use crate::routing::pattern::{self, Pattern};
use crate::routing::router::{RouteTree, RouterId, RoutingError};
use crate::validation::{self, RuleGenerator};

/// Index of a route inside its [`RouteTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteId(pub(crate) usize);

/// Opaque key/value metadata read by generic middleware.
#[derive(Clone, Default)]
pub struct Metadata {
    entries: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Metadata {
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), Arc::new(value));
    }

    /// Typed lookup. Returns `None` when the key is absent or holds another type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.entries.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// A leaf match target.
pub struct Route {
    pub(crate) name: Option<String>,
    pub(crate) uri: String,
    pub(crate) methods: Vec<Method>,
    /// `OPTIONS` was added for CORS, not registered by the caller.
    pub(crate) implicit_options: bool,
    pub(crate) pattern: Pattern,
    pub(crate) parent: RouterId,
    pub(crate) meta: Metadata,
    pub(crate) middleware: Vec<Arc<dyn Middleware>>,
    pub(crate) handler: Handler,
}

impl Route {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// URI fragment relative to the parent router.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn allows(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    /// Whether the handler itself was registered for `OPTIONS`.
    pub fn handles_options(&self) -> bool {
        self.allows(&Method::OPTIONS) && !self.implicit_options
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn parent(&self) -> RouterId {
        self.parent
    }

    pub fn meta(&self) -> &Metadata {
        &self.meta
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("uri", &self.uri)
            .field("methods", &self.methods)
            .field("meta", &self.meta)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// Read-only view of a route with access to its ancestors.
#[derive(Clone, Copy)]
pub struct RouteRef<'a> {
    pub(crate) tree: &'a RouteTree,
    pub(crate) id: RouteId,
}

impl<'a> RouteRef<'a> {
    pub fn id(&self) -> RouteId {
        self.id
    }

    pub fn route(&self) -> &'a Route {
        &self.tree.routes[self.id.0]
    }

    pub fn name(&self) -> Option<&'a str> {
        self.route().name()
    }

    pub fn methods(&self) -> &'a [Method] {
        self.route().methods()
    }

    pub fn meta(&self) -> &'a Metadata {
        self.route().meta()
    }

    /// Full URI template: every ancestor prefix followed by the route's own fragment.
    pub fn full_uri(&self) -> String {
        let route = self.route();
        let mut uri: String = self
            .tree
            .ancestors(route.parent)
            .into_iter()
            .map(|id| self.tree.router(id).prefix())
            .collect();
        uri.push_str(&route.uri);
        uri
    }

    /// Substitute the placeholders of [`RouteRef::full_uri`] with `values`,
    /// in appearance order.
    pub fn build_uri(&self, values: &[&str]) -> Result<String, RoutingError> {
        let template = self.full_uri();
        let expected = pattern::count_params(&template)?;
        if expected != values.len() {
            return Err(RoutingError::ParameterCount {
                route: self.name().unwrap_or(&template).to_string(),
                expected,
                given: values.len(),
            });
        }
        Ok(pattern::substitute(&template, values)?)
    }

    /// CORS policy applying to this route: its own override or the nearest
    /// ancestor router's.
    pub fn cors_policy(&self) -> Option<&'a Arc<CorsPolicy>> {
        self.meta()
            .get::<Arc<CorsPolicy>>(cors::META_KEY)
            .or_else(|| self.tree.inherited_cors(self.route().parent))
    }
}

impl fmt::Debug for RouteRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.route(), f)
    }
}

/// Fluent, registration-time handle on a route.
pub struct RouteMut<'a> {
    pub(crate) tree: &'a mut RouteTree,
    pub(crate) id: RouteId,
}

impl<'a> RouteMut<'a> {
    pub fn id(&self) -> RouteId {
        self.id
    }

    fn route_mut(&mut self) -> &mut Route {
        &mut self.tree.routes[self.id.0]
    }

    /// Name the route so it can be looked up for reverse routing.
    ///
    /// # Panics
    /// When the route is already named or the name is taken in this tree.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if let Some(existing) = &self.tree.routes[self.id.0].name {
            panic!("{}", RoutingError::AlreadyNamed { existing: existing.clone(), name });
        }
        if self.tree.names.contains_key(&name) {
            panic!("{}", RoutingError::DuplicateName(name));
        }
        self.tree.names.insert(name.clone(), self.id);
        self.route_mut().name = Some(name);
        self
    }

    pub fn meta<T: Any + Send + Sync>(mut self, key: impl Into<String>, value: T) -> Self {
        self.route_mut().meta.insert(key, value);
        self
    }

    /// Append a route-scoped middleware.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.route_mut().middleware.push(Arc::new(middleware));
        self
    }

    /// Validate the query string with rules produced per request by `generator`.
    pub fn validate_query(self, generator: RuleGenerator) -> Self {
        self.with_rules(validation::QUERY_RULES_KEY, generator)
    }

    /// Validate the parsed body with rules produced per request by `generator`.
    pub fn validate_body(self, generator: RuleGenerator) -> Self {
        self.with_rules(validation::BODY_RULES_KEY, generator)
    }

    fn with_rules(mut self, key: &str, generator: RuleGenerator) -> Self {
        let route = self.route_mut();
        let installed = route.meta.contains(validation::QUERY_RULES_KEY)
            || route.meta.contains(validation::BODY_RULES_KEY);
        route.meta.insert(key, generator);
        if !installed {
            route.middleware.push(Arc::new(validate::middleware()));
        }
        self
    }

    /// Override the CORS policy for this route. When no ancestor router has
    /// CORS enabled, this also enables it for the route alone.
    pub fn cors(mut self, policy: CorsPolicy) -> Self {
        policy.check();
        let parent = self.tree.routes[self.id.0].parent;
        let inherited = self.tree.inherited_cors(parent).is_some();
        let route = self.route_mut();
        route.meta.insert(cors::META_KEY, Arc::new(policy));
        if !inherited {
            if !route.methods.contains(&Method::OPTIONS) {
                route.methods.push(Method::OPTIONS);
                route.implicit_options = true;
            }
            route.middleware.insert(0, Arc::new(cors::middleware()));
        }
        self
    }

    pub fn as_ref(&self) -> RouteRef<'_> {
        RouteRef { tree: self.tree, id: self.id }
    }
}
