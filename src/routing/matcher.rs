//! Route matching logic.
//!
//! # Responsibilities
//! - Walk the tree depth-first, consuming router prefixes from the path
//! - Test routes for a full (terminal) match of the remaining path
//! - Report a matched route, or exactly one of "not found" and
//!   "method not allowed"
//!
//! # Design Decisions
//! - Child routers are tried before the router's own routes, each in
//!   registration order; the first full match wins
//! - A router whose subtree yields nothing gives back the path it consumed
//!   and the parameters it extracted
//! - Method-not-allowed beats not-found whenever any route matched the URI
//! - Matching never allocates matchers and never locks: the tree is frozen

use axum::http::{Method, StatusCode};

use crate::routing::route::RouteId;
use crate::routing::router::{RouteTree, RouterId};

/// Negative routing outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchError {
    NotFound,
    MethodNotAllowed,
}

impl MatchError {
    pub fn status(self) -> StatusCode {
        match self {
            MatchError::NotFound => StatusCode::NOT_FOUND,
            MatchError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

/// Route parameters, in traversal order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Insert a value, replacing an earlier one with the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Per-request traversal state and its outcome.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    params: Params,
    route: Option<RouteId>,
    error: Option<MatchError>,
    deepest: (RouterId, usize),
    rejecting_router: Option<RouterId>,
    allowed: Vec<Method>,
}

impl RouteMatch {
    fn new() -> Self {
        Self {
            params: Params::new(),
            route: None,
            error: None,
            deepest: (RouteTree::ROOT, 0),
            rejecting_router: None,
            allowed: Vec::new(),
        }
    }

    pub fn route(&self) -> Option<RouteId> {
        self.route
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn error(&self) -> Option<MatchError> {
        self.error
    }

    /// Methods of every route whose URI matched; used for `Allow`.
    pub fn allowed_methods(&self) -> &[Method] {
        &self.allowed
    }

    /// Router whose fallback pipeline serves an unmatched request: the owner of
    /// the first URI-only match, else the deepest router whose prefix matched.
    pub fn fallback_router(&self) -> RouterId {
        match self.error {
            Some(MatchError::MethodNotAllowed) => self.rejecting_router.unwrap_or(self.deepest.0),
            _ => self.deepest.0,
        }
    }

    pub(crate) fn into_parts(self) -> (Option<RouteId>, Params, Option<MatchError>, Vec<Method>) {
        (self.route, self.params, self.error, self.allowed)
    }
}

impl RouteTree {
    /// Resolve `method` + `path` to a route or a negative outcome.
    pub fn match_request(&self, method: &Method, path: &str) -> RouteMatch {
        let mut result = RouteMatch::new();
        let mut params = Vec::new();
        if !self.match_router(Self::ROOT, method, path, 0, &mut params, &mut result) {
            result.error = Some(if result.allowed.is_empty() {
                MatchError::NotFound
            } else {
                MatchError::MethodNotAllowed
            });
        }
        result
    }

    fn match_router(
        &self,
        id: RouterId,
        method: &Method,
        remaining: &str,
        depth: usize,
        params: &mut Vec<(String, String)>,
        result: &mut RouteMatch,
    ) -> bool {
        let router = self.router(id);
        let Some((consumed, values)) = router.pattern.match_prefix(remaining) else {
            return false;
        };

        let mark = params.len();
        params.extend(values.into_iter().map(|(name, value)| (name, value.to_string())));
        if depth > result.deepest.1 {
            result.deepest = (id, depth);
        }
        let rest = &remaining[consumed..];

        for &child in &router.routers {
            if self.match_router(child, method, rest, depth + 1, params, result) {
                return true;
            }
        }

        for &route_id in &router.routes {
            let route = &self.routes[route_id.0];
            let Some((_, values)) = route.pattern.match_prefix(rest) else {
                continue;
            };
            if route.allows(method) {
                params.extend(values.into_iter().map(|(name, value)| (name, value.to_string())));
                let mut collected = Params::new();
                for (name, value) in params.drain(..) {
                    collected.insert(name, value);
                }
                result.params = collected;
                result.route = Some(route_id);
                result.error = None;
                return true;
            }
            if result.rejecting_router.is_none() {
                result.rejecting_router = Some(id);
            }
            for allowed in &route.methods {
                if !result.allowed.contains(allowed) {
                    result.allowed.push(allowed.clone());
                }
            }
        }

        params.truncate(mark);
        false
    }
}
