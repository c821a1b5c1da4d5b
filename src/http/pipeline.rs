//! Middleware pipeline composition.
//!
//! # Responsibilities
//! - Order the middleware of a matched route: global middleware of every
//!   ancestor (root first), then router-scoped middleware of every ancestor
//!   (root first), then the route's own middleware, then its handler
//! - Build the fallback pipelines (not found, method not allowed) from global
//!   middleware only, so core guarantees still hold for error responses
//! - Compose every pipeline once when the tree is frozen
//!
//! # Design Decisions
//! - Chains are folded right-to-left: the first middleware is outermost
//! - Fallback pipelines are built per router; the match decides which one runs

use std::sync::Arc;

use axum::http::StatusCode;

use crate::http::handler::{Handler, Middleware};
use crate::http::response;
use crate::routing::{MatchError, RouteId, RouteMatch, RouteTree, RouterId};

/// Wrap `terminal` in `chain`, `chain[0]` ending up outermost.
pub fn compose(chain: &[Arc<dyn Middleware>], terminal: Handler) -> Handler {
    chain
        .iter()
        .rev()
        .fold(terminal, |next, middleware| middleware.wrap(next))
}

/// Global middleware of `router` and its ancestors, root first.
pub fn global_chain(tree: &RouteTree, router: RouterId) -> Vec<Arc<dyn Middleware>> {
    tree.ancestors(router)
        .into_iter()
        .flat_map(|id| tree.router(id).global_middleware.iter().cloned())
        .collect()
}

/// Full ordered chain for a matched route.
pub fn route_chain(tree: &RouteTree, route: RouteId) -> Vec<Arc<dyn Middleware>> {
    let route = tree.route(route).route();
    let ancestors = tree.ancestors(route.parent());

    let mut chain = global_chain(tree, route.parent());
    chain.extend(
        ancestors
            .iter()
            .flat_map(|&id| tree.router(id).middleware.iter().cloned()),
    );
    chain.extend(route.middleware.iter().cloned());
    chain
}

/// Every pipeline of a frozen tree.
pub(crate) struct Pipelines {
    routes: Vec<Handler>,
    not_found: Vec<Handler>,
    method_not_allowed: Vec<Handler>,
}

impl Pipelines {
    pub(crate) fn build(tree: &RouteTree) -> Self {
        let routes = tree
            .routes()
            .map(|route| compose(&route_chain(tree, route.id()), route.route().handler().clone()))
            .collect();

        let fallback = |status: StatusCode| -> Vec<Handler> {
            (0..tree.router_count())
                .map(|i| compose(&global_chain(tree, RouterId(i)), response::status_handler(status)))
                .collect()
        };

        let pipelines = Self {
            routes,
            not_found: fallback(StatusCode::NOT_FOUND),
            method_not_allowed: fallback(StatusCode::METHOD_NOT_ALLOWED),
        };
        tracing::debug!(
            routes = tree.route_count(),
            routers = tree.router_count(),
            "Pipelines composed"
        );
        pipelines
    }

    pub(crate) fn select(&self, matched: &RouteMatch) -> &Handler {
        if let Some(route) = matched.route() {
            return &self.routes[route.0];
        }
        let router = matched.fallback_router().0;
        match matched.error() {
            Some(MatchError::MethodNotAllowed) => &self.method_not_allowed[router],
            _ => &self.not_found[router],
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::body::Body;
    use axum::http::Request;

    use super::*;
    use crate::config::Config;
    use crate::http::context::Context;
    use crate::http::handler::{from_fn, Next};
    use crate::http::server::Server;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn record(log: &Log, label: &'static str) -> impl Middleware {
        let log = Arc::clone(log);
        from_fn(move |ctx: Context, next: Next| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(label);
                next.run(ctx).await
            }
        })
    }

    fn server(log: &Log) -> Arc<Server> {
        let mut server = Server::new(Config::default()).unwrap();
        {
            let mut root = server.router();
            root.global_middleware(record(log, "root-global"));
            root.middleware(record(log, "root-scoped"));

            let mut api = root.subrouter("/api");
            api.middleware(record(log, "api-scoped"));
            api.global_middleware(record(log, "api-global"));

            let handler_log = Arc::clone(log);
            api.get("/items", move |_ctx: Context| {
                let log = Arc::clone(&handler_log);
                async move {
                    log.lock().unwrap().push("handler");
                    "items"
                }
            })
            .middleware(record(log, "route-1"))
            .middleware(record(log, "route-2"));
        }
        Arc::new(server)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn matched_route_chain_order() {
        let log: Log = Arc::default();
        let server = server(&log);

        let response = server.handle(get("/api/items")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *log.lock().unwrap(),
            [
                "root-global",
                "api-global",
                "root-scoped",
                "api-scoped",
                "route-1",
                "route-2",
                "handler"
            ]
        );
    }

    #[tokio::test]
    async fn fallback_runs_global_middleware_only() {
        let log: Log = Arc::default();
        let server = server(&log);

        let response = server.handle(get("/api/missing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(*log.lock().unwrap(), ["root-global", "api-global"]);

        log.lock().unwrap().clear();
        let response = server.handle(get("/elsewhere")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(*log.lock().unwrap(), ["root-global"]);
    }

    #[tokio::test]
    async fn method_not_allowed_lists_allowed_methods() {
        let log: Log = Arc::default();
        let server = server(&log);

        let request = Request::delete("/api/items").body(Body::empty()).unwrap();
        let response = server.handle(request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()["allow"], "GET, HEAD");
        assert_eq!(*log.lock().unwrap(), ["root-global", "api-global"]);
    }
}
