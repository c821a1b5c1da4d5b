//! Per-request context handed through the middleware pipeline.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Extensions, HeaderMap, Method, Request, Uri};

use serde_json::Value;

use crate::config::Config;
use crate::http::middleware::parse::{Data, FormValues};
use crate::http::request::RequestId;
use crate::http::server::Server;
use crate::lang::Language;
use crate::routing::{MatchError, Params, RouteId, RouteMatch, RouteRef};

/// Everything a handler or middleware knows about the current request.
pub struct Context {
    request: Request<Body>,
    params: Params,
    route: Option<RouteId>,
    error: Option<MatchError>,
    allowed: Vec<Method>,
    server: Arc<Server>,
    query: Option<FormValues>,
    data: Option<Data>,
    validated_query: Option<Value>,
    validated_body: Option<Value>,
    language: Option<Arc<Language>>,
}

impl Context {
    pub(crate) fn new(request: Request<Body>, matched: RouteMatch, server: Arc<Server>) -> Self {
        let (route, params, error, allowed) = matched.into_parts();
        Self {
            request,
            params,
            route,
            error,
            allowed,
            server,
            query: None,
            data: None,
            validated_query: None,
            validated_body: None,
            language: None,
        }
    }

    pub fn request(&self) -> &Request<Body> {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request<Body> {
        &mut self.request
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn uri(&self) -> &Uri {
        self.request.uri()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.request.headers()
    }

    pub fn extensions(&self) -> &Extensions {
        self.request.extensions()
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        self.request.extensions_mut()
    }

    /// Take the raw body, leaving an empty one behind.
    pub fn take_body(&mut self) -> Body {
        std::mem::take(self.request.body_mut())
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// The matched route, `None` for not-found and method-not-allowed requests.
    pub fn route(&self) -> Option<RouteRef<'_>> {
        self.route.map(|id| self.server.routes().route(id))
    }

    pub fn match_error(&self) -> Option<MatchError> {
        self.error
    }

    /// Methods accepted by the routes that matched the URI but not the method.
    pub fn allowed_methods(&self) -> &[Method] {
        &self.allowed
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn config(&self) -> &Config {
        self.server.config()
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request.extensions().get::<RequestId>()
    }

    /// Parsed query string, once the parse middleware ran.
    pub fn query(&self) -> Option<&FormValues> {
        self.query.as_ref()
    }

    pub fn set_query(&mut self, query: FormValues) {
        self.query = Some(query);
    }

    /// Parsed body, once the parse middleware ran and the body was non-empty.
    pub fn data(&self) -> Option<&Data> {
        self.data.as_ref()
    }

    pub fn set_data(&mut self, data: Data) {
        self.data = Some(data);
    }

    /// Query as the validation middleware checked it, with single values
    /// lifted into arrays where a rule requires one.
    pub fn validated_query(&self) -> Option<&Value> {
        self.validated_query.as_ref()
    }

    /// Body counterpart of [`Context::validated_query`].
    pub fn validated_body(&self) -> Option<&Value> {
        self.validated_body.as_ref()
    }

    pub(crate) fn set_validated(&mut self, query: Option<Value>, body: Option<Value>) {
        self.validated_query = query;
        self.validated_body = body;
    }

    /// Language selected for this request, or the configured default.
    pub fn language(&self) -> Arc<Language> {
        match &self.language {
            Some(language) => Arc::clone(language),
            None => self.server.catalog().default_language(),
        }
    }

    pub fn set_language(&mut self, language: Arc<Language>) {
        self.language = Some(language);
    }
}
