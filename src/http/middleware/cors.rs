//! Cross-origin resource sharing.
//!
//! # Responsibilities
//! - Tell preflight requests (`OPTIONS` + `Access-Control-Request-Method`)
//!   apart from actual cross-origin requests
//! - Answer preflights with 204 and no body, or pass them through to the
//!   handler when the policy asks for it
//! - Decorate actual responses with the policy's CORS headers
//!
//! # Design Decisions
//! - Headers are computed by `tower_http::cors`: each policy wraps a
//!   [`CorsLayer`] applied to a head-only copy of the request
//! - The middleware is stateless: the policy is resolved per request from the
//!   matched route (its `cors` metadata, else the nearest router policy)
//! - A request without `Origin` gets no CORS headers; preflights are still
//!   terminal so handlers never see them
//! - A bare `OPTIONS` request is refused with 400 unless the route registered
//!   `OPTIONS` itself

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::{Layer, ServiceExt};
use tower_http::cors::{Any, CorsLayer};

use crate::http::context::Context;
use crate::http::handler::{Handler, Middleware};
use crate::http::response;

/// Route metadata key holding an `Arc<CorsPolicy>` override.
pub const META_KEY: &str = "cors";

/// CORS settings for a router subtree or a single route.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    layer: CorsLayer,
    passthrough: bool,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self::new(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    Method::GET,
                    Method::HEAD,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                ])
                .allow_headers([
                    header::ORIGIN,
                    header::ACCEPT,
                    header::CONTENT_TYPE,
                    HeaderName::from_static("x-requested-with"),
                ]),
        )
    }
}

impl CorsPolicy {
    pub fn new(layer: CorsLayer) -> Self {
        Self { layer, passthrough: false }
    }

    pub fn layer(&self) -> &CorsLayer {
        &self.layer
    }

    /// Adjust the underlying layer, e.g. for `allow_private_network`.
    pub fn map_layer(mut self, f: impl FnOnce(CorsLayer) -> CorsLayer) -> Self {
        self.layer = f(self.layer);
        self
    }

    /// Restrict the allowed origins. A `*` entry allows any origin.
    ///
    /// # Panics
    /// When an origin is not a valid header value.
    pub fn allow_origins<I, S>(self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let origins: Vec<HeaderValue> = origins
            .into_iter()
            .map(|origin| {
                let origin = origin.as_ref();
                HeaderValue::from_str(origin)
                    .unwrap_or_else(|_| panic!("invalid CORS origin {origin:?}"))
            })
            .collect();
        if origins.iter().any(|o| o == "*") {
            self.map_layer(|layer| layer.allow_origin(Any))
        } else {
            self.map_layer(|layer| layer.allow_origin(origins))
        }
    }

    pub fn allow_methods(self, methods: impl IntoIterator<Item = Method>) -> Self {
        let methods: Vec<Method> = methods.into_iter().collect();
        self.map_layer(|layer| layer.allow_methods(methods))
    }

    pub fn allow_headers(self, headers: impl IntoIterator<Item = HeaderName>) -> Self {
        let headers: Vec<HeaderName> = headers.into_iter().collect();
        self.map_layer(|layer| layer.allow_headers(headers))
    }

    pub fn expose_headers(self, headers: impl IntoIterator<Item = HeaderName>) -> Self {
        let headers: Vec<HeaderName> = headers.into_iter().collect();
        self.map_layer(|layer| layer.expose_headers(headers))
    }

    /// Combining credentials with a wildcard origin is refused when the
    /// policy is registered.
    pub fn allow_credentials(self, allow: bool) -> Self {
        self.map_layer(|layer| layer.allow_credentials(allow))
    }

    pub fn max_age(self, max_age: Duration) -> Self {
        self.map_layer(|layer| layer.max_age(max_age))
    }

    /// Let preflight requests continue to the handler after headers are set.
    pub fn passthrough(mut self, passthrough: bool) -> Self {
        self.passthrough = passthrough;
        self
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    /// Reject settings `tower_http` cannot serve.
    ///
    /// # Panics
    /// When credentials are combined with a wildcard origin, method or header.
    pub(crate) fn check(&self) {
        let _ = self.layer.layer(());
    }

    /// CORS headers `tower_http` produces for `request`.
    async fn headers(&self, request: Request<()>) -> HeaderMap {
        let cors = self.layer.layer(tower::service_fn(|_: Request<()>| async {
            Ok::<_, Infallible>(Response::new(Body::empty()))
        }));
        match cors.oneshot(request).await {
            Ok(response) => response.into_parts().0.headers,
            Err(never) => match never {},
        }
    }
}

/// Method, URI and headers of the request, without its body.
fn head(ctx: &Context) -> Request<()> {
    let mut request = Request::new(());
    *request.method_mut() = ctx.method().clone();
    *request.uri_mut() = ctx.uri().clone();
    *request.headers_mut() = ctx.headers().clone();
    request
}

fn is_preflight(ctx: &Context) -> bool {
    *ctx.method() == Method::OPTIONS
        && ctx.headers().contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

fn merge(response: &mut Response, headers: HeaderMap) {
    let target = response.headers_mut();
    let mut last = None;
    for (name, value) in headers {
        if let Some(name) = name {
            last = Some(name);
        }
        if let Some(name) = &last {
            if *name == header::VARY {
                target.append(name.clone(), value);
            } else {
                target.insert(name.clone(), value);
            }
        }
    }
}

/// Middleware applying the CORS policy of the matched route.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cors;

pub fn middleware() -> Cors {
    Cors
}

impl Middleware for Cors {
    fn wrap(&self, next: Handler) -> Handler {
        Handler::new(move |ctx: Context| {
            let next = next.clone();
            async move {
                let Some((policy, handles_options)) = ctx.route().and_then(|route| {
                    let policy = route.cors_policy()?.clone();
                    Some((policy, route.route().handles_options()))
                }) else {
                    return next.run(ctx).await;
                };
                let request = ctx.headers().contains_key(header::ORIGIN).then(|| head(&ctx));

                if is_preflight(&ctx) {
                    tracing::debug!(
                        path = %ctx.uri().path(),
                        origin = request.is_some(),
                        passthrough = policy.is_passthrough(),
                        "CORS preflight"
                    );
                    let headers = match request {
                        Some(request) => policy.headers(request).await,
                        None => HeaderMap::new(),
                    };
                    let mut response = if policy.is_passthrough() {
                        next.run(ctx).await
                    } else {
                        StatusCode::NO_CONTENT.into_response()
                    };
                    merge(&mut response, headers);
                    return response;
                }

                if *ctx.method() == Method::OPTIONS && !handles_options {
                    tracing::debug!(
                        path = %ctx.uri().path(),
                        "OPTIONS without a preflight request method"
                    );
                    return response::status(&ctx, StatusCode::BAD_REQUEST);
                }

                let headers = match request {
                    Some(request) => policy.headers(request).await,
                    None => HeaderMap::new(),
                };
                let mut response = next.run(ctx).await;
                merge(&mut response, headers);
                response
            }
        })
    }
}
