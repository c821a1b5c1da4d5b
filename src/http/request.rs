//! Request identification.
//!
//! # Responsibilities
//! - Assign every request an id (UUID v4) unless the client sent one
//! - Expose it to handlers through the request extensions
//! - Echo it on the response for correlation
//!
//! # Design Decisions
//! - Request id added as early as possible for tracing (right after recovery)
//! - An inbound `x-request-id` is kept only when it is a valid header value

use std::fmt;

use axum::http::{HeaderName, HeaderValue};
use uuid::Uuid;

use crate::http::context::Context;
use crate::http::handler::{Handler, Middleware};

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Identifier of the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Middleware assigning [`RequestId`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdMiddleware;

pub fn middleware() -> RequestIdMiddleware {
    RequestIdMiddleware
}

impl Middleware for RequestIdMiddleware {
    fn wrap(&self, next: Handler) -> Handler {
        Handler::new(move |mut ctx: Context| {
            let next = next.clone();
            async move {
                let id = ctx
                    .headers()
                    .get(&X_REQUEST_ID)
                    .and_then(|v| v.to_str().ok())
                    .filter(|v| !v.is_empty())
                    .map(|v| RequestId(v.to_string()))
                    .unwrap_or_else(RequestId::generate);
                ctx.extensions_mut().insert(id.clone());

                let mut response = next.run(ctx).await;
                if let Ok(value) = HeaderValue::from_str(id.as_str()) {
                    response.headers_mut().insert(X_REQUEST_ID.clone(), value);
                }
                response
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;

    use super::*;
    use crate::config::Config;
    use crate::http::server::Server;

    fn server() -> Arc<Server> {
        let mut server = Server::new(Config::default()).unwrap();
        server.router().get("/id", |ctx: Context| async move {
            ctx.request_id().map(|id| id.to_string()).unwrap_or_default()
        });
        Arc::new(server)
    }

    #[tokio::test]
    async fn generates_and_echoes_an_id() {
        let response = server()
            .handle(Request::get("/id").body(Body::empty()).unwrap())
            .await;
        let header = response.headers()[&X_REQUEST_ID].to_str().unwrap().to_string();
        assert!(Uuid::parse_str(&header).is_ok());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, header.as_bytes());
    }

    #[tokio::test]
    async fn keeps_inbound_id() {
        let request = Request::get("/id")
            .header("x-request-id", "abc-123")
            .body(Body::empty())
            .unwrap();
        let response = server().handle(request).await;
        assert_eq!(response.headers()[&X_REQUEST_ID], "abc-123");
    }
}
