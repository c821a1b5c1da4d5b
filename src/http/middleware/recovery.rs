//! Panic recovery.
//!
//! # Responsibilities
//! - Catch panics raised anywhere inside the wrapped chain, including in other
//!   middleware and in the synchronous part of a handler call
//! - Log each fault once, with the stack captured at the panic site
//! - Replace whatever the chain was producing with a 500 response
//!
//! # Design Decisions
//! - Must be the outermost middleware (first global middleware of the root)
//! - The stack is captured by a process-wide panic hook into a thread-local
//!   slot, only while a recovery boundary is being polled on that thread;
//!   other panics still reach the previously installed hook
//! - The panic message is exposed in the body only when `app.debug` is set;
//!   otherwise the body uses the language negotiated from `Accept-Language`,
//!   since the language middleware may not have run yet

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context as TaskContext, Poll};

use axum::http::{header, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::http::context::Context;
use crate::http::handler::{Handler, Middleware};
use crate::http::middleware::language;
use crate::http::response;

thread_local! {
    static BOUNDARY_DEPTH: Cell<usize> = const { Cell::new(0) };
    static LAST_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if BOUNDARY_DEPTH.with(Cell::get) > 0 {
                let stack = Backtrace::force_capture().to_string();
                LAST_STACK.with(|slot| *slot.borrow_mut() = Some(stack));
            } else {
                previous(info);
            }
        }));
    });
}

/// A caught panic.
#[derive(Debug, Clone)]
pub struct Fault {
    pub message: String,
    pub stack: String,
}

impl Fault {
    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        let stack = LAST_STACK
            .with(|slot| slot.borrow_mut().take())
            .unwrap_or_else(|| Backtrace::force_capture().to_string());
        Self { message, stack }
    }
}

struct BoundaryGuard;

impl BoundaryGuard {
    fn enter() -> Self {
        BOUNDARY_DEPTH.with(|d| d.set(d.get() + 1));
        BoundaryGuard
    }
}

impl Drop for BoundaryGuard {
    fn drop(&mut self) {
        BOUNDARY_DEPTH.with(|d| d.set(d.get() - 1));
    }
}

/// Future resolving to the inner output, or to the [`Fault`] it panicked with.
pub struct CatchPanic {
    inner: BoxFuture<'static, Response>,
}

impl CatchPanic {
    pub fn new(inner: impl Future<Output = Response> + Send + 'static) -> Self {
        install_panic_hook();
        Self { inner: Box::pin(inner) }
    }
}

impl Future for CatchPanic {
    type Output = Result<Response, Fault>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let inner = &mut self.inner;
        let polled = {
            let _guard = BoundaryGuard::enter();
            panic::catch_unwind(AssertUnwindSafe(|| inner.as_mut().poll(cx)))
        };
        match polled {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(response)) => Poll::Ready(Ok(response)),
            Err(payload) => Poll::Ready(Err(Fault::from_panic(payload))),
        }
    }
}

/// Outermost middleware converting panics into 500 responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct Recovery;

pub fn middleware() -> Recovery {
    install_panic_hook();
    Recovery
}

impl Middleware for Recovery {
    fn wrap(&self, next: Handler) -> Handler {
        Handler::new(move |ctx: Context| {
            let next = next.clone();
            let server = ctx.server().clone();
            let method = ctx.method().clone();
            let path = ctx.uri().path().to_string();
            let route = ctx.route().and_then(|r| r.name()).map(str::to_string);
            let accept = ctx
                .headers()
                .get(header::ACCEPT_LANGUAGE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            async move {
                match CatchPanic::new(async move { next.run(ctx).await }).await {
                    Ok(response) => response,
                    Err(fault) => {
                        tracing::error!(
                            method = %method,
                            path = %path,
                            route = route.as_deref().unwrap_or("-"),
                            error = %fault.message,
                            stack = %fault.stack,
                            "Request handler panicked"
                        );
                        let language = language::negotiate(server.catalog(), accept.as_deref());
                        if server.config().app.debug {
                            response::error(StatusCode::INTERNAL_SERVER_ERROR, fault.message)
                        } else {
                            response::error(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                response::status_message(&language, StatusCode::INTERNAL_SERVER_ERROR),
                            )
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;
    use std::sync::{Arc, Mutex};

    use axum::body::Body;
    use axum::http::{HeaderValue, Request};
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
    use tracing_subscriber::Layer;

    use super::*;
    use crate::config::Config;
    use crate::http::handler::{from_fn, Next};
    use crate::http::server::Server;

    #[derive(Clone, Default)]
    struct ErrorLog {
        stacks: Arc<Mutex<Vec<String>>>,
    }

    struct StackField(String);

    impl Visit for StackField {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "stack" {
                self.0 = format!("{value:?}");
            }
        }
    }

    impl<S: Subscriber> Layer<S> for ErrorLog {
        fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
            if *event.metadata().level() == Level::ERROR {
                let mut field = StackField(String::new());
                event.record(&mut field);
                self.stacks.lock().unwrap().push(field.0);
            }
        }
    }

    fn panicking_server(debug: bool) -> Arc<Server> {
        let mut config = Config::default();
        config.app.debug = debug;
        let mut server = Server::new(config).unwrap();
        {
            let mut root = server.router();
            root.get("/boom", |_ctx: Context| async move {
                let mut response = Response::new(Body::from("partial"));
                *response.status_mut() = StatusCode::CREATED;
                if response.status() == StatusCode::CREATED {
                    panic!("handler exploded");
                }
                response
            });
            root.get("/middleware-boom", |_ctx: Context| async { "unreachable" })
                .middleware(from_fn(|_ctx: Context, _next: Next| async move {
                    if true {
                        panic!("middleware exploded");
                    }
                    "never"
                }));
        }
        Arc::new(server)
    }

    #[tokio::test]
    async fn handler_panic_logged_once_and_turned_into_500() {
        let log = ErrorLog::default();
        let subscriber = tracing_subscriber::registry().with(log.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let server = panicking_server(false);
        let response = server
            .handle(Request::get("/boom").body(Body::empty()).unwrap())
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let stacks = log.stacks.lock().unwrap().clone();
        assert_eq!(stacks.len(), 1);
        assert!(!stacks[0].is_empty());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Internal Server Error");
    }

    #[tokio::test]
    async fn middleware_panic_is_caught_and_debug_exposes_message() {
        let server = panicking_server(true);
        let response = server
            .handle(Request::get("/middleware-boom").body(Body::empty()).unwrap())
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "middleware exploded");
    }

    #[tokio::test]
    async fn panic_message_follows_accept_language() {
        let dir = std::env::temp_dir().join(format!("switchyard-recovery-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("fr-FR")).unwrap();
        std::fs::write(dir.join("fr-FR/status.json"), r#"{"500": "Erreur interne"}"#).unwrap();

        let mut config = Config::default();
        config.app.language_dir = Some(dir.to_string_lossy().into_owned());
        let mut server = Server::new(config).unwrap();
        server.router().get("/boom", |_ctx: Context| async move {
            let response = Response::new(Body::empty());
            if response.status() == StatusCode::OK {
                panic!("handler exploded");
            }
            response
        });
        let server = Arc::new(server);

        let request = Request::get("/boom")
            .header("accept-language", "fr-FR, en;q=0.5")
            .body(Body::empty())
            .unwrap();
        let response = server.handle(request).await;
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Erreur interne");
    }

    #[tokio::test]
    async fn catch_panic_passes_responses_through() {
        let mut ok = Response::new(Body::empty());
        ok.headers_mut().insert("x-test", HeaderValue::from_static("1"));
        let response = CatchPanic::new(async move { ok }).await.unwrap();
        assert_eq!(response.headers()["x-test"], "1");
    }
}
