//! Handlers and middleware.
//!
//! A [`Handler`] turns a [`Context`] into a response. A [`Middleware`] wraps
//! the next handler of the chain and returns a new one, so it can run code
//! before and after the rest of the chain or answer on its own.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;

use crate::http::context::Context;

type BoxedHandler = dyn Fn(Context) -> BoxFuture<'static, Response> + Send + Sync;

/// A type-erased, cheaply clonable request handler.
#[derive(Clone)]
pub struct Handler(Arc<BoxedHandler>);

/// The rest of the chain, as seen by a middleware.
pub type Next = Handler;

impl Handler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoResponse,
    {
        Self(Arc::new(move |ctx| {
            let fut = f(ctx);
            Box::pin(async move { fut.await.into_response() })
        }))
    }

    /// Run the handler.
    pub fn call(&self, ctx: Context) -> BoxFuture<'static, Response> {
        (self.0)(ctx)
    }

    /// Alias of [`Handler::call`] reading naturally inside middleware.
    pub async fn run(&self, ctx: Context) -> Response {
        self.call(ctx).await
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler")
    }
}

/// Wraps a handler into another handler.
pub trait Middleware: Send + Sync + 'static {
    fn wrap(&self, next: Handler) -> Handler;
}

/// Middleware built from an async function taking the context and the rest
/// of the chain. See [`from_fn`].
pub struct FromFn<F> {
    f: Arc<F>,
}

/// Build a middleware from `async fn(Context, Next) -> impl IntoResponse`.
///
/// ```ignore
/// router.middleware(from_fn(|ctx: Context, next: Next| async move {
///     let mut response = next.run(ctx).await;
///     response.headers_mut().insert("x-powered-by", HeaderValue::from_static("switchyard"));
///     response
/// }));
/// ```
pub fn from_fn<F, Fut>(f: F) -> FromFn<F>
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoResponse,
{
    FromFn { f: Arc::new(f) }
}

impl<F, Fut> Middleware for FromFn<F>
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoResponse,
{
    fn wrap(&self, next: Handler) -> Handler {
        let f = Arc::clone(&self.f);
        Handler::new(move |ctx| f(ctx, next.clone()))
    }
}
