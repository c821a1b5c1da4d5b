//! Optional database handle.
//!
//! Query building is left to the application; the server only keeps the
//! handle alive, exposes it to handlers and closes it once shutdown hooks
//! have run.

use futures_util::future::BoxFuture;

/// A database connection pool or client owned by the server.
pub trait Database: Send + Sync + 'static {
    /// Driver name, for logs.
    fn driver(&self) -> &str;

    /// Release every connection. Called once, after shutdown hooks.
    fn close(&self) -> BoxFuture<'_, ()>;
}
