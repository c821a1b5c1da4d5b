//! HTTP subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper auto connection, trace, timeout, body limit)
//!     → routing (RouteTree::match_request)
//!     → pipeline.rs (precomposed chain for the route or fallback)
//!     → middleware/ (recovery, request id, language, parse, ...)
//!     → handler
//!     → response.rs (status and error bodies)
//! ```

pub mod context;
pub mod handler;
pub mod middleware;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;

pub use context::Context;
pub use handler::{from_fn, Handler, Middleware, Next};
pub use request::{RequestId, X_REQUEST_ID};
pub use server::{Server, ServerError, SHUTDOWN_TIMEOUT};
