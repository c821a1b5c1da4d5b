//! switchyard: an HTTP server framework built on Tokio and hyper.
//!
//! Routes live in a tree of routers. Each request is matched against the
//! tree and run through a middleware pipeline composed once per route.

pub mod config;
pub mod database;
pub mod http;
pub mod lang;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod service;
pub mod validation;

pub use config::Config;
pub use http::middleware::CorsPolicy;
pub use http::{from_fn, Context, Handler, Middleware, Next, Server, ServerError};
pub use lifecycle::State;
pub use routing::{RouteMut, RouterMut, RoutingError};
pub use validation::{rules, Rule, RuleSet};
