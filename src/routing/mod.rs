//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (before start):
//!     RouterMut::subrouter / get / post ...
//!     → pattern.rs (compile template, shared cache)
//!     → router.rs (arena insert, name index)
//!
//! Incoming request (method, path)
//!     → matcher.rs (depth-first prefix consumption)
//!     → Return: matched Route + params, or NotFound / MethodNotAllowed
//! ```
//!
//! # Design Decisions
//! - Tree compiled at registration, immutable at runtime
//! - Deterministic: same input always matches same route
//! - First match wins (registration order, depth-first)

pub mod matcher;
pub mod pattern;
pub mod route;
pub mod router;

pub use matcher::{MatchError, Params, RouteMatch};
pub use pattern::{Pattern, PatternCache, PatternError};
pub use route::{Metadata, Route, RouteId, RouteMut, RouteRef};
pub use router::{RouteTree, Router, RouterId, RouterMut, RoutingError};
