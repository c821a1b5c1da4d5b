//! Built-in middleware.
//!
//! # Core chain
//! ```text
//! recovery   (outermost: panics → 500, logged with stack)
//!   → request id
//!   → language (Accept-Language)
//!   → parse    (query, body size limit, JSON / form / multipart)
//!   → [user global middleware, router middleware, cors, validate, ...]
//!   → handler
//! ```
//!
//! The first four are installed as global middleware of the root router by
//! `Server::new`, so they also wrap not-found and method-not-allowed
//! responses.

pub mod cors;
pub mod language;
pub mod parse;
pub mod recovery;
pub mod validate;

pub use cors::CorsPolicy;
pub use parse::{Data, FormValues, UploadedFile};
pub use recovery::Fault;
