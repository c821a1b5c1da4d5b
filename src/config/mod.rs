//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → Config (validated, immutable)
//!     → owned by the Server, read through Context::config
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the server is created
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Unknown tables are kept and reachable through dotted-key lookups

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{AppConfig, Config, DatabaseConfig, ObservabilityConfig, ProxyConfig, ServerConfig};
pub use validation::{validate_config, ValidationError};
