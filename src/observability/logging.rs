//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Pick the level from `RUST_LOG`, else from configuration
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Initialization is idempotent so tests and embedders may call it freely

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::ObservabilityConfig;

/// Filter from `RUST_LOG`, or `<level>,tower_http=<level>` from config.
pub fn filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.log_level;
        EnvFilter::try_new(format!("{level},tower_http={level}"))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init(config: &ObservabilityConfig) -> bool {
    let registry = tracing_subscriber::registry().with(filter(config));
    let result = if config.log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.is_ok()
}
