//! switchyard server binary.
//!
//! Loads the configuration, initializes logging and metrics, registers a
//! small demo API and serves until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use clap::Parser;
use serde_json::json;

use switchyard::config::{load_config, Config};
use switchyard::observability::{logging, metrics};
use switchyard::{rules, Context, CorsPolicy, Rule, RuleSet, Server};

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "HTTP server with a router tree and middleware pipelines", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.port`
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "switchyard starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut server = Server::new(config)?;
    register_routes(&mut server);
    server.on_startup(|server| async move {
        tracing::info!(url = %server.proxy_base_url(), ready = server.is_ready(), "Accepting requests");
    });

    let server = Arc::new(server);
    server.register_signal_hook();
    server.start().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn register_routes(server: &mut Server) {
    let mut root = server.router();
    root.get("/health", |_ctx: Context| async { Json(json!({ "status": "ok" })) })
        .name("health");

    let mut api = root.subrouter("/api");
    api.cors(CorsPolicy::default());

    api.get("/users/{id:[0-9]+}", |ctx: Context| async move {
        let id = ctx.param("id").unwrap_or_default().to_string();
        let url = ctx.server().url("users.show", &[&id]).ok();
        Json(json!({ "id": id, "url": url }))
    })
    .name("users.show");

    api.post("/users", |ctx: Context| async move {
        let user = ctx.validated_body().cloned();
        (axum::http::StatusCode::CREATED, Json(json!({ "user": user })))
    })
    .name("users.store")
    .validate_body(rules(|_ctx| {
        RuleSet::new()
            .field("name", [Rule::Required, Rule::String, Rule::Max(64.0)])
            .field("email", [Rule::Required, Rule::Email])
    }));
}
