//! Request pipeline behavior observed over HTTP.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use switchyard::{from_fn, rules, Context, CorsPolicy, Next, Rule, RuleSet, Server};

mod common;

#[derive(Clone)]
struct Tenant(&'static str);

#[derive(Clone)]
struct Peer(SocketAddr);

async fn boom(_ctx: Context) -> &'static str {
    panic!("kaboom")
}

fn app(mut config: switchyard::Config) -> Server {
    config.app.debug = true;
    let mut server = Server::new(config).unwrap();
    server.base_extension(Tenant("acme"));
    server.set_connection_hook(|extensions, peer| {
        extensions.insert(Peer(peer));
    });

    let mut root = server.router();
    root.global_middleware(from_fn(|ctx: Context, next: Next| async move {
        let mut response = next.run(ctx).await;
        response
            .headers_mut()
            .insert("x-powered-by", "switchyard".parse().unwrap());
        response
    }));

    root.route(
        &[axum::http::Method::GET, axum::http::Method::POST],
        "/product/{id:[0-9]+}",
        |ctx: Context| async move { format!("product {}", ctx.param("id").unwrap_or_default()) },
    )
    .name("product");

    root.get("/whoami", |ctx: Context| async move {
        let tenant = ctx.extensions().get::<Tenant>().map(|t| t.0);
        let peer = ctx.extensions().get::<Peer>().map(|p| p.0);
        let connect = ctx
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|c| c.0);
        Json(json!({
            "tenant": tenant,
            "peer_matches": peer.is_some() && peer == connect,
        }))
    });

    root.get("/boom", boom);

    root.get("/sleep", |_ctx: Context| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        "late"
    });

    {
        let mut api = root.subrouter("/api");
        api.cors(CorsPolicy::default().allow_origins(["https://app.example.org"]));
        api.post("/users", |ctx: Context| async move {
            let user = ctx.validated_body().cloned();
            (StatusCode::CREATED, Json(json!({ "user": user })))
        })
        .validate_query(rules(|_ctx| RuleSet::new().field("page", [Rule::Integer])))
        .validate_body(rules(|_ctx| {
            RuleSet::new()
                .field("name", [Rule::Required, Rule::String])
                .field("email", [Rule::Required, Rule::Email])
        }));
    }
    server
}

#[tokio::test]
async fn unmatched_requests_keep_global_middleware() {
    let running = common::start(app(common::test_config())).await;
    let client = common::client();

    let response = client.get(running.url("/product/abc")).send().await.unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.headers()["x-powered-by"], "switchyard");
    assert!(response.headers().contains_key("x-request-id"));

    let response = client.put(running.url("/product/33")).send().await.unwrap();
    assert_eq!(response.status(), 405);
    assert_eq!(response.headers()["allow"], "GET, POST, HEAD");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Method Not Allowed");

    let response = client.get(running.url("/product/33")).send().await.unwrap();
    assert_eq!(response.text().await.unwrap(), "product 33");

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn base_and_connection_extensions_reach_handlers() {
    let running = common::start(app(common::test_config())).await;

    let body: Value = common::client()
        .get(running.url("/whoami"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({ "tenant": "acme", "peer_matches": true }));

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn panics_become_500_and_the_server_keeps_serving() {
    let running = common::start(app(common::test_config())).await;
    let client = common::client();

    let response = client.get(running.url("/boom")).send().await.unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "kaboom");

    let response = client.get(running.url("/product/1")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn cors_preflight_is_answered_without_the_handler() {
    let running = common::start(app(common::test_config())).await;

    let response = common::client()
        .request(reqwest::Method::OPTIONS, running.url("/api/users"))
        .header("origin", "https://app.example.org")
        .header("access-control-request-method", "POST")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://app.example.org"
    );
    assert!(response.text().await.unwrap().is_empty());

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn validation_reports_query_and_body_errors_together() {
    let running = common::start(app(common::test_config())).await;
    let client = common::client();

    let response = client
        .post(running.url("/api/users?page=first"))
        .json(&json!({ "name": "Ada" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"]["query"]["page"].is_array());
    assert!(body["error"]["body"]["email"].is_array());
    assert!(body["error"]["body"].get("name").is_none());

    let response = client
        .post(running.url("/api/users"))
        .form(&[("name", "Ada"), ("email", "ada@example.org")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["user"]["email"], "ada@example.org");

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let mut config = common::test_config();
    config.server.max_upload_size = 0.001;
    let running = common::start(app(config)).await;

    let response = common::client()
        .post(running.url("/api/users"))
        .header("content-type", "application/json")
        .body(format!("{{\"name\":\"{}\"}}", "x".repeat(4096)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 413);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn slow_handlers_time_out() {
    let mut config = common::test_config();
    config.server.request_timeout_secs = 1;
    let running = common::start(app(config)).await;

    let response = common::client()
        .get(running.url("/sleep"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 408);

    running.shutdown().await.unwrap();
}
