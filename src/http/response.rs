//! Response helpers shared by the fallback pipelines and core middleware.
//!
//! # Design Decisions
//! - Error bodies are JSON objects `{"error": <message>}`
//! - Messages come from the request language (`status.<code>` lines), falling
//!   back to the canonical reason phrase

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::http::context::Context;
use crate::http::handler::Handler;
use crate::lang::Language;

/// Localized message for `status`.
pub fn status_message(language: &Language, status: StatusCode) -> String {
    language
        .get(&format!("status.{}", status.as_u16()))
        .map(str::to_string)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown Status").to_string())
}

/// `{"error": <localized message>}` with the given status.
pub fn status(ctx: &Context, status: StatusCode) -> Response {
    error(status, status_message(&ctx.language(), status))
}

/// `{"error": <message>}` with the given status.
pub fn error(status: StatusCode, message: impl Into<serde_json::Value>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Terminal handler of the fallback pipelines.
pub fn status_handler(code: StatusCode) -> Handler {
    Handler::new(move |ctx: Context| async move {
        let mut response = status(&ctx, code);
        if code == StatusCode::METHOD_NOT_ALLOWED && !ctx.allowed_methods().is_empty() {
            let allow = ctx
                .allowed_methods()
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&allow) {
                response.headers_mut().insert(header::ALLOW, value);
            }
        }
        response
    })
}
