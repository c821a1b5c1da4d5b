//! Route validation middleware.
//!
//! Installed by `RouteMut::validate_query` / `RouteMut::validate_body`. Both
//! rule sets always run; their failures are reported together as
//! `422 {"error": {"query": {...}, "body": {...}}}`. A validator internal
//! error answers 500 instead. On success the checked values are kept on the
//! context (`Context::validated_query` / `Context::validated_body`).

use axum::http::StatusCode;
use axum::Json;
use axum::response::IntoResponse;
use serde_json::{json, Map, Value};

use crate::http::context::Context;
use crate::http::handler::{Handler, Middleware};
use crate::http::response;
use crate::validation::{Errors, RuleGenerator, RuleSet, ValidatorError, BODY_RULES_KEY, QUERY_RULES_KEY};

#[derive(Debug, Clone, Copy, Default)]
pub struct Validate;

pub fn middleware() -> Validate {
    Validate
}

/// Validate one side of the request. Returns the checked value, `None` when
/// the route has no rules for it.
fn run(
    ctx: &Context,
    rules: Option<RuleSet>,
    body: bool,
) -> Result<(Option<Value>, Errors), ValidatorError> {
    let Some(rules) = rules else {
        return Ok((None, Errors::new()));
    };
    let data = if body {
        ctx.data().map(|d| d.to_json(|f| rules.requires_array(f)))
    } else {
        ctx.query().map(|q| q.to_json(|f| rules.requires_array(f)))
    };
    let data = data.unwrap_or_else(|| Value::Object(Map::new()));
    let errors = rules.validate(&data, &ctx.language())?;
    Ok((Some(data), errors))
}

impl Middleware for Validate {
    fn wrap(&self, next: Handler) -> Handler {
        Handler::new(move |mut ctx: Context| {
            let next = next.clone();
            async move {
                let Some(route) = ctx.route() else {
                    return next.run(ctx).await;
                };
                let query_generator = route.meta().get::<RuleGenerator>(QUERY_RULES_KEY).cloned();
                let body_generator = route.meta().get::<RuleGenerator>(BODY_RULES_KEY).cloned();

                let query_rules = query_generator.map(|generate| generate(&ctx));
                let body_rules = body_generator.map(|generate| generate(&ctx));

                let query = run(&ctx, query_rules, false);
                let body = run(&ctx, body_rules, true);

                let ((query_value, query), (body_value, body)) = match (query, body) {
                    (Ok(query), Ok(body)) => (query, body),
                    (Err(e), _) | (_, Err(e)) => {
                        tracing::error!(
                            error = %e,
                            path = %ctx.uri().path(),
                            "Validator internal error"
                        );
                        return response::status(&ctx, StatusCode::INTERNAL_SERVER_ERROR);
                    }
                };

                if query.is_empty() && body.is_empty() {
                    ctx.set_validated(query_value, body_value);
                    return next.run(ctx).await;
                }

                let mut errors = Map::new();
                if !query.is_empty() {
                    errors.insert("query".into(), json!(query));
                }
                if !body.is_empty() {
                    errors.insert("body".into(), json!(body));
                }
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({ "error": errors })),
                )
                    .into_response()
            }
        })
    }
}
