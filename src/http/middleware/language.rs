//! Request language selection from `Accept-Language`.

use std::sync::Arc;

use axum::http::header;

use crate::http::context::Context;
use crate::http::handler::{Handler, Middleware};
use crate::lang::{Catalog, Language};

/// Language ranges of an `Accept-Language` value, highest weight first.
///
/// Entries with equal weight keep their order in the header. Ranges with a
/// weight of zero or an unparsable weight are dropped.
pub fn parse_accept_language(value: &str) -> Vec<(String, f32)> {
    let mut ranges: Vec<(String, f32)> = value
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let tag = pieces.next()?.trim();
            if tag.is_empty() {
                return None;
            }
            let mut weight = 1.0_f32;
            for param in pieces {
                if let Some(q) = param.trim().strip_prefix("q=") {
                    weight = q.trim().parse().ok()?;
                }
            }
            (weight > 0.0).then(|| (tag.to_string(), weight))
        })
        .collect();
    // Stable sort keeps declaration order for ties.
    ranges.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranges
}

/// Best available language for an `Accept-Language` value.
pub fn negotiate(catalog: &Catalog, accept: Option<&str>) -> Arc<Language> {
    let Some(accept) = accept else {
        return catalog.default_language();
    };
    for (tag, _) in parse_accept_language(accept) {
        if tag == "*" {
            return catalog.default_language();
        }
        if let Some(language) = catalog.get(&tag) {
            return language;
        }
    }
    catalog.default_language()
}

/// Middleware storing the negotiated language in the context.
#[derive(Debug, Clone, Copy, Default)]
pub struct LanguageMiddleware;

pub fn middleware() -> LanguageMiddleware {
    LanguageMiddleware
}

impl Middleware for LanguageMiddleware {
    fn wrap(&self, next: Handler) -> Handler {
        Handler::new(move |mut ctx: Context| {
            let next = next.clone();
            async move {
                let accept = ctx
                    .headers()
                    .get(header::ACCEPT_LANGUAGE)
                    .and_then(|v| v.to_str().ok());
                let language = negotiate(ctx.server().catalog(), accept);
                ctx.set_language(language);
                next.run(ctx).await
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.add(Language::new("fr-FR"));
        catalog.add(Language::new("de-DE"));
        catalog
    }

    #[test]
    fn parses_weights_and_sorts() {
        let ranges = parse_accept_language("fr-CH, fr;q=0.9, en;q=0.8, de;q=0.9, *;q=0.5");
        let tags: Vec<_> = ranges.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(tags, ["fr-CH", "fr", "de", "en", "*"]);
    }

    #[test]
    fn drops_zero_and_invalid_weights() {
        let ranges = parse_accept_language("fr;q=0, de;q=abc, en");
        assert_eq!(ranges, [("en".to_string(), 1.0)]);
    }

    #[test]
    fn picks_highest_available() {
        let catalog = catalog();
        let picked = negotiate(&catalog, Some("es-ES, de-DE;q=0.7, fr-FR;q=0.8"));
        assert_eq!(picked.tag(), "fr-FR");
    }

    #[test]
    fn ties_follow_header_order() {
        let catalog = catalog();
        let picked = negotiate(&catalog, Some("de-DE;q=0.5, fr-FR;q=0.5"));
        assert_eq!(picked.tag(), "de-DE");
    }

    #[test]
    fn falls_back_to_default() {
        let catalog = catalog();
        assert_eq!(negotiate(&catalog, None).tag(), "en-US");
        assert_eq!(negotiate(&catalog, Some("ja-JP")).tag(), "en-US");
        assert_eq!(negotiate(&catalog, Some("")).tag(), "en-US");
    }
}
