//! URI template compilation.
//!
//! # Responsibilities
//! - Turn `{name}` / `{name:regex}` templates into anchored matchers
//! - Reject malformed placeholders and stray capturing groups at registration
//! - Share one compiled matcher per distinct pattern source
//! - Rebuild concrete URIs from templates (reverse routing)
//!
//! # Design Decisions
//! - Placeholders are scanned with a depth counter, so quantifiers such as
//!   `{id:[0-9]{4}}` stay inside their placeholder
//! - Literal text is copied verbatim into the matcher source
//! - The cache is keyed by the assembled source, not the template, and is
//!   owned by the route tree rather than the process

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use regex::Regex;

/// Sub-pattern used when a placeholder declares none.
pub const DEFAULT_PARAM_PATTERN: &str = "[^/]+";

/// Errors produced while compiling a URI template.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("unbalanced braces in route template \"{template}\"")]
    UnbalancedBraces { template: String },

    #[error("empty placeholder in route template \"{template}\"")]
    EmptyPlaceholder { template: String },

    #[error("empty parameter name in route template \"{template}\"")]
    EmptyParameterName { template: String },

    #[error("parameter \"{name}\" declares an empty pattern in route template \"{template}\"")]
    EmptySubPattern { name: String, template: String },

    #[error("invalid pattern \"{source_text}\": {message}")]
    InvalidRegex { source_text: String, message: String },

    #[error(
        "route template \"{template}\" declares {declared} parameters but its pattern has {captures} capturing groups (use (?:...) for sub-patterns)"
    )]
    CaptureMismatch {
        template: String,
        declared: usize,
        captures: usize,
    },
}

/// A `{...}` placeholder found in a template: byte offsets of the braces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placeholder {
    pub start: usize,
    pub end: usize,
}

/// Scan first-level `{...}` placeholders.
pub(crate) fn scan_placeholders(template: &str) -> Result<Vec<Placeholder>, PatternError> {
    let mut found = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (i, c) in template.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' => {
                if depth == 0 {
                    return Err(PatternError::UnbalancedBraces {
                        template: template.to_string(),
                    });
                }
                depth -= 1;
                if depth == 0 {
                    if i == start + 1 {
                        return Err(PatternError::EmptyPlaceholder {
                            template: template.to_string(),
                        });
                    }
                    found.push(Placeholder { start, end: i });
                }
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(PatternError::UnbalancedBraces {
            template: template.to_string(),
        });
    }
    Ok(found)
}

/// Assemble the matcher source and parameter list for a template.
fn assemble(template: &str, terminal: bool) -> Result<(String, Vec<String>), PatternError> {
    let placeholders = scan_placeholders(template)?;
    let mut source = String::with_capacity(template.len() + 16);
    let mut params = Vec::with_capacity(placeholders.len());
    let mut cursor = 0;

    source.push('^');
    for p in &placeholders {
        source.push_str(&template[cursor..p.start]);

        let inner = &template[p.start + 1..p.end];
        let (name, sub) = match inner.split_once(':') {
            Some((name, sub)) => (name, Some(sub)),
            None => (inner, None),
        };
        if name.is_empty() {
            return Err(PatternError::EmptyParameterName {
                template: template.to_string(),
            });
        }
        let sub = match sub {
            Some("") => {
                return Err(PatternError::EmptySubPattern {
                    name: name.to_string(),
                    template: template.to_string(),
                })
            }
            Some(sub) => sub,
            None => DEFAULT_PARAM_PATTERN,
        };

        source.push('(');
        source.push_str(sub);
        source.push(')');
        params.push(name.to_string());
        cursor = p.end + 1;
    }
    source.push_str(&template[cursor..]);
    if terminal {
        source.push('$');
    }

    Ok((source, params))
}

/// Shared store of compiled matchers keyed by their final source.
#[derive(Debug, Default)]
pub struct PatternCache {
    compiled: Mutex<HashMap<String, Arc<Regex>>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct matchers compiled so far.
    pub fn len(&self) -> usize {
        self.compiled.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_or_compile(&self, source: &str) -> Result<Arc<Regex>, PatternError> {
        let mut compiled = self.compiled.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(regex) = compiled.get(source) {
            return Ok(Arc::clone(regex));
        }
        let regex = Regex::new(source).map_err(|e| PatternError::InvalidRegex {
            source_text: source.to_string(),
            message: e.to_string(),
        })?;
        let regex = Arc::new(regex);
        compiled.insert(source.to_string(), Arc::clone(&regex));
        Ok(regex)
    }
}

/// A compiled URI template.
#[derive(Debug, Clone)]
pub struct Pattern {
    template: String,
    regex: Arc<Regex>,
    params: Vec<String>,
}

impl Pattern {
    /// Compile `template`. A terminal pattern must consume the whole input,
    /// a non-terminal one only a prefix of it.
    pub fn compile(template: &str, terminal: bool, cache: &PatternCache) -> Result<Self, PatternError> {
        let (source, params) = assemble(template, terminal)?;
        let regex = cache.get_or_compile(&source)?;

        let captures = regex.captures_len() - 1;
        if captures != params.len() {
            return Err(PatternError::CaptureMismatch {
                template: template.to_string(),
                declared: params.len(),
                captures,
            });
        }

        Ok(Self {
            template: template.to_string(),
            regex,
            params,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// The shared compiled matcher.
    pub fn regex(&self) -> &Arc<Regex> {
        &self.regex
    }

    /// Match the start of `input`. Returns the consumed length and the
    /// extracted parameters in declaration order.
    pub fn match_prefix<'i>(&self, input: &'i str) -> Option<(usize, Vec<(String, &'i str)>)> {
        let caps = self.regex.captures(input)?;
        let consumed = caps.get(0).map_or(0, |m| m.end());
        let values = caps
            .iter()
            .skip(1)
            .zip(&self.params)
            .map(|(value, name)| (name.clone(), value.map_or("", |m| m.as_str())))
            .collect();
        Some((consumed, values))
    }

    /// Zip the captured groups of a successful match with the parameter names.
    pub fn extract<'i>(&self, input: &'i str) -> Option<HashMap<String, &'i str>> {
        self.match_prefix(input)
            .map(|(_, values)| values.into_iter().collect())
    }
}

/// Substitute every placeholder of `template`, in appearance order, with the
/// matching entry of `values`. The caller guarantees the counts agree.
pub(crate) fn substitute(template: &str, values: &[&str]) -> Result<String, PatternError> {
    let placeholders = scan_placeholders(template)?;
    let mut out = String::with_capacity(template.len());
    let mut cursor = 0;
    for (p, value) in placeholders.iter().zip(values) {
        out.push_str(&template[cursor..p.start]);
        out.push_str(value);
        cursor = p.end + 1;
    }
    out.push_str(&template[cursor..]);
    Ok(out)
}

/// Count the placeholders declared in `template`.
pub(crate) fn count_params(template: &str) -> Result<usize, PatternError> {
    scan_placeholders(template).map(|p| p.len())
}
