//! Request validation rules.
//!
//! # Responsibilities
//! - Describe per-field rules ([`RuleSet`]) built per request by a
//!   [`RuleGenerator`] stored in route metadata
//! - Run them against a JSON view of the query or body
//! - Render failures as localized messages, field by field
//!
//! # Design Decisions
//! - Only a small rule catalog is built in; anything else plugs in through
//!   the [`Validator`] trait
//! - A failing rule is a user error. A validator returning `Err` is a bug in
//!   that validator and surfaces as [`ValidatorError`]
//! - Absent optional fields skip every rule but `required`

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::http::context::Context;
use crate::lang::Language;

/// Route metadata key of the query-string [`RuleGenerator`].
pub const QUERY_RULES_KEY: &str = "validation.query";
/// Route metadata key of the body [`RuleGenerator`].
pub const BODY_RULES_KEY: &str = "validation.body";

/// Builds the rules of a request. Runs once per request so rules may depend
/// on the request itself (route parameters, language, ...).
pub type RuleGenerator = Arc<dyn Fn(&Context) -> RuleSet + Send + Sync>;

/// Wrap a closure into a [`RuleGenerator`].
pub fn rules<F>(f: F) -> RuleGenerator
where
    F: Fn(&Context) -> RuleSet + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Internal failure of a validator.
#[derive(Debug, Error)]
#[error("validator `{rule}` failed on field `{field}`: {message}")]
pub struct ValidatorError {
    pub rule: String,
    pub field: String,
    pub message: String,
}

/// User-supplied validation rule.
pub trait Validator: Send + Sync + 'static {
    /// Rule name, also used for the message key `validation.rules.<name>`.
    fn name(&self) -> &str;

    /// Whether `value` passes. `data` is the whole object being validated.
    fn validate(&self, field: &str, value: &Value, data: &Value) -> Result<bool, ValidatorError>;

    /// Whether the field must be an array. Single form values are then
    /// wrapped into a one-element array before validation.
    fn requires_array(&self) -> bool {
        false
    }
}

/// A single rule.
#[derive(Clone)]
pub enum Rule {
    Required,
    String,
    Integer,
    Numeric,
    Boolean,
    Array,
    Object,
    /// Minimum value, string length or array size.
    Min(f64),
    /// Maximum value, string length or array size.
    Max(f64),
    Between(f64, f64),
    In(Vec<String>),
    Email,
    Regex(Arc<Regex>),
    Custom(Arc<dyn Validator>),
}

impl Rule {
    /// # Panics
    /// When `pattern` is not a valid regular expression.
    pub fn regex(pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) => Rule::Regex(Arc::new(re)),
            Err(e) => panic!("invalid validation regex {pattern:?}: {e}"),
        }
    }

    pub fn custom(validator: impl Validator) -> Self {
        Rule::Custom(Arc::new(validator))
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Rule::In(values.into_iter().map(Into::into).collect())
    }

    fn name(&self) -> &str {
        match self {
            Rule::Required => "required",
            Rule::String => "string",
            Rule::Integer => "integer",
            Rule::Numeric => "numeric",
            Rule::Boolean => "boolean",
            Rule::Array => "array",
            Rule::Object => "object",
            Rule::Min(_) => "min",
            Rule::Max(_) => "max",
            Rule::Between(..) => "between",
            Rule::In(_) => "in",
            Rule::Email => "email",
            Rule::Regex(_) => "regex",
            Rule::Custom(v) => v.name(),
        }
    }

    fn requires_array(&self) -> bool {
        match self {
            Rule::Array => true,
            Rule::Custom(v) => v.requires_array(),
            _ => false,
        }
    }

    fn check(&self, field: &str, value: &Value, data: &Value) -> Result<bool, ValidatorError> {
        Ok(match self {
            Rule::Required => !matches!(value, Value::Null) && value.as_str() != Some(""),
            Rule::String => value.is_string(),
            Rule::Integer => match value {
                Value::Number(n) => n.is_i64() || n.is_u64(),
                Value::String(s) => s.trim().parse::<i64>().is_ok(),
                _ => false,
            },
            Rule::Numeric => number(value).is_some(),
            Rule::Boolean => match value {
                Value::Bool(_) => true,
                Value::String(s) => matches!(s.as_str(), "true" | "false" | "1" | "0" | "on" | "off"),
                Value::Number(n) => matches!(n.as_u64(), Some(0 | 1)),
                _ => false,
            },
            Rule::Array => value.is_array(),
            Rule::Object => value.is_object(),
            Rule::Min(min) => size(value).is_some_and(|s| s >= *min),
            Rule::Max(max) => size(value).is_some_and(|s| s <= *max),
            Rule::Between(min, max) => size(value).is_some_and(|s| s >= *min && s <= *max),
            Rule::In(values) => match value {
                Value::String(s) => values.iter().any(|v| v == s),
                Value::Number(n) => values.iter().any(|v| *v == n.to_string()),
                _ => false,
            },
            Rule::Email => value.as_str().is_some_and(is_email),
            Rule::Regex(re) => value.as_str().is_some_and(|s| re.is_match(s)),
            Rule::Custom(v) => return v.validate(field, value, data),
        })
    }

    fn message(&self, language: &Language, field: &str) -> String {
        let key = format!("validation.rules.{}", self.name());
        let key = if language.get(&key).is_some() {
            key
        } else {
            "validation.rules.invalid".to_string()
        };
        match self {
            Rule::Min(min) => language.format(&key, &[("field", field), ("min", fmt_num(*min).as_str())]),
            Rule::Max(max) => language.format(&key, &[("field", field), ("max", fmt_num(*max).as_str())]),
            Rule::Between(min, max) => language.format(
                &key,
                &[("field", field), ("min", fmt_num(*min).as_str()), ("max", fmt_num(*max).as_str())],
            ),
            Rule::In(values) => {
                language.format(&key, &[("field", field), ("values", values.join(", ").as_str())])
            }
            _ => language.format(&key, &[("field", field)]),
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Numeric value, string length or array size.
fn size(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => Some(match s.trim().parse::<f64>() {
            Ok(n) => n,
            Err(_) => s.chars().count() as f64,
        }),
        Value::Array(a) => Some(a.len() as f64),
        Value::Object(o) => Some(o.len() as f64),
        _ => None,
    }
}

fn fmt_num(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.contains('.')
        && !s.chars().any(char::is_whitespace)
}

/// Ordered field rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    fields: Vec<(String, Vec<Rule>)>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rules for `field`. Nested fields use dotted paths (`user.name`).
    pub fn field(mut self, field: impl Into<String>, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.fields.push((field.into(), rules.into_iter().collect()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether a rule of `field` expects an array.
    pub fn requires_array(&self, field: &str) -> bool {
        self.fields
            .iter()
            .filter(|(name, _)| name == field)
            .any(|(_, rules)| rules.iter().any(Rule::requires_array))
    }

    /// Run every rule against `data`.
    ///
    /// Returns the messages of failed rules grouped by field; an empty map
    /// means `data` is valid.
    pub fn validate(&self, data: &Value, language: &Language) -> Result<Errors, ValidatorError> {
        let mut errors = Errors::new();
        for (field, rules) in &self.fields {
            let value = lookup(data, field);
            let required = rules.iter().any(|r| matches!(r, Rule::Required));
            for rule in rules {
                let value = match value {
                    Some(value) => value,
                    None if matches!(rule, Rule::Required) => &NULL,
                    None => continue,
                };
                if !required && value.is_null() {
                    continue;
                }
                if !rule.check(field, value, data)? {
                    errors
                        .entry(field.clone())
                        .or_default()
                        .push(rule.message(language, field));
                    if matches!(rule, Rule::Required) {
                        break;
                    }
                }
            }
        }
        Ok(errors)
    }
}

static NULL: Value = Value::Null;

/// Failed-rule messages per field.
pub type Errors = BTreeMap<String, Vec<String>>;

fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Even;

    impl Validator for Even {
        fn name(&self) -> &str {
            "even"
        }

        fn validate(&self, field: &str, value: &Value, _data: &Value) -> Result<bool, ValidatorError> {
            match value.as_i64() {
                Some(n) => Ok(n % 2 == 0),
                None => Err(ValidatorError {
                    rule: "even".into(),
                    field: field.into(),
                    message: "expected an integer".into(),
                }),
            }
        }
    }

    #[test]
    fn collects_messages_per_field() {
        let rules = RuleSet::new()
            .field("name", [Rule::Required, Rule::String, Rule::Min(3.0)])
            .field("email", [Rule::Required, Rule::Email])
            .field("age", [Rule::Integer, Rule::Between(18.0, 99.0)]);
        let data = json!({ "name": "Al", "age": "12" });

        let errors = rules.validate(&data, &Language::builtin()).unwrap();
        assert_eq!(errors["name"], ["The name must be at least 3."]);
        assert_eq!(errors["email"], ["The email is required."]);
        assert_eq!(errors["age"], ["The age must be between 18 and 99."]);
    }

    #[test]
    fn optional_absent_fields_are_skipped() {
        let rules = RuleSet::new().field("page", [Rule::Integer, Rule::Min(1.0)]);
        let errors = rules.validate(&json!({}), &Language::builtin()).unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn nested_paths_and_sets() {
        let rules = RuleSet::new()
            .field("user.role", [Rule::Required, Rule::one_of(["admin", "member"])])
            .field("tags", [Rule::Array, Rule::Max(2.0)]);
        let data = json!({ "user": { "role": "guest" }, "tags": ["a", "b", "c"] });

        let errors = rules.validate(&data, &Language::builtin()).unwrap();
        assert_eq!(
            errors["user.role"],
            ["The user.role must have one of the following values: admin, member."]
        );
        assert_eq!(errors["tags"], ["The tags may not be greater than 2."]);
        assert!(rules.requires_array("tags"));
        assert!(!rules.requires_array("user.role"));
    }

    #[test]
    fn custom_validator_failure_and_internal_error() {
        let rules = RuleSet::new().field("n", [Rule::custom(Even)]);
        let language = Language::builtin();

        let errors = rules.validate(&json!({ "n": 3 }), &language).unwrap();
        assert_eq!(errors["n"], ["The n is invalid."]);

        let err = rules.validate(&json!({ "n": "x" }), &language).unwrap_err();
        assert_eq!(err.rule, "even");
    }

    #[test]
    fn regex_and_email() {
        let rules = RuleSet::new()
            .field("code", [Rule::regex("^[A-Z]{3}$")])
            .field("mail", [Rule::Email]);
        let language = Language::builtin();

        let ok = rules.validate(&json!({ "code": "ABC", "mail": "a@b.io" }), &language).unwrap();
        assert!(ok.is_empty());
        let bad = rules.validate(&json!({ "code": "abc", "mail": "nope" }), &language).unwrap();
        assert_eq!(bad.len(), 2);
    }
}
