//! Language catalog.
//!
//! # Responsibilities
//! - Hold the localized lines of every available language
//! - Provide built-in `en-US` lines (status messages, validation messages)
//! - Load additional languages from `<dir>/<tag>/*.json`
//!
//! # Design Decisions
//! - Lines are flat `file.key` strings; nested JSON objects are flattened
//!   with `.` separators
//! - Tags are compared case-insensitively
//! - Loaded files are merged over the built-in lines, so a partial
//!   translation still answers every key

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// Tag of the built-in language.
pub const DEFAULT_TAG: &str = "en-US";

/// Errors raised while loading language files.
#[derive(Debug, Error)]
pub enum LanguageError {
    #[error("failed to read language directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse language file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("language file {path} must contain a JSON object")]
    NotAnObject { path: PathBuf },
}

const BUILTIN_LINES: &[(&str, &str)] = &[
    ("status.400", "Bad Request"),
    ("status.401", "Unauthorized"),
    ("status.403", "Forbidden"),
    ("status.404", "Not Found"),
    ("status.405", "Method Not Allowed"),
    ("status.408", "Request Timeout"),
    ("status.413", "Payload Too Large"),
    ("status.415", "Unsupported Media Type"),
    ("status.422", "Unprocessable Entity"),
    ("status.429", "Too Many Requests"),
    ("status.500", "Internal Server Error"),
    ("status.503", "Service Unavailable"),
    ("validation.rules.required", "The :field is required."),
    ("validation.rules.string", "The :field must be a string."),
    ("validation.rules.integer", "The :field must be an integer."),
    ("validation.rules.numeric", "The :field must be numeric."),
    ("validation.rules.boolean", "The :field must be a boolean."),
    ("validation.rules.array", "The :field must be an array."),
    ("validation.rules.object", "The :field must be an object."),
    ("validation.rules.min", "The :field must be at least :min."),
    ("validation.rules.max", "The :field may not be greater than :max."),
    ("validation.rules.between", "The :field must be between :min and :max."),
    ("validation.rules.in", "The :field must have one of the following values: :values."),
    ("validation.rules.email", "The :field must be a valid email address."),
    ("validation.rules.regex", "The :field format is invalid."),
    ("validation.rules.invalid", "The :field is invalid."),
];

/// The localized lines of one language.
#[derive(Debug, Clone)]
pub struct Language {
    tag: String,
    lines: HashMap<String, String>,
}

impl Language {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            lines: HashMap::new(),
        }
    }

    /// The built-in `en-US` language.
    pub fn builtin() -> Self {
        let mut language = Self::new(DEFAULT_TAG);
        for (key, line) in BUILTIN_LINES {
            language.insert(*key, *line);
        }
        language
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn insert(&mut self, key: impl Into<String>, line: impl Into<String>) {
        self.lines.insert(key.into(), line.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.get(key).map(String::as_str)
    }

    /// The line for `key` with every `:name` placeholder replaced, or the key
    /// itself when the line is missing.
    pub fn format(&self, key: &str, replacements: &[(&str, &str)]) -> String {
        let mut line = self.get(key).unwrap_or(key).to_string();
        // Longest names first so `:min` never eats into `:minimum`.
        let mut replacements = replacements.to_vec();
        replacements.sort_by_key(|(name, _)| std::cmp::Reverse(name.len()));
        for (name, value) in replacements {
            line = line.replace(&format!(":{name}"), value);
        }
        line
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn merge_file(&mut self, prefix: &str, path: &Path) -> Result<(), LanguageError> {
        let text = fs::read_to_string(path).map_err(|source| LanguageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_json::from_str(&text).map_err(|source| LanguageError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if !value.is_object() {
            return Err(LanguageError::NotAnObject {
                path: path.to_path_buf(),
            });
        }
        flatten(prefix, &value, &mut self.lines);
        Ok(())
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut HashMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&key, value, out);
            }
        }
        Value::String(line) => {
            out.insert(prefix.to_string(), line.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

/// Every available language plus the configured default.
#[derive(Debug, Clone)]
pub struct Catalog {
    languages: Vec<Arc<Language>>,
    default: Arc<Language>,
}

impl Catalog {
    /// Catalog holding only the built-in language.
    pub fn new() -> Self {
        let builtin = Arc::new(Language::builtin());
        Self {
            languages: vec![Arc::clone(&builtin)],
            default: builtin,
        }
    }

    /// Load every `<dir>/<tag>/*.json` file on top of the built-in lines.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, LanguageError> {
        let dir = dir.as_ref();
        let io = |source| LanguageError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut catalog = Self::new();
        let mut entries: Vec<_> = fs::read_dir(dir)
            .map_err(io)?
            .collect::<Result<_, _>>()
            .map_err(io)?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let tag = entry.file_name().to_string_lossy().into_owned();
            let mut language = catalog
                .get(&tag)
                .map(|l| (*l).clone())
                .unwrap_or_else(|| {
                    let mut language = Language::builtin();
                    language.tag = tag.clone();
                    language
                });

            let mut files: Vec<PathBuf> = fs::read_dir(&path)
                .map_err(|source| LanguageError::Io {
                    path: path.clone(),
                    source,
                })?
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect();
            files.sort();

            for file in files {
                let stem = file
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                language.merge_file(&stem, &file)?;
            }

            tracing::debug!(language = %tag, lines = language.len(), "Language loaded");
            catalog.add(language);
        }
        Ok(catalog)
    }

    /// Add or replace a language.
    pub fn add(&mut self, language: Language) {
        let language = Arc::new(language);
        if language.tag.eq_ignore_ascii_case(&self.default.tag) {
            self.default = Arc::clone(&language);
        }
        match self
            .languages
            .iter_mut()
            .find(|l| l.tag.eq_ignore_ascii_case(&language.tag))
        {
            Some(slot) => *slot = language,
            None => self.languages.push(language),
        }
    }

    /// Select the default language. Unknown tags leave the default unchanged
    /// and return `false`.
    pub fn set_default(&mut self, tag: &str) -> bool {
        match self.get(tag) {
            Some(language) => {
                self.default = language;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, tag: &str) -> Option<Arc<Language>> {
        self.languages
            .iter()
            .find(|l| l.tag.eq_ignore_ascii_case(tag))
            .cloned()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.get(tag).is_some()
    }

    pub fn default_language(&self) -> Arc<Language> {
        Arc::clone(&self.default)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.languages.iter().map(|l| l.tag())
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
