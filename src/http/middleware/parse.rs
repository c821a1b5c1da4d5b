//! Query and body parsing.
//!
//! # Responsibilities
//! - Parse the query string into [`FormValues`]
//! - Enforce `server.max_upload_size` before any body parsing
//! - Parse the body by content type: JSON, url-encoded form or multipart form
//!
//! # Design Decisions
//! - An oversized `Content-Length` is rejected without reading the body;
//!   chunked bodies are buffered through `axum::body::to_bytes` with the
//!   same limit
//! - The buffered bytes are put back on the request so handlers can still
//!   read the raw body
//! - Unknown content types are left unparsed; malformed JSON or multipart
//!   bodies are rejected with 400

use std::collections::BTreeMap;

use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Multipart};
use axum::http::{header, HeaderMap, Request, StatusCode};
use http_body_util::LengthLimitError;
use serde_json::{Map, Value};

use crate::http::context::Context;
use crate::http::handler::{Handler, Middleware};
use crate::http::response;

/// Repeated string values keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormValues(BTreeMap<String, Vec<String>>);

impl FormValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `application/x-www-form-urlencoded` input.
    pub fn parse(input: &[u8]) -> Self {
        let mut values = Self::new();
        for (key, value) in url::form_urlencoded::parse(input) {
            values.append(key.into_owned(), value.into_owned());
        }
        values
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(value.into());
    }

    /// First value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// JSON object view. Repeated fields become arrays; single values stay
    /// strings unless `array_field` says the field must be an array.
    pub fn to_json(&self, array_field: impl Fn(&str) -> bool) -> Value {
        let mut map = Map::new();
        self.write_json(&mut map, &array_field);
        Value::Object(map)
    }

    fn write_json(&self, map: &mut Map<String, Value>, array_field: &dyn Fn(&str) -> bool) {
        for (key, values) in &self.0 {
            let value = if values.len() == 1 && !array_field(key) {
                Value::String(values[0].clone())
            } else {
                Value::Array(values.iter().cloned().map(Value::String).collect())
            };
            map.insert(key.clone(), value);
        }
    }
}

/// A file part of a multipart body.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl UploadedFile {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn to_json(&self) -> Value {
        serde_json::json!({
            "file_name": self.file_name,
            "content_type": self.content_type,
            "size": self.size(),
        })
    }
}

/// Parsed request body.
#[derive(Debug, Clone)]
pub enum Data {
    Json(Value),
    Form(FormValues),
    Multipart {
        fields: FormValues,
        files: BTreeMap<String, Vec<UploadedFile>>,
    },
}

impl Data {
    /// JSON view used by validation. See [`FormValues::to_json`].
    pub fn to_json(&self, array_field: impl Fn(&str) -> bool) -> Value {
        match self {
            Data::Json(value) => value.clone(),
            Data::Form(values) => values.to_json(array_field),
            Data::Multipart { fields, files } => {
                let mut map = Map::new();
                fields.write_json(&mut map, &array_field);
                for (key, files) in files {
                    let value = if files.len() == 1 && !array_field(key) {
                        files[0].to_json()
                    } else {
                        Value::Array(files.iter().map(UploadedFile::to_json).collect())
                    };
                    map.insert(key.clone(), value);
                }
                Value::Object(map)
            }
        }
    }

    /// Uploaded files of `field`, empty unless the body was multipart.
    pub fn files(&self, field: &str) -> &[UploadedFile] {
        match self {
            Data::Multipart { files, .. } => files.get(field).map(Vec::as_slice).unwrap_or(&[]),
            _ => &[],
        }
    }
}

enum BodyKind {
    Json,
    Form,
    Multipart,
    Other,
}

fn body_kind(headers: &HeaderMap) -> BodyKind {
    let Some(content_type) = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return BodyKind::Other;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "application/json" => BodyKind::Json,
        "application/x-www-form-urlencoded" => BodyKind::Form,
        "multipart/form-data" => BodyKind::Multipart,
        other if other.starts_with("application/") && other.ends_with("+json") => BodyKind::Json,
        _ => BodyKind::Other,
    }
}

/// Maximum body size in bytes for a `max_upload_size` given in MiB.
pub fn max_body_bytes(max_upload_size: f64) -> usize {
    (max_upload_size * 1024.0 * 1024.0).max(0.0) as usize
}

/// Buffer at most `limit` bytes. Overflow is a 413, any other body error a 400.
async fn read_limited(body: Body, limit: usize) -> Result<Bytes, StatusCode> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        if e.into_inner().is::<LengthLimitError>() {
            StatusCode::PAYLOAD_TOO_LARGE
        } else {
            StatusCode::BAD_REQUEST
        }
    })
}

async fn parse_multipart(
    parts: &axum::http::request::Parts,
    bytes: Bytes,
) -> Result<Data, StatusCode> {
    let request = Request::from_parts(parts.clone(), Body::from(bytes));
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let mut fields = FormValues::new();
    let mut files: BTreeMap<String, Vec<UploadedFile>> = BTreeMap::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| e.status())?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| e.status())?;
        if file_name.is_some() {
            files.entry(name).or_default().push(UploadedFile {
                file_name,
                content_type,
                bytes,
            });
        } else {
            fields.append(name, String::from_utf8_lossy(&bytes).into_owned());
        }
    }
    Ok(Data::Multipart { fields, files })
}

async fn parse(ctx: &mut Context, limit: usize) -> Result<(), StatusCode> {
    let query = FormValues::parse(ctx.uri().query().unwrap_or_default().as_bytes());
    ctx.set_query(query);

    let declared = ctx
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    let (parts, body) = std::mem::take(ctx.request_mut()).into_parts();
    let bytes = match read_limited(body, limit).await {
        Ok(bytes) => bytes,
        Err(status) => {
            *ctx.request_mut() = Request::from_parts(parts, Body::empty());
            return Err(status);
        }
    };

    let data = if bytes.is_empty() {
        Ok(None)
    } else {
        match body_kind(&parts.headers) {
            BodyKind::Json => serde_json::from_slice::<Value>(&bytes)
                .map(|v| Some(Data::Json(v)))
                .map_err(|_| StatusCode::BAD_REQUEST),
            BodyKind::Form => Ok(Some(Data::Form(FormValues::parse(&bytes)))),
            BodyKind::Multipart => parse_multipart(&parts, bytes.clone()).await.map(Some),
            BodyKind::Other => Ok(None),
        }
    };

    *ctx.request_mut() = Request::from_parts(parts, Body::from(bytes));
    if let Some(data) = data? {
        ctx.set_data(data);
    }
    Ok(())
}

/// Middleware parsing the query string and body into the context.
#[derive(Debug, Clone, Copy, Default)]
pub struct Parse;

pub fn middleware() -> Parse {
    Parse
}

impl Middleware for Parse {
    fn wrap(&self, next: Handler) -> Handler {
        Handler::new(move |mut ctx: Context| {
            let next = next.clone();
            async move {
                let limit = max_body_bytes(ctx.config().server.max_upload_size);
                match parse(&mut ctx, limit).await {
                    Ok(()) => next.run(ctx).await,
                    Err(status) => {
                        tracing::debug!(
                            path = %ctx.uri().path(),
                            status = status.as_u16(),
                            "Request body rejected"
                        );
                        response::status(&ctx, status)
                    }
                }
            }
        })
    }
}
