//! Optional URL shortening for links embedded in reports.
//!
//! The shortener service is described entirely in configuration: an HTTP
//! method and URL, optional headers, and query or form parameters in which
//! the literal `$URL` is replaced with the link to shorten. An accessor
//! describes where the short URL appears in the response.
//!
//! Shortening is best effort. Any failure (connect error, non-2xx status,
//! missing field or header) falls back to the long URL with a warning; it
//! never fails the action that asked for it.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::filter::{FieldPath, FilterParseError};

/// Where to find the short URL in the service response.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Accessor {
    /// The response body, trimmed, is the short URL.
    WholeBody,
    /// A dotted path into a JSON response body.
    JsonField { path: String },
    /// A response header.
    Header { name: String },
}

/// Shortener service definition, as it appears in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ShortenerConfig {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Query parameters; values may contain `$URL`.
    #[serde(default)]
    pub query: HashMap<String, String>,
    /// Form body parameters; values may contain `$URL`.
    #[serde(default)]
    pub form: HashMap<String, String>,
    pub accessor: Accessor,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Configuration problems caught when the shortener is built.
#[derive(Debug, Error)]
pub enum ShortenerBuildError {
    #[error("invalid HTTP method '{0}'")]
    BadMethod(String),

    #[error("invalid json-field accessor path: {0}")]
    BadAccessorPath(#[from] FilterParseError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
enum ShortenError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service answered {0}")]
    Status(StatusCode),

    #[error("response JSON has no field at the accessor path")]
    MissingField,

    #[error("response has no '{0}' header")]
    MissingHeader(String),

    #[error("service returned an empty short URL")]
    Empty,
}

#[derive(Debug)]
enum CompiledAccessor {
    WholeBody,
    JsonField(FieldPath),
    Header(String),
}

/// Client for the configured shortener service.
#[derive(Debug)]
pub struct UrlShortener {
    client: Client,
    method: Method,
    url: String,
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
    form: HashMap<String, String>,
    accessor: CompiledAccessor,
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

impl UrlShortener {
    pub fn new(config: ShortenerConfig) -> Result<Self, ShortenerBuildError> {
        let method = Method::from_bytes(config.method.to_uppercase().as_bytes())
            .map_err(|_| ShortenerBuildError::BadMethod(config.method.clone()))?;
        let accessor = match config.accessor {
            Accessor::WholeBody => CompiledAccessor::WholeBody,
            Accessor::JsonField { path } => CompiledAccessor::JsonField(FieldPath::parse(&path)?),
            Accessor::Header { name } => CompiledAccessor::Header(name),
        };
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(UrlShortener {
            client,
            method,
            url: config.url,
            headers: config.headers,
            query: config.query,
            form: config.form,
            accessor,
        })
    }

    /// Shortens a URL, falling back to the original on any failure.
    pub async fn shorten(&self, long_url: &str) -> String {
        match self.try_shorten(long_url).await {
            Ok(short) => short,
            Err(error) => {
                warn!(%error, url = long_url, "shortening failed, using the long URL");
                long_url.to_string()
            }
        }
    }

    async fn try_shorten(&self, long_url: &str) -> Result<String, ShortenError> {
        let substitute = |params: &HashMap<String, String>| {
            params
                .iter()
                .map(|(k, v)| (k.clone(), v.replace("$URL", long_url)))
                .collect::<Vec<_>>()
        };

        let mut request = self
            .client
            .request(self.method.clone(), self.url.replace("$URL", long_url));
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if !self.query.is_empty() {
            request = request.query(&substitute(&self.query));
        }
        if !self.form.is_empty() {
            request = request.form(&substitute(&self.form));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ShortenError::Status(response.status()));
        }

        let short = match &self.accessor {
            CompiledAccessor::WholeBody => response.text().await?.trim().to_string(),
            CompiledAccessor::JsonField(path) => {
                let body: serde_json::Value = response.json().await?;
                path.resolve_first(&body).ok_or(ShortenError::MissingField)?
            }
            CompiledAccessor::Header(name) => response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| ShortenError::MissingHeader(name.clone()))?,
        };
        if short.is_empty() {
            return Err(ShortenError::Empty);
        }
        Ok(short)
    }
}
