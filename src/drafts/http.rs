//! HTTP client shared by the repository backends

use crate::core::error::PublishError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;

/// Longest response excerpt carried in an error
const MAX_ERROR_BODY: usize = 500;

/// How the API token travels with each request
#[derive(Debug, Clone, Copy)]
pub enum TokenHeader {
    /// `Authorization: Bearer <token>`
    Bearer,
    /// `Authorization: <token>`
    Raw,
    /// Token in a custom header
    Named(&'static str),
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    repository: String,
    base: String,
    client: Client,
}

impl ApiClient {
    pub fn new(
        repository: &str,
        base_url: &str,
        token: Option<&SecretString>,
        token_header: TokenHeader,
    ) -> Result<Self, PublishError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("Accept", HeaderValue::from_static("application/json"));

        if let Some(token) = token {
            let (name, value) = match token_header {
                TokenHeader::Bearer => (
                    reqwest::header::AUTHORIZATION,
                    format!("Bearer {}", token.expose_secret()),
                ),
                TokenHeader::Raw => (
                    reqwest::header::AUTHORIZATION,
                    token.expose_secret().to_string(),
                ),
                TokenHeader::Named(name) => (
                    HeaderName::from_static(name),
                    token.expose_secret().to_string(),
                ),
            };
            let mut value = HeaderValue::from_str(&value).map_err(|_| {
                PublishError::ConfigError(format!("{} API token is not a valid header", repository))
            })?;
            value.set_sensitive(true);
            default_headers.insert(name, value);
        }

        let client = Client::builder()
            .default_headers(default_headers)
            .user_agent(concat!("collection-publisher/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PublishError::Network {
                repository: repository.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            repository: repository.to_string(),
            base: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Absolute URL of an API path
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Send a request; non-2xx becomes `RemoteRejected`
    pub async fn call(&self, request: RequestBuilder) -> Result<Value, PublishError> {
        match self.call_allowing(request, &[]).await? {
            Some(value) => Ok(value),
            None => Ok(Value::Null),
        }
    }

    /// Like `call`, but the listed statuses yield `Ok(None)`
    pub async fn call_allowing(
        &self,
        request: RequestBuilder,
        tolerated: &[StatusCode],
    ) -> Result<Option<Value>, PublishError> {
        let response = request.send().await.map_err(|e| self.network(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.network(e))?;

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Some(Value::Null));
            }
            return serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| PublishError::RemoteRejected {
                    repository: self.repository.clone(),
                    status: status.as_u16(),
                    message: format!("invalid JSON response: {}", e),
                });
        }
        if tolerated.contains(&status) {
            return Ok(None);
        }

        Err(PublishError::RemoteRejected {
            repository: self.repository.clone(),
            status: status.as_u16(),
            message: excerpt(&body),
        })
    }

    fn network(&self, error: reqwest::Error) -> PublishError {
        PublishError::Network {
            repository: self.repository.clone(),
            message: error.without_url().to_string(),
        }
    }
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() <= MAX_ERROR_BODY {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("{}...", cut)
    }
}

/// String at a JSON pointer, if present and non-empty
pub fn json_str<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Name of the last path segment, used as upload file name
pub fn file_name(path: &std::path::Path) -> Result<String, PublishError> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| PublishError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("not a file: {}", path.display()),
        )))
}
