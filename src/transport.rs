//! HTTP transport used for flag fetches and telemetry.
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// HTTP method of a [`HttpRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// `GET`
    Get,
    /// `POST`
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        })
    }
}

/// A request handed to a [`Transport`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Request method.
    pub method: HttpMethod,
    /// Fully-qualified URL, including the query string.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body. Always `None` for `GET`.
    pub body: Option<String>,
}

/// A response returned by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers. Names are stored lowercase.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// Create an empty response with the given status.
    pub fn new(status: u16) -> HttpResponse {
        HttpResponse {
            status,
            ..HttpResponse::default()
        }
    }

    /// Add a header to the response.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> HttpResponse {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set the response body.
    pub fn with_body(mut self, body: impl Into<String>) -> HttpResponse {
        self.body = body.into();
        self
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Platform HTTP transport.
///
/// Implementations should stop the underlying operation and return promptly once `cancel` is
/// cancelled. The client cancels a request when a newer request to the same endpoint supersedes
/// it. Timeouts are the transport's responsibility.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform a request. Transport-level failures (connection errors, timeouts) are returned as
    /// `Err`. Any HTTP response, whatever its status, is `Ok`.
    async fn request(&self, request: HttpRequest, cancel: CancellationToken)
        -> Result<HttpResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn request(
        &self,
        request: HttpRequest,
        cancel: CancellationToken,
    ) -> Result<HttpResponse> {
        (**self).request(request, cancel).await
    }
}

/// The default [`Transport`], backed by [`reqwest`].
pub struct ReqwestTransport {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a transport with the default timeout.
    pub fn new() -> ReqwestTransport {
        ReqwestTransport::with_timeout(ReqwestTransport::DEFAULT_TIMEOUT)
    }

    /// Create a transport with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> ReqwestTransport {
        ReqwestTransport {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(self.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                Some((name.as_str().to_ascii_lowercase(), value.to_owned()))
            })
            .collect();
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl Default for ReqwestTransport {
    fn default() -> ReqwestTransport {
        ReqwestTransport::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn request(
        &self,
        request: HttpRequest,
        cancel: CancellationToken,
    ) -> Result<HttpResponse> {
        log::trace!(target: "unlaunch", "sending {} request to {}", request.method, request.url);
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::RequestCancelled),
            result = self.send(request) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let response = HttpResponse::new(200).with_header("Content-Type", "application/json");

        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.header("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(response.header("x-missing"), None);
    }

    #[tokio::test]
    async fn cancelled_request_returns_promptly() {
        let transport = ReqwestTransport::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = transport
            .request(
                HttpRequest {
                    method: HttpMethod::Get,
                    // Non-routable address, so the request would otherwise hang until timeout.
                    url: "http://10.255.255.1/evaluate".to_owned(),
                    headers: HashMap::new(),
                    body: None,
                },
                cancel,
            )
            .await;

        assert!(matches!(result, Err(Error::RequestCancelled)));
    }
}
