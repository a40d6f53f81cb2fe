use std::fmt;
use std::future::Future;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;

use crate::{error::BoxError, FetchError, Headers, Result};

/// Fully resolved request handed to a [`Transport`].
#[derive(Clone, Debug, PartialEq)]
pub struct TransportRequest {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
}

/// Response returned by a [`Transport`].
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: String,
}

impl Response {
    /// Builds a response, mainly for custom transports and tests.
    pub fn new(status: u16, headers: Headers, body: impl Into<String>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First value of header `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.first(name)
    }

    /// Raw response body.
    pub fn text(&self) -> &str {
        &self.body
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|err| {
            FetchError::Decode(format!("invalid response JSON: {err}; body: {}", self.body))
        })
    }
}

/// Failure reported by a transport before any response was produced.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    /// Transport failure without an underlying error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Transport failure wrapping `source`.
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Human-readable failure description.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn into_source(self) -> Option<BoxError> {
        self.source
    }
}

/// Performs the network exchange. The pipeline itself never does I/O.
///
/// Any `Fn(TransportRequest) -> impl Future<Output = Result<Response, TransportError>>`
/// closure is a transport, which makes stubbing in tests trivial.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'_, std::result::Result<Response, TransportError>>;
}

impl<F, Fut> Transport for F
where
    F: Fn(TransportRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Response, TransportError>> + Send + 'static,
{
    fn send(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'_, std::result::Result<Response, TransportError>> {
        Box::pin(self(request))
    }
}

/// Default transport backed by `reqwest`.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    /// Transport over a default `reqwest::Client`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured `reqwest` client (proxies, TLS roots, pools).
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn execute(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<Response, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|err| {
            TransportError::with_source(format!("invalid method '{}'", request.method), err)
        })?;

        let mut builder = self.http.request(method, &request.url);
        for (name, value) in request.headers.iter() {
            for item in value.iter() {
                builder = builder.header(name, item);
            }
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| TransportError::with_source(describe(&err), err))?;

        let status = response.status().as_u16();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.append(name.as_str(), value);
            }
        }
        let body = response
            .text()
            .await
            .map_err(|err| TransportError::with_source("failed to read response body", err))?;

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

impl Transport for ReqwestTransport {
    fn send(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'_, std::result::Result<Response, TransportError>> {
        Box::pin(self.execute(request))
    }
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_connect() {
        format!("connection failed: {err}")
    } else if err.is_timeout() {
        format!("transport timeout: {err}")
    } else {
        format!("transport error: {err}")
    }
}
