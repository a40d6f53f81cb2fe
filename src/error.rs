use std::fmt;

use crate::transport::Response;

/// Boxed error type accepted from user-supplied callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Network-level failure or non-success HTTP response.
    #[error(transparent)]
    Request(#[from] RequestFailure),
    /// The call was cancelled before it could complete. Never retried.
    #[error("request cancelled: {reason}")]
    Cancelled { reason: CancelReason },
    /// Invalid policy or client configuration, raised eagerly.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The route and options could not be resolved into a request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Response decoding error.
    #[error("decode error: {0}")]
    Decode(String),
    /// Error raised by a user-supplied callback.
    #[error(transparent)]
    Other(BoxError),
}

impl FetchError {
    pub(crate) fn aborted() -> Self {
        Self::Cancelled {
            reason: CancelReason::Aborted,
        }
    }

    pub(crate) fn deadline_exceeded() -> Self {
        Self::Cancelled {
            reason: CancelReason::DeadlineExceeded,
        }
    }

    /// Returns `true` for cancellation-class errors.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// HTTP status of the failed response, if any.
    pub fn status(&self) -> Option<u16> {
        self.as_request_failure().and_then(RequestFailure::status)
    }

    /// Returns the underlying [`RequestFailure`], if any.
    pub fn as_request_failure(&self) -> Option<&RequestFailure> {
        match self {
            Self::Request(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Why a call was cancelled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CancelReason {
    /// The caller's abort signal fired.
    Aborted,
    /// The bind-context deadline had already passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aborted => f.write_str("signal aborted"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Classification of a [`RequestFailure`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    /// The transport could not complete the exchange.
    Network,
    /// The per-attempt timeout elapsed before a response arrived.
    Timeout,
    /// A response arrived with a non-success status.
    Status,
}

/// Method and URL of the request that failed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequestDescriptor {
    pub method: String,
    pub url: String,
}

/// Failure of a single request attempt.
#[derive(Debug, thiserror::Error)]
#[error("{} {} failed: {message}", .request.method, .request.url)]
pub struct RequestFailure {
    kind: FailureKind,
    request: RequestDescriptor,
    response: Option<Response>,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl RequestFailure {
    /// Failure reported by the transport before any response arrived.
    pub fn network(request: RequestDescriptor, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Network,
            request,
            response: None,
            message: message.into(),
            source: None,
        }
    }

    /// The attempt did not finish within `timeout_ms`.
    pub fn timeout(request: RequestDescriptor, timeout_ms: u64) -> Self {
        Self {
            kind: FailureKind::Timeout,
            request,
            response: None,
            message: format!("timed out after {timeout_ms} ms"),
            source: None,
        }
    }

    /// Non-2xx response. The response is kept for inspection.
    pub fn status_error(request: RequestDescriptor, response: Response) -> Self {
        Self {
            kind: FailureKind::Status,
            message: format!("http status {}", response.status),
            request,
            response: Some(response),
            source: None,
        }
    }

    pub(crate) fn with_source(mut self, source: BoxError) -> Self {
        self.source = Some(source);
        self
    }

    /// Failure family: network, timeout or status.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// HTTP status, absent for network-level failures.
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|response| response.status)
    }

    /// Method and URL of the failed request.
    pub fn request(&self) -> &RequestDescriptor {
        &self.request
    }

    /// Response that caused the failure, for status failures only.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }
}
