//! `fetch-policy` is a composable request pipeline for outbound HTTP calls.
//!
//! A [`FetchClient`] is a base executor wrapped by policy layers composed in
//! a caller-chosen order:
//! - [`RetryPolicy`]: backoff schedules, jitter, `Retry-After`, idempotency
//!   guard and a shared token-bucket retry budget
//! - [`TimeoutPolicy`]: default timeouts, deadline clamping, fail-fast and
//!   deadline header propagation
//! - [`AuthPolicy`], `LoggingPolicy`, `TracingPolicy`
//!
//! ```no_run
//! use fetch_policy::{compose, ClientOptions, RequestOptions, RetryPolicy, TimeoutPolicy};
//! use serde_json::json;
//!
//! # async fn run() -> fetch_policy::Result<()> {
//! let client = compose::<serde_json::Value>()
//!     .with(RetryPolicy::new("exp:0.2:3").jitter_ratio(0.2))
//!     .with(TimeoutPolicy::new().default_timeout_ms(2_000))
//!     .build(ClientOptions::new("https://api.example.com"))?;
//!
//! let api = client.bind(json!({ "deadline": 1_900_000_000_000u64 }));
//! let response = api
//!     .request("GET /items/:id", RequestOptions::new().param("id", 7))
//!     .await?;
//! println!("status={}", response.status);
//! # Ok(())
//! # }
//! ```

mod auth;
mod budget;
mod client;
mod error;
mod executor;
mod headers;
mod layer;
mod options;
mod resolve;
mod retry;
mod schedule;
mod signal;
mod timeout;
mod transport;

#[cfg(feature = "tracing")]
mod logging;
#[cfg(feature = "tracing")]
mod trace;

pub use auth::{AuthPolicy, TokenFn};
pub use budget::BudgetConfig;
pub use client::{compose, BoundClient, ClientFactory, FetchClient};
pub use error::{
    BoxError, CancelReason, FailureKind, FetchError, RequestDescriptor, RequestFailure,
};
pub use headers::{HeaderValue, Headers, SET_COOKIE};
pub use layer::{handler_fn, BindScope, Context, Handler, HandlerFn, Layer, Policy};
pub use options::{merge, ClientOptions, HttpConfig, JsonMap, Payload, RequestOptions};
pub use resolve::{EndpointResolver, ResolvedRequest, Route};
pub use retry::{
    default_retryable, Jitter, JitterFn, RetryPolicy, RetryPredicate, MAX_RETRY_DELAY_SECS,
};
pub use schedule::{Backoff, BackoffStrategy, RetrySchedule, RetrySpec, MAX_RETRIES};
pub use signal::{AbortController, AbortSignal};
pub use timeout::{
    Clock, DeadlineComputation, DeadlineHeader, DeadlineMode, DeadlineResolver, TimeoutPolicy,
    DEADLINE_HEADER,
};
pub use transport::{ReqwestTransport, Response, Transport, TransportError, TransportRequest};

#[cfg(feature = "tracing")]
pub use logging::LoggingPolicy;
#[cfg(feature = "tracing")]
pub use trace::TracingPolicy;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, FetchError>;
