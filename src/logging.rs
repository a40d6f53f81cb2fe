use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;

use crate::{
    BindScope, Context, EndpointResolver, FetchError, Handler, Layer, Policy, RequestOptions,
    Response, Result, Route,
};

/// Emits one structured event when a call starts and one when it settles.
///
/// Placed outside a retry layer it logs the final outcome; placed inside,
/// it logs each attempt. Header values are never logged.
#[derive(Clone, Debug, Default)]
pub struct LoggingPolicy {
    log_start: bool,
}

impl LoggingPolicy {
    /// Logs completion only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log a `debug` event before the call is sent.
    pub fn log_start(mut self, log_start: bool) -> Self {
        self.log_start = log_start;
        self
    }
}

impl<C: Context> Policy<C> for LoggingPolicy {
    fn kind(&self) -> &'static str {
        "logging"
    }

    fn install(&self) -> Result<Arc<dyn Layer<C>>> {
        Ok(Arc::new(self.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<C: Context> Layer<C> for LoggingPolicy {
    fn wrap(&self, next: Arc<dyn Handler>, scope: &BindScope<C>) -> Arc<dyn Handler> {
        Arc::new(LoggingHandler {
            next,
            resolver: Arc::clone(scope.resolver()),
            log_start: self.log_start,
        })
    }
}

struct LoggingHandler {
    next: Arc<dyn Handler>,
    resolver: Arc<EndpointResolver>,
    log_start: bool,
}

impl LoggingHandler {
    fn url_for(&self, route: &Route, options: &RequestOptions) -> String {
        self.resolver
            .resolve(route, options)
            .map(|resolved| resolved.url)
            .unwrap_or_else(|_| route.path().to_owned())
    }

    async fn run(&self, route: &Route, options: RequestOptions) -> Result<Response> {
        let url = self.url_for(route, &options);
        let method = route.method();
        if self.log_start {
            tracing::debug!(%method, %url, timeout_ms = options.timeout_ms, "sending request");
        }

        let started = Instant::now();
        let outcome = self.next.handle(route, options).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(response) => {
                tracing::info!(%method, %url, status = response.status, elapsed_ms, "request completed");
            }
            Err(FetchError::Cancelled { reason }) => {
                tracing::info!(%method, %url, %reason, elapsed_ms, "request cancelled");
            }
            Err(err) => {
                tracing::warn!(
                    %method,
                    %url,
                    status = err.status(),
                    elapsed_ms,
                    error = %err,
                    "request failed"
                );
            }
        }
        outcome
    }
}

impl Handler for LoggingHandler {
    fn handle<'a>(
        &'a self,
        route: &'a Route,
        options: RequestOptions,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(self.run(route, options))
    }
}
