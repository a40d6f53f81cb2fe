use std::any::Any;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::{field, Instrument};

use crate::{BindScope, Context, Handler, Layer, Policy, RequestOptions, Response, Result, Route};

/// Runs every call inside an `http.client.request` span and records the
/// resulting status code on it.
#[derive(Clone, Debug, Default)]
pub struct TracingPolicy;

impl TracingPolicy {
    /// Creates the policy.
    pub fn new() -> Self {
        Self
    }
}

impl<C: Context> Policy<C> for TracingPolicy {
    fn kind(&self) -> &'static str {
        "tracing"
    }

    fn install(&self) -> Result<Arc<dyn Layer<C>>> {
        Ok(Arc::new(TracingPolicy))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<C: Context> Layer<C> for TracingPolicy {
    fn wrap(&self, next: Arc<dyn Handler>, _scope: &BindScope<C>) -> Arc<dyn Handler> {
        Arc::new(TracingHandler { next })
    }
}

struct TracingHandler {
    next: Arc<dyn Handler>,
}

impl Handler for TracingHandler {
    fn handle<'a>(
        &'a self,
        route: &'a Route,
        options: RequestOptions,
    ) -> BoxFuture<'a, Result<Response>> {
        let span = tracing::info_span!(
            "http.client.request",
            http.method = %route.method(),
            url.path = %route.path(),
            http.status_code = field::Empty,
            error = field::Empty,
        );
        let call = self.next.handle(route, options);
        Box::pin(
            async move {
                let outcome = call.await;
                let current = tracing::Span::current();
                match &outcome {
                    Ok(response) => {
                        current.record("http.status_code", response.status);
                    }
                    Err(err) => {
                        if let Some(status) = err.status() {
                            current.record("http.status_code", status);
                        }
                        current.record("error", field::display(err));
                    }
                }
                outcome
            }
            .instrument(span),
        )
    }
}
