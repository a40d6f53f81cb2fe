use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::{
    error::RequestDescriptor, EndpointResolver, FetchError, Handler, RequestFailure,
    RequestOptions, Response, Result, Route, Transport, TransportRequest,
};

/// Innermost handler: resolves the endpoint and performs one transport call.
///
/// The call races the numeric `timeout_ms` and the abort signal. Non-2xx
/// responses become [`RequestFailure`]s carrying the response.
pub(crate) struct Executor {
    transport: Arc<dyn Transport>,
    resolver: Arc<EndpointResolver>,
}

impl Executor {
    pub(crate) fn new(transport: Arc<dyn Transport>, resolver: Arc<EndpointResolver>) -> Self {
        Self {
            transport,
            resolver,
        }
    }

    async fn execute(&self, route: &Route, options: RequestOptions) -> Result<Response> {
        if options.signal.as_ref().is_some_and(|signal| signal.is_aborted()) {
            return Err(FetchError::aborted());
        }

        let resolved = self.resolver.resolve(route, &options)?;
        let descriptor = RequestDescriptor {
            method: resolved.method.clone(),
            url: resolved.url.clone(),
        };
        let request = TransportRequest {
            method: resolved.method,
            url: resolved.url,
            headers: resolved.headers,
            body: resolved.body,
        };

        let exchange = async {
            let send = self.transport.send(request);
            match options.timeout_ms {
                Some(timeout_ms) => {
                    match tokio::time::timeout(Duration::from_millis(timeout_ms), send).await {
                        Ok(outcome) => Ok(outcome),
                        Err(_) => Err(RequestFailure::timeout(descriptor.clone(), timeout_ms)),
                    }
                }
                None => Ok(send.await),
            }
        };

        let outcome = match &options.signal {
            Some(signal) => {
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => return Err(FetchError::aborted()),
                    outcome = exchange => outcome,
                }
            }
            None => exchange.await,
        };

        match outcome? {
            Ok(response) if response.is_success() => Ok(response),
            Ok(response) => Err(RequestFailure::status_error(descriptor, response).into()),
            Err(err) => {
                let failure = RequestFailure::network(descriptor, err.message());
                Err(match err.into_source() {
                    Some(source) => failure.with_source(source),
                    None => failure,
                }
                .into())
            }
        }
    }
}

impl Handler for Executor {
    fn handle<'a>(
        &'a self,
        route: &'a Route,
        options: RequestOptions,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(self.execute(route, options))
    }
}
