//! Building blocks of the request pipeline.
//!
//! A [`Policy`] is installed once per client and becomes a [`Layer`]. Each
//! `bind` asks every layer to [`Layer::wrap`] the handler below it, so a
//! bound client holds a single chain of [`Handler`]s with the executor at
//! the bottom.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value as JsonValue;

use crate::{EndpointResolver, RequestOptions, Response, Result, Route};

/// One step of the request pipeline.
pub trait Handler: Send + Sync + 'static {
    fn handle<'a>(
        &'a self,
        route: &'a Route,
        options: RequestOptions,
    ) -> BoxFuture<'a, Result<Response>>;
}

/// Handler built from an async closure.
pub struct HandlerFn<F>(F);

/// Wraps `f` as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Route, RequestOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    HandlerFn(f)
}

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Route, RequestOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    fn handle<'a>(
        &'a self,
        route: &'a Route,
        options: RequestOptions,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin((self.0)(route.clone(), options))
    }
}

/// Value a client is bound to. Visible read-only to every layer.
pub trait Context: Send + Sync + 'static {
    /// Absolute deadline in epoch milliseconds, if the caller has one.
    fn deadline_ms(&self) -> Option<u64> {
        None
    }
}

impl Context for () {}

/// Reads a numeric `"deadline"` field.
impl Context for JsonValue {
    fn deadline_ms(&self) -> Option<u64> {
        let deadline = self.get("deadline")?;
        deadline
            .as_u64()
            .or_else(|| deadline.as_f64().filter(|ms| *ms >= 0.0).map(|ms| ms as u64))
    }
}

/// What a layer sees when a client is bound.
pub struct BindScope<C> {
    pub(crate) context: Arc<C>,
    pub(crate) resolver: Arc<EndpointResolver>,
}

impl<C> BindScope<C> {
    /// Context value shared by every layer of one bound client.
    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    /// Resolver for the client base URL.
    pub fn resolver(&self) -> &Arc<EndpointResolver> {
        &self.resolver
    }
}

/// A policy installed on one client. Owns any per-client state.
pub trait Layer<C>: Send + Sync + 'static {
    /// Wraps the next inner handler for one bound client.
    fn wrap(&self, next: Arc<dyn Handler>, scope: &BindScope<C>) -> Arc<dyn Handler>;

    /// Takes over the configuration of a later policy of the same kind.
    ///
    /// Returns `false` when the layer does not support in-place replacement,
    /// in which case installing the second policy is a configuration error.
    fn reconfigure(&self, _replacement: &dyn Any) -> bool {
        false
    }
}

/// Configuration for one kind of pipeline behaviour.
pub trait Policy<C>: Send + Sync + 'static {
    /// Marker identifying the policy kind. At most one layer per kind is
    /// installed on a client.
    fn kind(&self) -> &'static str;

    /// Validates the configuration and creates the per-client layer.
    fn install(&self) -> Result<Arc<dyn Layer<C>>>;

    fn as_any(&self) -> &dyn Any;
}
