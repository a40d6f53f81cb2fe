use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::{
    executor::Executor, BindScope, ClientOptions, Context, EndpointResolver, FetchError, Handler,
    HttpConfig, Layer, Policy, ReqwestTransport, RequestOptions, Response, Result, Route,
    Transport,
};

struct InstalledLayer<C> {
    kind: &'static str,
    layer: Arc<dyn Layer<C>>,
}

impl<C> Clone for InstalledLayer<C> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            layer: Arc::clone(&self.layer),
        }
    }
}

/// HTTP client made of a base executor plus installed policy layers.
///
/// Clones share the executor and every layer, including per-client state
/// such as the retry budget.
pub struct FetchClient<C = ()> {
    executor: Arc<Executor>,
    resolver: Arc<EndpointResolver>,
    config: HttpConfig,
    layers: Vec<InstalledLayer<C>>,
}

impl<C> Clone for FetchClient<C> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            resolver: Arc::clone(&self.resolver),
            config: self.config.clone(),
            layers: self.layers.clone(),
        }
    }
}

impl<C> fmt::Debug for FetchClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchClient")
            .field("base_url", &self.resolver.base_url())
            .field("config", &self.config)
            .field("policies", &self.policy_kinds())
            .finish()
    }
}

impl<C> FetchClient<C> {
    /// Installed policy kinds, innermost first.
    pub fn policy_kinds(&self) -> Vec<&'static str> {
        self.layers.iter().map(|installed| installed.kind).collect()
    }

    /// Construction-level defaults applied to every bound client.
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }
}

impl<C: Context> FetchClient<C> {
    /// Creates a client without any policy layers.
    pub fn new(options: ClientOptions) -> Result<Self> {
        let resolver = Arc::new(EndpointResolver::new(&options.base_url)?);
        let transport: Arc<dyn Transport> = match options.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()),
        };
        Ok(Self {
            executor: Arc::new(Executor::new(transport, Arc::clone(&resolver))),
            resolver,
            config: options.config,
            layers: Vec::new(),
        })
    }

    /// Installs `policy` around the current pipeline.
    ///
    /// If a policy of the same kind is already installed, the existing layer
    /// may take over the new configuration in place; otherwise stacking is
    /// rejected with [`FetchError::Config`].
    pub fn with_policy(self, policy: impl Policy<C>) -> Result<Self> {
        self.apply(&policy)
    }

    fn apply(mut self, policy: &dyn Policy<C>) -> Result<Self> {
        let kind = policy.kind();
        if let Some(existing) = self.layers.iter().find(|installed| installed.kind == kind) {
            if existing.layer.reconfigure(policy.as_any()) {
                #[cfg(feature = "tracing")]
                tracing::debug!(policy = kind, "reconfigured installed policy in place");
                return Ok(self);
            }
            return Err(FetchError::Config(format!(
                "a `{kind}` policy is already installed on this client"
            )));
        }
        let layer = policy.install()?;
        self.layers.push(InstalledLayer { kind, layer });
        Ok(self)
    }


    /// Binds the client to a context value.
    pub fn bind(&self, context: C) -> BoundClient<C> {
        self.bind_with(context, HttpConfig::default())
    }

    /// Binds the client to a context value with extra defaults layered over
    /// the construction config.
    pub fn bind_with(&self, context: C, config: HttpConfig) -> BoundClient<C> {
        let scope = BindScope {
            context: Arc::new(context),
            resolver: Arc::clone(&self.resolver),
        };
        let base: Arc<dyn Handler> = self.executor.clone();
        let handler = self
            .layers
            .iter()
            .fold(base, |next, installed| installed.layer.wrap(next, &scope));
        BoundClient {
            context: scope.context,
            config: self.config.merge(&config),
            handler,
        }
    }
}

/// Client bound to one context value.
pub struct BoundClient<C = ()> {
    context: Arc<C>,
    config: HttpConfig,
    handler: Arc<dyn Handler>,
}

impl<C> Clone for BoundClient<C> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            config: self.config.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for BoundClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundClient")
            .field("context", &self.context)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C: Context> BoundClient<C> {
    /// Context value this client was bound to.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Effective defaults: construction config with bind config on top.
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Sends `route` (e.g. `"POST /items"`) through the pipeline.
    pub async fn request(&self, route: &str, options: RequestOptions) -> Result<Response> {
        let route = Route::parse(route);
        let options = self.config.apply_to(options);
        self.handler.handle(&route, options).await
    }

    /// Like [`BoundClient::request`], decoding the body as JSON.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        route: &str,
        options: RequestOptions,
    ) -> Result<T> {
        self.request(route, options).await?.json()
    }
}

/// Ordered list of policies turned into clients by [`ClientFactory::build`].
pub struct ClientFactory<C = ()> {
    policies: Vec<Arc<dyn Policy<C>>>,
}

impl<C> Clone for ClientFactory<C> {
    fn clone(&self) -> Self {
        Self {
            policies: self.policies.clone(),
        }
    }
}

/// Starts a factory. Policies added later wrap the ones added earlier, so
/// the last policy is the outermost layer.
pub fn compose<C: Context>() -> ClientFactory<C> {
    ClientFactory {
        policies: Vec::new(),
    }
}

impl<C: Context> ClientFactory<C> {
    /// Appends `policy`. It wraps every policy added before it.
    pub fn with(mut self, policy: impl Policy<C>) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    /// Builds a client. Every client gets its own layer state.
    pub fn build(&self, options: ClientOptions) -> Result<FetchClient<C>> {
        self.policies
            .iter()
            .try_fold(FetchClient::new(options)?, |client, policy| {
                client.apply(policy.as_ref())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::{compose, FetchClient};
    use crate::{ClientOptions, FetchError, RetryPolicy, TimeoutPolicy};

    fn describe<C>(client: &FetchClient<C>) -> String {
        format!("{client:?}")
    }

    #[test]
    fn debug_lists_base_url_and_policies() {
        let client = compose::<()>()
            .with(TimeoutPolicy::new())
            .with(RetryPolicy::new([0.1]))
            .build(ClientOptions::new("http://svc.local/api"))
            .expect("client must build");

        let debug = describe(&client);
        assert!(debug.contains("http://svc.local/api/"), "{debug}");
        assert!(debug.contains("[\"timeout\", \"retry\"]"), "{debug}");
    }

    #[test]
    fn invalid_base_url_is_a_config_error() {
        let result = FetchClient::<()>::new(ClientOptions::new("not a url"));
        assert!(matches!(result, Err(FetchError::Config(_))));
    }
}
