use std::any::Any;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures_util::future::BoxFuture;

use crate::{
    BindScope, Context, Handler, Layer, Policy, RequestOptions, Response, Result, Route,
};

/// Produces a bearer token from the bind context.
pub type TokenFn<C> = Arc<dyn Fn(&C) -> Option<String> + Send + Sync>;

enum Credential<C> {
    /// Full `authorization` header value.
    Raw(String),
    /// Arbitrary header name and value.
    Header { name: String, value: String },
    FromContext(TokenFn<C>),
}

impl<C> Clone for Credential<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Raw(value) => Self::Raw(value.clone()),
            Self::Header { name, value } => Self::Header {
                name: name.clone(),
                value: value.clone(),
            },
            Self::FromContext(token) => Self::FromContext(Arc::clone(token)),
        }
    }
}

impl<C> Credential<C> {
    fn header(&self, context: &C) -> Option<(String, String)> {
        match self {
            Self::Raw(value) => Some(("authorization".to_owned(), value.clone())),
            Self::Header { name, value } => Some((name.clone(), value.clone())),
            Self::FromContext(token) => token(context)
                .map(|token| ("authorization".to_owned(), normalize_bearer_authorization(&token))),
        }
    }
}

/// Adds credentials to every call.
///
/// Installing a second `AuthPolicy` on the same client swaps the credential
/// in place; clients bound earlier pick up the new credential on their next
/// call. A header the caller sets explicitly is never overwritten.
pub struct AuthPolicy<C> {
    credential: Credential<C>,
}

impl<C> fmt::Debug for AuthPolicy<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthPolicy")
            .field("credential", &"<redacted>")
            .finish()
    }
}

impl<C: Context> AuthPolicy<C> {
    /// Uses a full raw authorization value, e.g. `"Bearer <token>"`.
    pub fn raw(authorization: impl Into<String>) -> Self {
        Self {
            credential: Credential::Raw(authorization.into()),
        }
    }

    /// Uses a bearer token. The `Bearer ` prefix is added when missing.
    pub fn bearer(token: impl AsRef<str>) -> Self {
        Self::raw(normalize_bearer_authorization(token.as_ref()))
    }

    /// Sends the credential under a custom header, e.g. `x-api-key`.
    pub fn header(name: &str, value: impl Into<String>) -> Self {
        Self {
            credential: Credential::Header {
                name: name.to_ascii_lowercase(),
                value: value.into(),
            },
        }
    }

    /// Derives a bearer token from the bind context.
    pub fn from_context<F>(token: F) -> Self
    where
        F: Fn(&C) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            credential: Credential::FromContext(Arc::new(token)),
        }
    }
}

impl<C: Context> Policy<C> for AuthPolicy<C> {
    fn kind(&self) -> &'static str {
        "auth"
    }

    fn install(&self) -> Result<Arc<dyn Layer<C>>> {
        Ok(Arc::new(AuthLayer {
            credential: Arc::new(ArcSwap::from_pointee(self.credential.clone())),
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct AuthLayer<C> {
    credential: Arc<ArcSwap<Credential<C>>>,
}

impl<C: Context> Layer<C> for AuthLayer<C> {
    fn wrap(&self, next: Arc<dyn Handler>, scope: &BindScope<C>) -> Arc<dyn Handler> {
        Arc::new(AuthHandler {
            next,
            credential: Arc::clone(&self.credential),
            context: Arc::clone(&scope.context),
        })
    }

    fn reconfigure(&self, replacement: &dyn Any) -> bool {
        match replacement.downcast_ref::<AuthPolicy<C>>() {
            Some(policy) => {
                self.credential.store(Arc::new(policy.credential.clone()));
                true
            }
            None => false,
        }
    }
}

struct AuthHandler<C> {
    next: Arc<dyn Handler>,
    credential: Arc<ArcSwap<Credential<C>>>,
    context: Arc<C>,
}

impl<C: Context> Handler for AuthHandler<C> {
    fn handle<'a>(
        &'a self,
        route: &'a Route,
        options: RequestOptions,
    ) -> BoxFuture<'a, Result<Response>> {
        let options = match self.credential.load().header(self.context.as_ref()) {
            Some((name, value)) => options.with_default_header(&name, value),
            None => options,
        };
        self.next.handle(route, options)
    }
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
