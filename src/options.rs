use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::{AbortSignal, FetchError, Headers, Result, RetrySpec, Transport};

/// JSON object used for `query` and `params`.
pub type JsonMap = Map<String, JsonValue>;

/// Request payload. JSON bodies are encoded by the resolver, raw data is
/// sent untouched.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Json(Arc<JsonValue>),
    Data(Arc<Vec<u8>>),
}

/// Per-call request options threaded through every layer.
///
/// Values are never mutated once merged: [`RequestOptions::merge`] returns a
/// new value that shares unchanged `query`, `params` and payload
/// substructure with its inputs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestOptions {
    pub headers: Headers,
    pub query: Option<Arc<JsonMap>>,
    pub params: Option<Arc<JsonMap>>,
    pub payload: Option<Payload>,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    pub signal: Option<AbortSignal>,
    /// Retry schedule override for this call.
    pub retries: Option<RetrySpec>,
}

impl RequestOptions {
    /// Empty options. Every field falls through to the bound defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header, replacing any value this call already set.
    ///
    /// Pass an array or `Vec` to send several values under one name.
    pub fn header(mut self, name: &str, value: impl Into<crate::HeaderValue>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Adds a query parameter. Array values repeat the key and `null` is skipped.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Arc::make_mut(self.query.get_or_insert_with(Default::default))
            .insert(key.into(), value.into());
        self
    }

    /// Sets the value substituted for `:key` or `{key}` in the route path.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Arc::make_mut(self.params.get_or_insert_with(Default::default))
            .insert(key.into(), value.into());
        self
    }

    /// Sets a JSON body, replacing any raw data.
    pub fn json(mut self, body: JsonValue) -> Self {
        self.payload = Some(Payload::Json(Arc::new(body)));
        self
    }

    /// Sets a raw body that bypasses JSON encoding, replacing any JSON body.
    pub fn data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(Payload::Data(Arc::new(data.into())));
        self
    }

    /// Per-call timeout in milliseconds. A deadline may shorten it.
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Abort signal observed by every layer and the transport.
    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Overrides the retry schedule for this call only.
    pub fn retries(mut self, retries: impl Into<RetrySpec>) -> Self {
        self.retries = Some(retries.into());
        self
    }

    /// Right-biased merge of `next` over `self`.
    ///
    /// Absent fields in `next` never override `self`. JSON objects are merged
    /// key by key; arrays and scalars are replaced. Headers follow
    /// [`Headers::merge`].
    pub fn merge(&self, next: &RequestOptions) -> RequestOptions {
        RequestOptions {
            headers: self.headers.merge(&next.headers),
            query: merge_maps(&self.query, &next.query),
            params: merge_maps(&self.params, &next.params),
            payload: merge_payload(&self.payload, &next.payload),
            timeout_ms: next.timeout_ms.or(self.timeout_ms),
            signal: next.signal.clone().or_else(|| self.signal.clone()),
            retries: next.retries.clone().or_else(|| self.retries.clone()),
        }
    }

    /// Adds a header only when the caller did not already supply it.
    pub(crate) fn with_default_header(mut self, name: &str, value: String) -> Self {
        if !self.headers.contains(name) {
            self.headers.insert(name, value);
        }
        self
    }
}

/// Right-biased merge, see [`RequestOptions::merge`].
pub fn merge(base: &RequestOptions, next: &RequestOptions) -> RequestOptions {
    base.merge(next)
}

fn merge_maps(base: &Option<Arc<JsonMap>>, next: &Option<Arc<JsonMap>>) -> Option<Arc<JsonMap>> {
    match (base, next) {
        (Some(base), Some(next)) if next.is_empty() => Some(Arc::clone(base)),
        (Some(base), Some(next)) => Some(Arc::new(deep_merge(base, next))),
        (base, None) => base.clone(),
        (None, next) => next.clone(),
    }
}

fn deep_merge(base: &JsonMap, next: &JsonMap) -> JsonMap {
    let mut merged = base.clone();
    for (key, value) in next {
        let combined = match (merged.get(key), value) {
            (Some(JsonValue::Object(existing)), JsonValue::Object(incoming)) => {
                JsonValue::Object(deep_merge(existing, incoming))
            }
            _ => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }
    merged
}

fn merge_payload(base: &Option<Payload>, next: &Option<Payload>) -> Option<Payload> {
    match (base, next) {
        (Some(Payload::Json(base)), Some(Payload::Json(next))) => match (&**base, &**next) {
            (JsonValue::Object(existing), JsonValue::Object(incoming)) => Some(Payload::Json(
                Arc::new(JsonValue::Object(deep_merge(existing, incoming))),
            )),
            _ => Some(Payload::Json(Arc::clone(next))),
        },
        (base, None) => base.clone(),
        (_, next) => next.clone(),
    }
}

/// Bind-scoped defaults with lower precedence than [`RequestOptions`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub headers: Headers,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<RetrySpec>,
}

impl HttpConfig {
    /// Layers `next` over `self`: scalars from `next` win, headers merge.
    pub fn merge(&self, next: &HttpConfig) -> HttpConfig {
        HttpConfig {
            headers: self.headers.merge(&next.headers),
            timeout_ms: next.timeout_ms.or(self.timeout_ms),
            retries: next.retries.clone().or_else(|| self.retries.clone()),
        }
    }

    /// Applies these defaults underneath per-call options.
    pub fn apply_to(&self, options: RequestOptions) -> RequestOptions {
        RequestOptions {
            headers: self.headers.merge(&options.headers),
            timeout_ms: options.timeout_ms.or(self.timeout_ms),
            retries: options.retries.or_else(|| self.retries.clone()),
            ..options
        }
    }
}

/// Client construction options.
#[derive(Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub config: HttpConfig,
    pub transport: Option<Arc<dyn Transport>>,
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("base_url", &self.base_url)
            .field("config", &self.config)
            .field("transport", &self.transport.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

impl ClientOptions {
    /// Options for `base_url` with empty config and the default transport.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            config: HttpConfig::default(),
            transport: None,
        }
    }

    /// Construction-level defaults, the lowest precedence tier.
    pub fn config(mut self, config: HttpConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default reqwest transport.
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Builds options from environment variables.
    ///
    /// Reads:
    /// - `FETCH_POLICY_BASE_URL`: base URL every route is joined to
    /// - `FETCH_POLICY_TIMEOUT_MS`: optional default timeout
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("FETCH_POLICY_BASE_URL").map_err(|_| {
            FetchError::Config("missing FETCH_POLICY_BASE_URL environment variable".to_owned())
        })?;
        if base_url.trim().is_empty() {
            return Err(FetchError::Config(
                "FETCH_POLICY_BASE_URL is set but empty".to_owned(),
            ));
        }
        let mut config = HttpConfig::default();
        if let Ok(raw) = std::env::var("FETCH_POLICY_TIMEOUT_MS") {
            let timeout_ms = raw.trim().parse::<u64>().map_err(|_| {
                FetchError::Config(format!("FETCH_POLICY_TIMEOUT_MS is not a number: {raw}"))
            })?;
            config.timeout_ms = Some(timeout_ms);
        }
        Ok(Self::new(base_url).config(config))
    }
}
