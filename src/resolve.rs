use std::fmt;

use serde_json::Value as JsonValue;
use url::Url;

use crate::{FetchError, Headers, Payload, RequestOptions, Result};

/// `METHOD /path` pair a call is made against.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Route {
    method: String,
    path: String,
}

impl Route {
    /// Creates a route. The method is upper-cased.
    pub fn new(method: &str, path: impl Into<String>) -> Self {
        Self {
            method: method.trim().to_ascii_uppercase(),
            path: path.into(),
        }
    }

    /// Parses `"POST /items"`. Without a method token the route is a `GET`.
    pub fn parse(route: &str) -> Self {
        let route = route.trim();
        match route.split_once(char::is_whitespace) {
            Some((method, path)) if is_method_token(method) => Self::new(method, path.trim()),
            _ if is_method_token(route) => Self::new(route, "/"),
            _ => Self::new("GET", route),
        }
    }

    /// Upper-case HTTP method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path template, including any `:name` placeholders.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether repeating the call is assumed safe.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self.method.as_str(),
            "GET" | "HEAD" | "PUT" | "DELETE" | "OPTIONS" | "TRACE"
        )
    }
}

impl From<&str> for Route {
    fn from(route: &str) -> Self {
        Self::parse(route)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

fn is_method_token(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|byte| byte.is_ascii_alphabetic())
}

/// Output of [`EndpointResolver::resolve`].
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedRequest {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
}

/// Turns a route plus options into method, URL, headers and body.
#[derive(Clone, Debug)]
pub struct EndpointResolver {
    base_url: Url,
}

impl EndpointResolver {
    /// Parses `base_url`. A trailing slash is added so routes join under it.
    ///
    /// Returns [`FetchError::Config`] for an unparsable URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url.trim())
            .map_err(|err| FetchError::Config(format!("invalid base url '{base_url}': {err}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { base_url })
    }

    /// Normalized base URL.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Builds the concrete request for `route`.
    ///
    /// Fails with [`FetchError::InvalidRequest`] when a path parameter is missing
    /// or the body cannot be encoded.
    pub fn resolve(&self, route: &Route, options: &RequestOptions) -> Result<ResolvedRequest> {
        let path = expand_path(route.path(), options)?;
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| FetchError::InvalidRequest(format!("invalid path '{path}': {err}")))?;

        if let Some(query) = options.query.as_deref().filter(|query| !query.is_empty()) {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                match value {
                    JsonValue::Null => {}
                    JsonValue::Array(items) => {
                        for item in items {
                            pairs.append_pair(key, &json_to_text(item));
                        }
                    }
                    other => {
                        pairs.append_pair(key, &json_to_text(other));
                    }
                }
            }
        }

        let mut headers = options.headers.clone();
        let body = match &options.payload {
            Some(Payload::Json(value)) => {
                let encoded = serde_json::to_vec(&**value).map_err(|err| {
                    FetchError::InvalidRequest(format!("body is not serializable: {err}"))
                })?;
                if !headers.contains("content-type") {
                    headers.insert("content-type", "application/json");
                }
                Some(encoded)
            }
            Some(Payload::Data(data)) => Some(data.to_vec()),
            None => None,
        };

        Ok(ResolvedRequest {
            method: route.method().to_owned(),
            url: url.into(),
            headers,
            body,
        })
    }
}

fn expand_path(path: &str, options: &RequestOptions) -> Result<String> {
    let segments: Result<Vec<String>> = path
        .split('/')
        .map(|segment| {
            let name = segment
                .strip_prefix(':')
                .or_else(|| segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')));
            match name {
                Some(name) if !name.is_empty() => {
                    let value = options
                        .params
                        .as_deref()
                        .and_then(|params| params.get(name))
                        .filter(|value| !value.is_null())
                        .ok_or_else(|| {
                            FetchError::InvalidRequest(format!("missing path param '{name}'"))
                        })?;
                    Ok(encode_segment(&json_to_text(value)))
                }
                _ => Ok(segment.to_owned()),
            }
        })
        .collect();
    Ok(segments?.join("/"))
}

fn json_to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
