use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Header that always accumulates values instead of overwriting them.
pub const SET_COOKIE: &str = "set-cookie";

/// A single header value or an ordered list of values.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    Multi(Vec<String>),
}

impl HeaderValue {
    /// Iterates the values in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            Self::Single(value) => std::slice::from_ref(value),
            Self::Multi(values) => values,
        };
        values.iter().map(String::as_str)
    }

    /// First value, or the only one.
    pub fn first(&self) -> Option<&str> {
        self.iter().next()
    }

    fn is_multi(&self) -> bool {
        matches!(self, Self::Multi(_))
    }

    fn concat(&self, next: &HeaderValue) -> HeaderValue {
        HeaderValue::Multi(self.iter().chain(next.iter()).map(str::to_owned).collect())
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multi(values)
    }
}

impl<const N: usize> From<[&str; N]> for HeaderValue {
    fn from(values: [&str; N]) -> Self {
        Self::Multi(values.iter().map(|value| (*value).to_owned()).collect())
    }
}

/// Header map keyed by lowercase name.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "JsonValue", into = "BTreeMap<String, HeaderValue>")]
pub struct Headers {
    entries: BTreeMap<String, HeaderValue>,
}

impl Headers {
    /// Creates an empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes an arbitrary JSON value into headers.
    ///
    /// Anything other than an object yields an empty set. String values are
    /// kept, arrays keep their string-like members, numbers and booleans are
    /// stringified, and `null` entries are dropped.
    pub fn from_json(value: &JsonValue) -> Self {
        let mut headers = Self::new();
        let JsonValue::Object(map) = value else {
            return headers;
        };
        for (name, value) in map {
            let value = match value {
                JsonValue::Array(items) => {
                    HeaderValue::Multi(items.iter().filter_map(json_scalar_to_string).collect())
                }
                other => match json_scalar_to_string(other) {
                    Some(value) => HeaderValue::Single(value),
                    None => continue,
                },
            };
            headers.merge_entry(name, value);
        }
        headers
    }

    /// Sets a header, replacing any existing value.
    pub fn insert(&mut self, name: &str, value: impl Into<HeaderValue>) {
        self.entries.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Adds a value, keeping the ones already present.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        let value = HeaderValue::Single(value.into());
        let merged = match self.entries.get(&name) {
            Some(existing) => existing.concat(&value),
            None => value,
        };
        self.entries.insert(name, merged);
    }

    /// Looks up `name` case-insensitively.
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries.get(&name.to_ascii_lowercase())
    }

    /// First value of a header.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(HeaderValue::first)
    }

    /// Returns `true` when `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Removes `name` and returns its value.
    pub fn remove(&mut self, name: &str) -> Option<HeaderValue> {
        self.entries.remove(&name.to_ascii_lowercase())
    }

    /// Iterates in name order. Names are lowercase.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merges `next` over `self` into a freshly built map.
    ///
    /// Scalar values in `next` replace those in `self`. When either side is
    /// a list, or the header is `set-cookie`, values are concatenated with
    /// `self`'s first.
    pub fn merge(&self, next: &Headers) -> Headers {
        let mut merged = self.clone();
        for (name, value) in &next.entries {
            merged.merge_entry(name, value.clone());
        }
        merged
    }

    fn merge_entry(&mut self, name: &str, value: HeaderValue) {
        let name = name.to_ascii_lowercase();
        let merged = match self.entries.get(&name) {
            Some(existing) if accumulates(&name, existing, &value) => existing.concat(&value),
            _ => value,
        };
        self.entries.insert(name, merged);
    }
}

fn accumulates(name: &str, base: &HeaderValue, next: &HeaderValue) -> bool {
    name == SET_COOKIE || base.is_multi() || next.is_multi()
}

fn json_scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(value) => Some(value.clone()),
        JsonValue::Number(value) => Some(value.to_string()),
        JsonValue::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}

impl From<JsonValue> for Headers {
    fn from(value: JsonValue) -> Self {
        Self::from_json(&value)
    }
}

impl From<Headers> for BTreeMap<String, HeaderValue> {
    fn from(headers: Headers) -> Self {
        headers.entries
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: AsRef<str>,
    V: Into<HeaderValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.merge_entry(name.as_ref(), value.into());
        }
        headers
    }
}
