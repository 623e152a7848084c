//! Request envelope and its case-insensitive header/query maps.

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP methods the gateway accepts.
pub const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

// ---------------------------------------------------------------------------
// CaseInsensitiveMap
// ---------------------------------------------------------------------------

/// A string-to-string mapping with case-insensitive keys and last-writer-wins
/// semantics on duplicate inserts, while preserving the original casing of
/// whichever key last won — so it can be echoed verbatim when forwarding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseInsensitiveMap {
    entries: Vec<(String, String)>,
}

impl CaseInsensitiveMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key-value pair. If a key already exists (case-insensitively),
    /// it is replaced — both its value and its casing — by this call.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        let lower = key.to_ascii_lowercase();
        if let Some(slot) = self
            .entries
            .iter_mut()
            .find(|(k, _)| k.to_ascii_lowercase() == lower)
        {
            *slot = (key, value);
        } else {
            self.entries.push((key, value));
        }
    }

    /// Case-insensitive lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        let lower = key.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| k.to_ascii_lowercase() == lower)
            .map(|(_, v)| v.as_str())
    }

    /// Case-insensitive membership check.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterate entries in insertion (last-write) order, original casing intact.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of distinct (case-insensitive) keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for CaseInsensitiveMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl Serialize for CaseInsensitiveMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CaseInsensitiveMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MapVisitor;

        impl<'de> Visitor<'de> for MapVisitor {
            type Value = CaseInsensitiveMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string-to-string map")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut out = CaseInsensitiveMap::new();
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    out.insert(k, v);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(MapVisitor)
    }
}

// ---------------------------------------------------------------------------
// RequestEnvelope
// ---------------------------------------------------------------------------

/// The gateway's internal request representation, immutable after
/// construction. Built exclusively through [`RequestEnvelopeBuilder`].
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    request_id: String,
    correlation_id: Option<String>,
    method: String,
    path: String,
    query: CaseInsensitiveMap,
    headers: CaseInsensitiveMap,
    body: Option<String>,
}

impl RequestEnvelope {
    /// Non-empty opaque request identifier.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Opaque cross-service correlation identifier, echoed unchanged.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Uppercased HTTP method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// URL-decoded path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query parameters.
    pub fn query(&self) -> &CaseInsensitiveMap {
        &self.query
    }

    /// Request headers.
    pub fn headers(&self) -> &CaseInsensitiveMap {
        &self.headers
    }

    /// The request body, if one was read.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Length of the body in bytes, or 0 if absent.
    pub fn body_len(&self) -> usize {
        self.body.as_deref().map_or(0, str::len)
    }
}

/// Builder for [`RequestEnvelope`], the only way to construct one.
#[derive(Debug, Clone)]
pub struct RequestEnvelopeBuilder {
    request_id: String,
    correlation_id: Option<String>,
    method: String,
    path: String,
    query: CaseInsensitiveMap,
    headers: CaseInsensitiveMap,
    body: Option<String>,
}

impl RequestEnvelopeBuilder {
    /// Start building an envelope. `request_id` should already be generated
    /// or taken from an inbound header by the caller; `method` is uppercased
    /// here.
    pub fn new(request_id: impl Into<String>, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            correlation_id: None,
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            query: CaseInsensitiveMap::new(),
            headers: CaseInsensitiveMap::new(),
            body: None,
        }
    }

    /// Set the correlation id.
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Add a query parameter (last write for a given key wins).
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key, value);
        self
    }

    /// Add a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Set the body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Finish construction.
    pub fn build(self) -> RequestEnvelope {
        RequestEnvelope {
            request_id: self.request_id,
            correlation_id: self.correlation_id,
            method: self.method,
            path: self.path,
            query: self.query,
            headers: self.headers,
            body: self.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_map_lookup_ignores_case() {
        let mut m = CaseInsensitiveMap::new();
        m.insert("X-Forward-Base", "http://example.com");
        assert_eq!(m.get("x-forward-base"), Some("http://example.com"));
        assert_eq!(m.get("X-FORWARD-BASE"), Some("http://example.com"));
    }

    #[test]
    fn case_insensitive_map_last_writer_wins() {
        let mut m = CaseInsensitiveMap::new();
        m.insert("a", "first");
        m.insert("A", "second");
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("a"), Some("second"));
    }

    #[test]
    fn case_insensitive_map_preserves_last_casing() {
        let mut m = CaseInsensitiveMap::new();
        m.insert("content-type", "text/plain");
        m.insert("Content-Type", "application/json");
        let (k, v) = m.iter().next().unwrap();
        assert_eq!(k, "Content-Type");
        assert_eq!(v, "application/json");
    }

    #[test]
    fn case_insensitive_map_serde_roundtrip() {
        let mut m = CaseInsensitiveMap::new();
        m.insert("X-Request-Id", "abc-123");
        m.insert("X-Correlation-Id", "corr-1");
        let json = serde_json::to_string(&m).unwrap();
        let back: CaseInsensitiveMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get("x-request-id"), Some("abc-123"));
        assert_eq!(back.get("x-correlation-id"), Some("corr-1"));
    }

    #[test]
    fn builder_uppercases_method() {
        let env = RequestEnvelopeBuilder::new("rid-1", "post", "/x").build();
        assert_eq!(env.method(), "POST");
    }

    #[test]
    fn builder_defaults_are_empty() {
        let env = RequestEnvelopeBuilder::new("rid-1", "GET", "/").build();
        assert!(env.correlation_id().is_none());
        assert!(env.body().is_none());
        assert_eq!(env.body_len(), 0);
        assert!(env.headers().is_empty());
        assert!(env.query().is_empty());
    }

    #[test]
    fn builder_sets_all_fields() {
        let env = RequestEnvelopeBuilder::new("rid-1", "GET", "/api/x")
            .correlation_id("corr-1")
            .query("q", "1")
            .header("X-Executor-Type", "http")
            .body("{}")
            .build();
        assert_eq!(env.request_id(), "rid-1");
        assert_eq!(env.correlation_id(), Some("corr-1"));
        assert_eq!(env.path(), "/api/x");
        assert_eq!(env.query().get("q"), Some("1"));
        assert_eq!(env.headers().get("x-executor-type"), Some("http"));
        assert_eq!(env.body(), Some("{}"));
        assert_eq!(env.body_len(), 2);
    }

    #[test]
    fn allowed_methods_contains_expected_set() {
        for m in ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"] {
            assert!(ALLOWED_METHODS.contains(&m));
        }
        assert!(!ALLOWED_METHODS.contains(&"TRACE"));
    }
}
