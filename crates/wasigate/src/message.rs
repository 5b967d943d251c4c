//! Structured request and response values exchanged with the adapter.
//!
//! Both types are immutable once built. Requests are assembled through
//! [`RequestBuilder`]; responses come out of the codec.

use serde::{Deserialize, Serialize};

/// Ordered header list.
///
/// Duplicates are allowed and insertion order is preserved, since the wire
/// format renders headers exactly as they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Create an empty header list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping any existing entries with the same key
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// First value for `key`, compared ASCII case-insensitively
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `key` in insertion order
    pub fn get_all<'a, 'k>(&'a self, key: &'k str) -> impl Iterator<Item = &'a str> + 'k
    where
        'a: 'k,
    {
        self.0
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over `(key, value)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries, duplicates included
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// An inbound request to be carried across the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: String,
    path: String,
    query: String,
    headers: Headers,
    body: Vec<u8>,
}

impl Request {
    /// Start building a request
    pub fn builder(method: impl Into<String>, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            inner: Request {
                method: method.into(),
                path: path.into(),
                query: String::new(),
                headers: Headers::new(),
                body: Vec::new(),
            },
        }
    }

    /// Request method token, e.g. `GET`
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path, e.g. `/foo`
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw search component including its leading `?`, or empty
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Request headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Request body
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Consuming builder for [`Request`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    inner: Request,
}

impl RequestBuilder {
    /// Builder: set the raw search component (`?a=1`)
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.inner.query = query.into();
        self
    }

    /// Builder: append a header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.headers.append(key, value);
        self
    }

    /// Builder: replace all headers
    pub fn headers(mut self, headers: Headers) -> Self {
        self.inner.headers = headers;
        self
    }

    /// Builder: set the body
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.inner.body = body.into();
        self
    }

    /// Finish the request
    pub fn build(self) -> Request {
        self.inner
    }
}

/// A response decoded from guest output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    status_text: String,
    headers: Headers,
    body: Vec<u8>,
}

impl Response {
    /// Status used when the guest reply cannot be decoded
    pub const BAD_GATEWAY: u16 = 502;

    pub(crate) fn new(status: u16, status_text: String, headers: Headers, body: Vec<u8>) -> Self {
        Self {
            status,
            status_text,
            headers,
            body,
        }
    }

    /// The fallback for a malformed boundary reply: `502 Bad Gateway`, no
    /// headers, the undecoded bytes as body.
    pub fn bad_gateway(raw: Vec<u8>) -> Self {
        Self::new(
            Self::BAD_GATEWAY,
            "Bad Gateway".to_string(),
            Headers::new(),
            raw,
        )
    }

    /// Numeric status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Status text exactly as it appeared on the status line
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Response headers in wire order
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Response body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Take ownership of the body
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_keep_duplicates_in_order() {
        let mut headers = Headers::new();
        headers.append("Set-Cookie", "a=1");
        headers.append("X-Other", "x");
        headers.append("set-cookie", "b=2");

        assert_eq!(headers.len(), 3);
        assert_eq!(headers.get("SET-COOKIE"), Some("a=1"));
        let all: Vec<&str> = headers.get_all("set-cookie").collect();
        assert_eq!(all, vec!["a=1", "b=2"]);
        assert_eq!(headers.get("missing"), None);
    }

    #[test]
    fn test_header_value_outlives_lookup_key() {
        let headers: Headers = [("Content-Type", "text/plain")].into_iter().collect();
        let value = {
            let key = String::from("content-type");
            headers.get(&key)
        };
        assert_eq!(value, Some("text/plain"));

        let first = {
            let key = String::from("CONTENT-TYPE");
            let first = headers.get_all(&key).next();
            first
        };
        assert_eq!(first, Some("text/plain"));
    }

    #[test]
    fn test_into_body_moves_bytes_out() {
        let resp = Response::bad_gateway(b"raw reply".to_vec());
        assert_eq!(resp.into_body(), b"raw reply".to_vec());
    }

    #[test]
    fn test_request_builder() {
        let req = Request::builder("POST", "/submit")
            .query("?id=7")
            .header("Content-Type", "text/plain")
            .body("hi")
            .build();

        assert_eq!(req.method(), "POST");
        assert_eq!(req.path(), "/submit");
        assert_eq!(req.query(), "?id=7");
        assert_eq!(req.headers().get("content-type"), Some("text/plain"));
        assert_eq!(req.body(), b"hi");
    }

    #[test]
    fn test_bad_gateway_fallback() {
        let resp = Response::bad_gateway(b"garbage".to_vec());
        assert_eq!(resp.status(), 502);
        assert_eq!(resp.status_text(), "Bad Gateway");
        assert!(resp.headers().is_empty());
        assert_eq!(resp.body(), b"garbage");
    }
}
