use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    /// Lossy UTF-8 view of at most `max_chars` characters of the body, for logs.
    pub fn body_snippet(&self, max_chars: usize) -> String {
        let text = String::from_utf8_lossy(&self.body);
        match text.char_indices().nth(max_chars) {
            Some((cut, _)) => format!("{}…", &text[..cut]),
            None => text.into_owned(),
        }
    }

    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: http::Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(http::Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: Bytes) -> Self {
        Self::new(http::Method::POST, url).with_body(body)
    }

    pub fn put(url: impl Into<String>, body: Bytes) -> Self {
        Self::new(http::Method::PUT, url).with_body(body)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(http::Method::DELETE, url)
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Serializes `value` as the body. Does not set `Content-Type`.
    pub fn with_json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(self.with_body(Bytes::from(body)))
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_set_method_body_and_headers() {
        let req = HttpRequest::put("http://localhost/items/1", Bytes::from_static(b"{}"))
            .with_header("content-type", "application/json")
            .with_timeout(Duration::from_secs(1));
        assert_eq!(req.method, http::Method::PUT);
        assert_eq!(req.body.as_ref(), b"{}");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.timeout, Some(Duration::from_secs(1)));

        let del = HttpRequest::delete("http://localhost/items/1");
        assert_eq!(del.method, http::Method::DELETE);
        assert!(del.body.is_empty());
    }

    #[test]
    fn with_json_encodes_body() {
        let req = HttpRequest::post("http://localhost/items", Bytes::new())
            .with_json(&serde_json::json!({ "name": "item", "value": 100 }))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(req.body.as_ref(), br#"{"name":"item","value":100}"#);
    }

    #[test]
    fn body_snippet_truncates_on_char_boundary() {
        let res = HttpResponse {
            status: 500,
            body: Bytes::from("héllo world"),
        };
        assert_eq!(res.body_snippet(2), "hé…");
        assert_eq!(res.body_snippet(100), "héllo world");
        assert!(res.json().is_none());
    }
}
