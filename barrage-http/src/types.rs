use std::time::Duration;

use bytes::Bytes;
use http::Method;

use crate::Result;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            timeout: None,
        }
    }

    /// Parses `method` case-insensitively (`post`, `GET`, ...).
    pub fn parse(method: &str, url: impl Into<String>) -> Result<Self> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())?;
        Ok(Self::new(method, url))
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
    /// Lowercased header names; repeated headers are joined with ", ".
    pub headers: Vec<(String, String)>,
    /// Estimated HTTP/1.1 bytes on the wire for the request.
    pub bytes_sent: u64,
    /// Estimated HTTP/1.1 bytes on the wire for the response.
    pub bytes_received: u64,
    /// From sending the request until the body was fully read.
    pub duration: Duration,
}

impl HttpResponse {
    pub fn body_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_lowercase_methods() {
        let req = HttpRequest::parse("post", "http://localhost/").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(req.method, Method::POST);
        assert!(HttpRequest::parse("NOT A METHOD", "http://localhost/").is_err());
    }

    #[test]
    fn builders_compose() {
        let req = HttpRequest::post("http://localhost/rpc", "{}")
            .with_header("content-type", "application/json")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(req.body, Bytes::from_static(b"{}"));
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn response_header_lookup_is_case_insensitive() {
        let res = HttpResponse {
            status: 204,
            body: Bytes::new(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            bytes_sent: 0,
            bytes_received: 0,
            duration: Duration::ZERO,
        };
        assert_eq!(res.header("Content-Type"), Some("application/json"));
        assert!(res.is_success());
    }
}
