use serde::Serialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::cache_control::{self, RequestCacheControl};
use crate::error::{NfError, Result};
use crate::headers::HeaderMap;
use crate::method::Method;

/// An immutable-after-construction HTTP request.
///
/// Setting the body keeps `Content-Length` in sync, matching the source
/// model's `setData` contract. Builder methods consume and return `self` so
/// construction reads top-to-bottom; once built, callers share `Request`
/// values by cloning rather than mutating them in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    url: Url,
    method: Method,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl Request {
    /// Builds a request, validating the URL has an http/https scheme.
    pub fn new(url: &str, method: Method) -> Result<Self> {
        let parsed = Url::parse(url)?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(NfError::InvalidRequest(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }
        Ok(Self { url: parsed, method, headers: HeaderMap::new(), body: None })
    }

    /// Convenience constructor for a GET request.
    pub fn get(url: &str) -> Result<Self> {
        Self::new(url, Method::Get)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Sets a header, builder-style.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body and recomputes `Content-Length`.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.set_body(body);
        self
    }

    /// Sets the request body and recomputes `Content-Length` in place.
    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        let body = body.into();
        self.headers.insert("Content-Length", body.len().to_string());
        self.body = Some(body);
    }

    /// Parses the `Cache-Control` request directives.
    pub fn cache_control(&self) -> RequestCacheControl {
        cache_control::parse_request_cache_control(&self.headers)
    }

    /// The hexadecimal SHA-256 fingerprint used as cache key and coalesce key.
    ///
    /// Per RFC 7234 §4.1 secondary-key semantics, headers named in `Vary` are
    /// excluded so that two requests differing only in a varying header (but
    /// not in the header the origin actually varies on) still collide
    /// correctly once the cache has observed the `Vary` list; body bytes are
    /// included so that POST/PUT requests with different payloads never
    /// collide.
    pub fn fingerprint(&self) -> String {
        let vary = cache_control::parse_vary(&self.headers);
        let mut pairs: Vec<(&str, &str)> = self
            .headers
            .iter()
            .filter(|(name, _)| !vary.iter().any(|v| v.eq_ignore_ascii_case(name)))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.cmp(b.1)));

        let mut hasher = Sha256::new();
        hasher.update(self.url.as_str().as_bytes());
        for (name, value) in pairs {
            hasher.update(name.as_bytes());
            hasher.update(value.as_bytes());
        }
        if let Some(body) = &self.body {
            hasher.update(body);
        }
        hex::encode(hasher.finalize())
    }

    /// JSON serialization of the request's identity: `{url, headers, method}`.
    /// The body is omitted; the fingerprint already accounts for it.
    pub fn serialize(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Wire<'a> {
            url: &'a str,
            headers: std::collections::BTreeMap<&'a str, &'a str>,
            method: &'a str,
        }
        let headers = self.headers.iter().collect();
        let wire = Wire { url: self.url.as_str(), headers, method: self.method.as_str() };
        Ok(serde_json::to_string(&wire)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_order_independent() {
        let a = Request::get("http://example.invalid/a")
            .unwrap()
            .with_header("A", "1")
            .with_header("B", "2");
        let b = Request::get("http://example.invalid/a")
            .unwrap()
            .with_header("B", "2")
            .with_header("A", "1");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_excludes_vary_headers() {
        let base = Request::get("http://example.invalid/a")
            .unwrap()
            .with_header("Vary", "X-Lang");
        let with_vary_header = base.clone().with_header("X-Lang", "en");
        assert_eq!(base.fingerprint(), with_vary_header.fingerprint());
    }

    #[test]
    fn fingerprint_distinguishes_bodies() {
        let a = Request::new("http://example.invalid/a", Method::Post)
            .unwrap()
            .with_body(b"one".to_vec());
        let b = Request::new("http://example.invalid/a", Method::Post)
            .unwrap()
            .with_body(b"two".to_vec());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(Request::get("ftp://example.invalid/a").is_err());
    }

    #[test]
    fn set_body_updates_content_length() {
        let req = Request::get("http://example.invalid/a").unwrap().with_body(b"hello".to_vec());
        assert_eq!(req.headers().get("content-length"), Some("5"));
    }
}
