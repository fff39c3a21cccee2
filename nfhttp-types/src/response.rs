use std::collections::HashMap;

use serde::Serialize;

use crate::cache_control::{self, ResponseCacheControl};
use crate::error::Result;
use crate::headers::HeaderMap;
use crate::request::Request;

/// The synthetic status used for responses that never reached the wire,
/// e.g. a cancellation resolved before dispatch. Named `Invalid` in the
/// source status table.
pub const STATUS_INVALID: u16 = 0;

/// An HTTP response, carrying the request that produced it plus whatever
/// metadata inner layers annotated it with (`"cached"`, `"multicasted"`, ...).
#[derive(Debug, Clone)]
pub struct Response {
    request: Request,
    status: u16,
    cancelled: bool,
    headers: HeaderMap,
    body: Vec<u8>,
    metadata: HashMap<String, String>,
}

impl Response {
    pub fn new(request: Request, status: u16, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self { request, status, cancelled: false, headers, body, metadata: HashMap::new() }
    }

    /// A synthetic response for a request cancelled before dispatch, per the
    /// "callback exactly once" invariant: status `Invalid`, `cancelled=true`,
    /// empty body.
    pub fn cancelled(request: Request) -> Self {
        Self {
            request,
            status: STATUS_INVALID,
            cancelled: true,
            headers: HeaderMap::new(),
            body: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// A synthetic response for a request that failed before (or instead
    /// of) producing a real status line: status `Invalid`, with the error
    /// description recorded under the `"error"` metadata key so callers
    /// inspecting only `Response` can still see what went wrong.
    pub fn error(request: Request, err: &crate::error::NfError) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("error".to_string(), err.to_string());
        Self {
            request,
            status: STATUS_INVALID,
            cancelled: false,
            headers: HeaderMap::new(),
            body: Vec::new(),
            metadata,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn is_2xx(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether this status is one the cache is permitted to persist, per
    /// the lookup algorithm's "2xx" set.
    pub fn is_cacheable_status(&self) -> bool {
        matches!(self.status, 200..=206)
    }

    pub fn cache_control(&self) -> ResponseCacheControl {
        cache_control::parse_response_cache_control(&self.headers)
    }

    /// JSON serialization of `{status_code, request, headers}`. The body is
    /// persisted separately (see the cache's payload blob).
    pub fn serialize(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Wire<'a> {
            status_code: u16,
            request: serde_json::Value,
            headers: std::collections::BTreeMap<&'a str, &'a str>,
        }
        let request = serde_json::from_str(&self.request.serialize()?)?;
        let headers = self.headers.iter().collect();
        let wire = Wire { status_code: self.status, request, headers };
        Ok(serde_json::to_string(&wire)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;

    fn req() -> Request {
        Request::new("http://example.invalid/a", Method::Get).unwrap()
    }

    #[test]
    fn cancelled_response_has_invalid_status_and_empty_body() {
        let resp = Response::cancelled(req());
        assert_eq!(resp.status(), STATUS_INVALID);
        assert!(resp.is_cancelled());
        assert!(resp.body().is_empty());
    }

    #[test]
    fn error_response_carries_message_in_metadata() {
        let resp = Response::error(req(), &crate::error::NfError::TimedOut);
        assert_eq!(resp.status(), STATUS_INVALID);
        assert!(!resp.is_cancelled());
        assert!(resp.metadata().get("error").is_some());
    }

    #[test]
    fn serialize_round_trips_status_and_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("ETag", "\"v1\"");
        let resp = Response::new(req(), 200, headers, b"X".to_vec());
        let json: serde_json::Value = serde_json::from_str(&resp.serialize().unwrap()).unwrap();
        assert_eq!(json["status_code"], 200);
        assert_eq!(json["headers"]["ETag"], "\"v1\"");
    }
}
