use std::fmt;
use std::str::FromStr;

use crate::error::NfError;

/// The HTTP methods this pipeline understands.
///
/// HTTP/1.1 permits arbitrary extension tokens, but every layer above the
/// transport (cache eligibility, coalescing, fingerprinting) only needs to
/// reason about this fixed set, matching the method list the request model
/// exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Head,
    Delete,
    Options,
    Connect,
}

impl Method {
    /// The wire representation, e.g. `"GET"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Head => "HEAD",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Connect => "CONNECT",
        }
    }

    /// Methods the cache treats as mutating and therefore never serves from cache.
    pub fn is_unsafe_for_cache(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = NfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // RFC 7230 token validation happens before any I/O; we only accept the
        // closed set of methods this client understands.
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "HEAD" => Ok(Method::Head),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            "CONNECT" => Ok(Method::Connect),
            other => Err(NfError::InvalidRequest(format!(
                "unsupported method: {other}"
            ))),
        }
    }
}
