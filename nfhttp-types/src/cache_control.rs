use crate::headers::HeaderMap;

/// Parsed `Cache-Control` request directives, per RFC 7234 §5.2.1.
///
/// Integer fields default to zero when the directive is absent, matching the
/// aggregate-initialized struct the original request model returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestCacheControl {
    pub max_age: i64,
    pub max_stale: i64,
    pub min_fresh: i64,
    pub no_cache: bool,
    pub no_store: bool,
    pub no_transform: bool,
    pub only_if_cached: bool,
}

/// Parsed `Cache-Control` response directives, per RFC 7234 §5.2.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponseCacheControl {
    pub must_revalidate: bool,
    pub no_cache: bool,
    pub no_store: bool,
    pub no_transform: bool,
    pub public: bool,
    pub private: bool,
    pub proxy_revalidate: bool,
    pub max_age: i64,
    pub s_maxage: i64,
}

fn directives(raw: &str) -> impl Iterator<Item = (&str, Option<&str>)> {
    raw.split(',').filter_map(|part| {
        let part = part.trim();
        if part.is_empty() {
            return None;
        }
        match part.split_once('=') {
            Some((name, value)) => {
                Some((name.trim(), Some(value.trim().trim_matches('"'))))
            }
            None => Some((part, None)),
        }
    })
}

fn parse_i64(value: Option<&str>) -> i64 {
    value.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0)
}

pub(crate) fn parse_request_cache_control(headers: &HeaderMap) -> RequestCacheControl {
    let Some(raw) = headers.get("cache-control") else {
        return RequestCacheControl::default();
    };
    let mut cc = RequestCacheControl::default();
    for (name, value) in directives(raw) {
        match name.to_ascii_lowercase().as_str() {
            "max-age" => cc.max_age = parse_i64(value),
            "max-stale" => cc.max_stale = parse_i64(value),
            "min-fresh" => cc.min_fresh = parse_i64(value),
            "no-cache" => cc.no_cache = true,
            "no-store" => cc.no_store = true,
            "no-transform" => cc.no_transform = true,
            "only-if-cached" => cc.only_if_cached = true,
            _ => {}
        }
    }
    cc
}

pub(crate) fn parse_response_cache_control(headers: &HeaderMap) -> ResponseCacheControl {
    let Some(raw) = headers.get("cache-control") else {
        return ResponseCacheControl::default();
    };
    let mut cc = ResponseCacheControl::default();
    for (name, value) in directives(raw) {
        match name.to_ascii_lowercase().as_str() {
            "must-revalidate" => cc.must_revalidate = true,
            "no-cache" => cc.no_cache = true,
            "no-store" => cc.no_store = true,
            "no-transform" => cc.no_transform = true,
            "public" => cc.public = true,
            "private" => cc.private = true,
            "proxy-revalidate" => cc.proxy_revalidate = true,
            "max-age" => cc.max_age = parse_i64(value),
            "s-maxage" => cc.s_maxage = parse_i64(value),
            _ => {}
        }
    }
    cc
}

/// Parses the `Vary` header into the set of header names it lists, used to
/// extend the fingerprint's secondary key per RFC 7234 §4.1.
pub(crate) fn parse_vary(headers: &HeaderMap) -> Vec<String> {
    match headers.get("vary") {
        Some(raw) => raw
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        None => Vec::new(),
    }
}
