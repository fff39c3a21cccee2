#![forbid(unsafe_code)]
//! The cache layer: an RFC 7234-inspired store sitting between the caller
//! and an inner `Client`. Implements the lookup/store/revalidate algorithm
//! from the external interface, pinning, and threshold-triggered two-pass
//! eviction, persisted to a `.nfhttp` SQLite file plus payload blobs.

mod store;

pub use store::{now_epoch, CacheStore, StoredMeta};

use std::sync::Arc;

use nfhttp_types::{
    Callback, Client, HeaderMap, LabelsCallback, NfError, Request, RequestToken, Response,
    ResponsesCallback, Result,
};

/// Tunables for [`HttpCache`]. `max_bytes` is the threshold the external
/// interface calls out (reference value: 500 MiB).
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub max_bytes: i64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self { max_bytes: 500 * 1024 * 1024 }
    }
}

/// Wraps an inner `Client` with a persistent HTTP cache. Bypasses entirely
/// for unsafe methods and `no-cache`/`no-store` requests; otherwise serves
/// fresh entries directly, revalidates stale ones conditionally, and
/// stores cacheable 2xx responses as they arrive.
pub struct HttpCache {
    inner: Arc<dyn Client>,
    store: Arc<CacheStore>,
    options: CacheOptions,
}

impl HttpCache {
    pub fn new(inner: Arc<dyn Client>, store: Arc<CacheStore>, options: CacheOptions) -> Self {
        Self { inner, store, options }
    }
}

impl Client for HttpCache {
    fn perform(&self, request: Request, callback: Callback) -> RequestToken {
        let outer = RequestToken::new();
        let cc = request.cache_control();
        let bypasses = request.method().is_unsafe_for_cache() || cc.no_cache || cc.no_store;

        if bypasses {
            let inner_token = self.inner.perform(request, callback);
            let cancel_target = inner_token.clone();
            outer.set_on_cancel(move || cancel_target.cancel());
            return outer;
        }

        let store = self.store.clone();
        let inner = self.inner.clone();
        let options = self.options.clone();
        let fingerprint = request.fingerprint();
        let outer_handle = outer.clone();
        tokio::spawn(async move {
            lookup(store, inner, options, request, fingerprint, callback, outer_handle).await;
        });
        outer
    }

    fn pin(&self, response: &Response, label: &str) {
        let store = self.store.clone();
        let fingerprint = response.request().fingerprint();
        let label = label.to_string();
        tokio::spawn(async move {
            let _ = tokio::task::spawn_blocking(move || store.pin(&fingerprint, &label)).await;
        });
    }

    fn unpin(&self, response: &Response, label: &str) {
        let store = self.store.clone();
        let fingerprint = response.request().fingerprint();
        let label = label.to_string();
        tokio::spawn(async move {
            let _ = tokio::task::spawn_blocking(move || store.unpin(&fingerprint, &label)).await;
        });
    }

    fn remove_pinned(&self, label: &str) {
        let store = self.store.clone();
        let label = label.to_string();
        tokio::spawn(async move {
            let _ = tokio::task::spawn_blocking(move || store.remove_pinned(&label)).await;
        });
    }

    fn pinned_for(&self, label: &str, callback: ResponsesCallback) {
        let store = self.store.clone();
        let label = label.to_string();
        tokio::spawn(async move {
            let responses = tokio::task::spawn_blocking(move || materialize_pinned(&store, &label))
                .await
                .unwrap_or_default();
            callback(responses);
        });
    }

    fn pin_labels(&self, callback: LabelsCallback) {
        let store = self.store.clone();
        tokio::spawn(async move {
            let labels = tokio::task::spawn_blocking(move || store.pin_labels().unwrap_or_default())
                .await
                .unwrap_or_default();
            callback(labels);
        });
    }
}

fn materialize_pinned(store: &CacheStore, label: &str) -> Vec<Response> {
    let Ok(fingerprints) = store.pinned_for(label) else { return Vec::new() };
    let mut out = Vec::new();
    for fingerprint in fingerprints {
        let (Ok(Some(meta)), Ok(Some(body))) =
            (store.get_meta(&fingerprint), store.read_payload(&fingerprint))
        else {
            continue;
        };
        if let Some(response) = decode_stored(&meta, body, true) {
            out.push(response);
        }
    }
    out
}

/// Parses the `{status, headers}` JSON blob and reconstructs a `Response`
/// against a placeholder request; callers that have the real request
/// available should prefer constructing from it directly (see `lookup`).
fn decode_stored(meta: &StoredMeta, body: Vec<u8>, cached: bool) -> Option<Response> {
    let value: serde_json::Value = serde_json::from_str(&meta.response_metadata).ok()?;
    let status = value.get("status")?.as_u64()? as u16;
    let headers = headers_from_json(value.get("headers")?);
    let placeholder = Request::get("http://cache.invalid/pinned").ok()?;
    let mut response = Response::new(placeholder, status, headers, body);
    if cached {
        response.set_metadata("cached", "1");
    }
    Some(response)
}

fn headers_from_json(value: &serde_json::Value) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(map) = value.as_object() {
        for (k, v) in map {
            if let Some(s) = v.as_str() {
                headers.insert(k.clone(), s.to_string());
            }
        }
    }
    headers
}

fn headers_to_json(headers: &HeaderMap) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = headers
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect();
    serde_json::Value::Object(map)
}

fn stored_metadata_json(status: u16, headers: &HeaderMap) -> String {
    serde_json::json!({ "status": status, "headers": headers_to_json(headers) }).to_string()
}

fn synthesize_from_meta(request: &Request, meta: &StoredMeta, body: Vec<u8>) -> Option<Response> {
    let value: serde_json::Value = serde_json::from_str(&meta.response_metadata).ok()?;
    let status = value.get("status")?.as_u64()? as u16;
    let headers = headers_from_json(value.get("headers")?);
    let mut response = Response::new(request.clone(), status, headers, body);
    response.set_metadata("cached", "1");
    Some(response)
}

async fn lookup(
    store: Arc<CacheStore>,
    inner: Arc<dyn Client>,
    options: CacheOptions,
    request: Request,
    fingerprint: String,
    callback: Callback,
    outer: RequestToken,
) {
    let cc = request.cache_control();
    let fp = fingerprint.clone();
    let store_for_read = store.clone();
    let meta = tokio::task::spawn_blocking(move || store_for_read.get_meta(&fp))
        .await
        .unwrap_or(Ok(None))
        .unwrap_or(None);

    if let Some(meta) = meta {
        let fp = fingerprint.clone();
        let store_for_payload = store.clone();
        let payload = tokio::task::spawn_blocking(move || store_for_payload.read_payload(&fp))
            .await
            .unwrap_or(Ok(None))
            .unwrap_or(None);

        if let Some(body) = payload {
            if cc.only_if_cached {
                if let Some(response) = synthesize_from_meta(&request, &meta, body) {
                    touch(&store, &fingerprint).await;
                    callback(response);
                    return;
                }
            } else {
                let now = now_epoch();
                let expired = (now - meta.expiry) > cc.max_stale;
                let response_cc = synthesize_from_meta(&request, &meta, Vec::new())
                    .map(|r| r.cache_control())
                    .unwrap_or_default();

                if !expired && !response_cc.must_revalidate {
                    if let Some(response) = synthesize_from_meta(&request, &meta, body) {
                        touch(&store, &fingerprint).await;
                        callback(response);
                        return;
                    }
                }

                let mut conditional = request.clone();
                if let Some(etag) = &meta.etag {
                    conditional.headers_mut().insert("If-None-Match", etag.clone());
                } else if let Some(last_modified) = &meta.last_modified {
                    conditional.headers_mut().insert("If-Modified-Since", last_modified.clone());
                }
                forward(inner, store, options, conditional, fingerprint, Some(meta), callback, outer);
                return;
            }
        }

        // Metadata present but the blob is missing (write-through crash
        // window): drop the stale row and fall through as a miss.
        let fp = fingerprint.clone();
        let store_for_delete = store.clone();
        let _ = tokio::task::spawn_blocking(move || store_for_delete.delete(&fp)).await;
    }

    if cc.only_if_cached {
        // RFC 7234 §5.2.1.7: a client that demands a cached-only answer
        // gets a Gateway Timeout when nothing is cached, not a network hit.
        callback(Response::new(request, 504, HeaderMap::new(), Vec::new()));
        return;
    }

    forward(inner, store, options, request, fingerprint, None, callback, outer);
}

async fn touch(store: &Arc<CacheStore>, fingerprint: &str) {
    let store = store.clone();
    let fingerprint = fingerprint.to_string();
    let now = now_epoch();
    let _ = tokio::task::spawn_blocking(move || store.touch(&fingerprint, now)).await;
}

fn forward(
    inner: Arc<dyn Client>,
    store: Arc<CacheStore>,
    options: CacheOptions,
    request: Request,
    fingerprint: String,
    existing: Option<StoredMeta>,
    callback: Callback,
    outer: RequestToken,
) {
    let original_request = request.clone();
    let inner_token = inner.perform(
        request,
        Box::new(move |response| {
            let store = store.clone();
            let options = options.clone();
            let fingerprint = fingerprint.clone();
            let existing = existing.clone();
            let original_request = original_request.clone();
            tokio::spawn(async move {
                on_response(store, options, original_request, fingerprint, existing, response, callback)
                    .await;
            });
        }),
    );
    let cancel_target = inner_token.clone();
    outer.set_on_cancel(move || cancel_target.cancel());
}

async fn on_response(
    store: Arc<CacheStore>,
    options: CacheOptions,
    request: Request,
    fingerprint: String,
    existing: Option<StoredMeta>,
    response: Response,
    callback: Callback,
) {
    let cc = response.cache_control();
    if cc.no_cache || cc.no_store {
        callback(response);
        return;
    }

    if response.status() == 304 {
        if let Some(mut meta) = existing {
            let mut merged_headers = headers_from_json(
                &serde_json::from_str::<serde_json::Value>(&meta.response_metadata)
                    .ok()
                    .and_then(|v| v.get("headers").cloned())
                    .unwrap_or_default(),
            );
            merged_headers.merge_overwrite(response.headers());
            let status = serde_json::from_str::<serde_json::Value>(&meta.response_metadata)
                .ok()
                .and_then(|v| v.get("status").and_then(|s| s.as_u64()))
                .unwrap_or(200) as u16;
            meta.response_metadata = stored_metadata_json(status, &merged_headers);
            meta.last_accessed = now_epoch();
            if let Some(etag) = merged_headers.get("ETag") {
                meta.etag = Some(etag.to_string());
            }
            if let Some(last_modified) = merged_headers.get("Last-Modified") {
                meta.last_modified = Some(last_modified.to_string());
            }
            let fp = fingerprint.clone();
            let store2 = store.clone();
            let body = tokio::task::spawn_blocking(move || store2.read_payload(&fp))
                .await
                .unwrap_or(Ok(None))
                .unwrap_or(None)
                .unwrap_or_default();
            let meta_for_store = meta.clone();
            let body_for_store = body.clone();
            let store3 = store.clone();
            let _ = tokio::task::spawn_blocking(move || store3.upsert(&meta_for_store, &body_for_store))
                .await;
            let mut merged = Response::new(request, status, merged_headers, body);
            merged.set_metadata("cached", "1");
            callback(merged);
        } else {
            callback(response);
        }
        return;
    }

    if response.is_cacheable_status() {
        let response_cc = response.cache_control();
        let ttl = if response_cc.max_age > 0 {
            response_cc.max_age
        } else if response_cc.s_maxage > 0 {
            response_cc.s_maxage
        } else {
            0
        };
        let now = now_epoch();
        let meta = StoredMeta {
            fingerprint: fingerprint.clone(),
            expiry: now + ttl,
            etag: response.headers().get("ETag").map(str::to_string),
            last_modified: response.headers().get("Last-Modified").map(str::to_string),
            response_metadata: stored_metadata_json(response.status(), response.headers()),
            last_accessed: now,
            payload_size: response.body().len() as i64,
        };
        let body = response.body().to_vec();
        let store2 = store.clone();
        let meta2 = meta.clone();
        let _ = tokio::task::spawn_blocking(move || store2.upsert(&meta2, &body)).await;

        let store3 = store.clone();
        let max_bytes = options.max_bytes;
        tokio::spawn(async move {
            let _ = tokio::task::spawn_blocking(move || store3.prune(max_bytes)).await;
        });
    }

    callback(response);
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfhttp_types::{ClientExt, Method};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingClient {
        calls: Arc<AtomicUsize>,
        status: u16,
        headers: HeaderMap,
        body: Vec<u8>,
    }

    impl Client for CountingClient {
        fn perform(&self, request: Request, callback: Callback) -> RequestToken {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = Response::new(request, self.status, self.headers.clone(), self.body.clone());
            callback(response);
            RequestToken::new()
        }
    }

    fn cache_with(inner: Arc<dyn Client>) -> (HttpCache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CacheStore::open(dir.path()).unwrap());
        (HttpCache::new(inner, store, CacheOptions::default()), dir)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fresh_response_is_served_from_cache_on_second_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut headers = HeaderMap::new();
        headers.insert("Cache-Control", "max-age=3600");
        let inner = Arc::new(CountingClient { calls: calls.clone(), status: 200, headers, body: b"payload".to_vec() });
        let (cache, _dir) = cache_with(inner);

        let req1 = Request::new("http://example.invalid/a", Method::Get).unwrap();
        let first = cache.perform_sync(req1);
        assert_eq!(first.status(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let req2 = Request::new("http://example.invalid/a", Method::Get).unwrap();
        let second = cache.perform_sync(req2);
        assert_eq!(second.metadata().get("cached").map(String::as_str), Some("1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second call must be served from cache");
        assert_eq!(second.body(), b"payload");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn no_store_response_is_never_persisted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut headers = HeaderMap::new();
        headers.insert("Cache-Control", "no-store");
        let inner = Arc::new(CountingClient { calls: calls.clone(), status: 200, headers, body: b"x".to_vec() });
        let (cache, _dir) = cache_with(inner);

        let _ = cache.perform_sync(Request::new("http://example.invalid/a", Method::Get).unwrap());
        let _ = cache.perform_sync(Request::new("http://example.invalid/a", Method::Get).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn post_requests_bypass_the_cache_entirely() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(CountingClient { calls: calls.clone(), status: 200, headers: HeaderMap::new(), body: Vec::new() });
        let (cache, _dir) = cache_with(inner);
        let req = Request::new("http://example.invalid/a", Method::Post).unwrap();
        let _ = cache.perform_sync(req);
        let req2 = Request::new("http://example.invalid/a", Method::Post).unwrap();
        let _ = cache.perform_sync(req2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
