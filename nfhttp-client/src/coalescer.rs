//! Request coalescing: identical concurrent requests (same fingerprint)
//! share a single in-flight inner call. Grounded on the same map-of-groups
//! shape as the original multi-request client, but the per-waiter
//! bookkeeping is a plain `Vec` guarded by one mutex rather than a
//! weak-pointer table, since Rust's ownership rules already guarantee a
//! waiter's callback cannot be invoked twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use nfhttp_types::{Callback, Client, LabelsCallback, Request, RequestToken, Response, ResponsesCallback};

struct Waiter {
    id: u64,
    callback: Callback,
}

struct Group {
    request: Request,
    waiters: Vec<Waiter>,
    inner_token: RequestToken,
}

/// Wraps an inner `Client`, collapsing concurrent `perform` calls that
/// share a fingerprint into one inner call.
pub struct Coalescer {
    inner: Arc<dyn Client>,
    in_flight: Arc<Mutex<HashMap<String, Group>>>,
    next_waiter_id: AtomicU64,
}

impl Coalescer {
    pub fn new(inner: Arc<dyn Client>) -> Self {
        Self { inner, in_flight: Arc::new(Mutex::new(HashMap::new())), next_waiter_id: AtomicU64::new(0) }
    }

    fn wire_cancel(&self, outer: &RequestToken, fingerprint: String, waiter_id: u64, inner_token: RequestToken) {
        let in_flight = self.in_flight.clone();
        outer.set_on_cancel(move || {
            let removed = {
                let mut table = in_flight.lock().unwrap();
                let Some(group) = table.get_mut(&fingerprint) else { return };
                let Some(pos) = group.waiters.iter().position(|w| w.id == waiter_id) else { return };
                let waiter = group.waiters.remove(pos);
                let request = group.request.clone();
                let now_empty = group.waiters.is_empty();
                if now_empty {
                    table.remove(&fingerprint);
                }
                (waiter, request, now_empty)
            };
            let (waiter, request, now_empty) = removed;
            (waiter.callback)(Response::cancelled(request));
            if now_empty {
                inner_token.cancel();
            }
        });
    }
}

impl Client for Coalescer {
    fn perform(&self, request: Request, callback: Callback) -> RequestToken {
        let fingerprint = request.fingerprint();
        let outer = RequestToken::new();
        let waiter_id = self.next_waiter_id.fetch_add(1, Ordering::SeqCst);

        let mut table = self.in_flight.lock().unwrap();
        if let Some(group) = table.get_mut(&fingerprint) {
            group.waiters.push(Waiter { id: waiter_id, callback });
            let inner_token = group.inner_token.clone();
            drop(table);
            self.wire_cancel(&outer, fingerprint, waiter_id, inner_token);
            return outer;
        }
        drop(table);

        let in_flight = self.in_flight.clone();
        let fp_for_completion = fingerprint.clone();
        let inner_token = self.inner.perform(
            request.clone(),
            Box::new(move |response| {
                let group = in_flight.lock().unwrap().remove(&fp_for_completion);
                let Some(group) = group else { return };
                let multicasted = group.waiters.len() > 1;
                for waiter in group.waiters {
                    let mut delivered = response.clone();
                    if multicasted {
                        delivered.set_metadata("multicasted", "1");
                    }
                    (waiter.callback)(delivered);
                }
            }),
        );

        let mut table = self.in_flight.lock().unwrap();
        table.insert(
            fingerprint.clone(),
            Group { request, waiters: vec![Waiter { id: waiter_id, callback }], inner_token: inner_token.clone() },
        );
        drop(table);
        self.wire_cancel(&outer, fingerprint, waiter_id, inner_token);
        outer
    }

    fn pin(&self, response: &Response, label: &str) {
        self.inner.pin(response, label);
    }

    fn unpin(&self, response: &Response, label: &str) {
        self.inner.unpin(response, label);
    }

    fn remove_pinned(&self, label: &str) {
        self.inner.remove_pinned(label);
    }

    fn pinned_for(&self, label: &str, callback: ResponsesCallback) {
        self.inner.pinned_for(label, callback);
    }

    fn pin_labels(&self, callback: LabelsCallback) {
        self.inner.pin_labels(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfhttp_types::{ClientExt, HeaderMap, Method};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowEcho {
        calls: Arc<AtomicUsize>,
    }

    impl Client for SlowEcho {
        fn perform(&self, request: Request, callback: Callback) -> RequestToken {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                callback(Response::new(request, 200, HeaderMap::new(), b"ok".to_vec()));
            });
            RequestToken::new()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_identical_requests_share_one_inner_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(SlowEcho { calls: calls.clone() });
        let coalescer = Arc::new(Coalescer::new(inner));

        let a = coalescer.clone();
        let b = coalescer.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move {
                a.perform_sync(Request::new("http://example.invalid/x", Method::Get).unwrap())
            }),
            tokio::spawn(async move {
                b.perform_sync(Request::new("http://example.invalid/x", Method::Get).unwrap())
            }),
        );
        let ra = ra.unwrap();
        let rb = rb.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ra.metadata().get("multicasted").map(String::as_str), Some("1"));
        assert_eq!(rb.metadata().get("multicasted").map(String::as_str), Some("1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn distinct_fingerprints_are_not_coalesced() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(SlowEcho { calls: calls.clone() });
        let coalescer = Coalescer::new(inner);
        let a = coalescer.perform_sync(Request::new("http://example.invalid/a", Method::Get).unwrap());
        let b = coalescer.perform_sync(Request::new("http://example.invalid/b", Method::Get).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(a.metadata().get("multicasted").is_none());
        assert!(b.metadata().get("multicasted").is_none());
    }
}
