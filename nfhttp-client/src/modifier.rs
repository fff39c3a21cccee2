//! Request/response modification with retry: wraps an inner `Client` with
//! user-supplied request and response transforms. Grounded on the original
//! modifier client's token-tracking-across-retries design, but the
//! "`done` must be called exactly once" contract is enforced by the type
//! system instead of a runtime check: each `done` handle wraps a
//! [`tokio::sync::oneshot::Sender`] and can only be consumed once, and a
//! handle dropped without being called closes the channel, which the
//! modifier loop reports as [`NfError::ModifierDroppedRequest`].

use std::sync::Arc;

use nfhttp_types::{Callback, Client, LabelsCallback, NfError, Request, RequestToken, Response, ResponsesCallback};
use tokio::sync::oneshot;

/// Handed to a request modifier; call [`RequestDone::call`] exactly once
/// with the (possibly rewritten) request to continue the pipeline.
pub struct RequestDone(oneshot::Sender<Request>);

impl RequestDone {
    pub fn call(self, request: Request) {
        let _ = self.0.send(request);
    }
}

/// Handed to a response modifier; call [`ResponseDone::call`] exactly once
/// with the (possibly rewritten) response and whether the Modifier should
/// retry the whole call with that response's request.
pub struct ResponseDone(oneshot::Sender<(Response, bool)>);

impl ResponseDone {
    pub fn call(self, response: Response, retry: bool) {
        let _ = self.0.send((response, retry));
    }
}

pub type RequestModifierFn = Arc<dyn Fn(Request, RequestDone) + Send + Sync>;
pub type ResponseModifierFn = Arc<dyn Fn(Response, ResponseDone) + Send + Sync>;

pub fn identity_request_modifier() -> RequestModifierFn {
    Arc::new(|request, done| done.call(request))
}

pub fn identity_response_modifier() -> ResponseModifierFn {
    Arc::new(|response, done| done.call(response, false))
}

pub struct Modifier {
    inner: Arc<dyn Client>,
    request_modifier: RequestModifierFn,
    response_modifier: ResponseModifierFn,
}

impl Modifier {
    pub fn new(inner: Arc<dyn Client>, request_modifier: RequestModifierFn, response_modifier: ResponseModifierFn) -> Self {
        Self { inner, request_modifier, response_modifier }
    }
}

impl Client for Modifier {
    fn perform(&self, request: Request, callback: Callback) -> RequestToken {
        let outer = RequestToken::new();
        let inner = self.inner.clone();
        let request_modifier = self.request_modifier.clone();
        let response_modifier = self.response_modifier.clone();
        let outer_for_task = outer.clone();
        tokio::spawn(async move {
            run(inner, request_modifier, response_modifier, request, callback, outer_for_task).await;
        });
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

async fn run(
    inner: Arc<dyn Client>,
    request_modifier: RequestModifierFn,
    response_modifier: ResponseModifierFn,
    mut request: Request,
    callback: Callback,
    outer: RequestToken,
) {
    loop {
        if outer.cancelled() {
            callback(Response::error(request, &NfError::Canceled));
            return;
        }

        let (tx, rx) = oneshot::channel();
        request_modifier(request.clone(), RequestDone(tx));
        let modified_request = match rx.await {
            Ok(r) => r,
            Err(_) => {
                callback(Response::error(request, &NfError::ModifierDroppedRequest));
                return;
            }
        };

        // Held for the lifetime of this attempt so `outer.cancelled()` can't
        // observe a concluded cancel while the inner call is in flight; a
        // cancel that lands here still reaches the inner token immediately
        // via `set_on_cancel` below, it just doesn't end the loop until the
        // attempt itself concludes.
        let dependent = outer.create_dependent();

        let (resp_tx, resp_rx) = oneshot::channel::<Response>();
        let inner_token = inner.perform(
            modified_request.clone(),
            Box::new(move |response| {
                let _ = resp_tx.send(response);
            }),
        );
        let cancel_target = inner_token.clone();
        outer.set_on_cancel(move || cancel_target.cancel());

        let response = match resp_rx.await {
            Ok(r) => r,
            Err(_) => {
                drop(dependent);
                callback(Response::error(modified_request, &NfError::ModifierDroppedRequest));
                return;
            }
        };
        drop(dependent);

        let (done_tx, done_rx) = oneshot::channel::<(Response, bool)>();
        response_modifier(response, ResponseDone(done_tx));
        let (new_response, retry) = match done_rx.await {
            Ok(pair) => pair,
            Err(_) => {
                callback(Response::error(modified_request, &NfError::ModifierDroppedRequest));
                return;
            }
        };

        if retry {
            request = new_response.request().clone();
            continue;
        }
        callback(new_response);
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfhttp_types::{ClientExt, HeaderMap, Method};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: Arc<AtomicUsize>,
    }

    impl Client for Echo {
        fn perform(&self, request: Request, callback: Callback) -> RequestToken {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let status = if request.headers().get("X-Attempt") == Some("2") { 200 } else { 500 };
            callback(Response::new(request, status, HeaderMap::new(), Vec::new()));
            RequestToken::new()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn request_modifier_rewrites_outgoing_request() {
        let echo = Arc::new(Echo { calls: Arc::new(AtomicUsize::new(0)) });
        let request_modifier: RequestModifierFn = Arc::new(|req, done| {
            let req = req.with_header("X-Attempt", "2");
            done.call(req);
        });
        let modifier = Modifier::new(echo, request_modifier, identity_response_modifier());
        let response = modifier.perform_sync(Request::new("http://example.invalid/a", Method::Get).unwrap());
        assert_eq!(response.status(), 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn response_modifier_can_trigger_a_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let echo = Arc::new(Echo { calls: calls.clone() });
        let response_modifier: ResponseModifierFn = Arc::new(|resp, done| {
            if resp.status() == 500 {
                let retried = resp.request().clone().with_header("X-Attempt", "2");
                let mut next = Response::new(retried, 500, HeaderMap::new(), Vec::new());
                next.set_metadata("retry-marker", "1");
                done.call(next, true);
            } else {
                done.call(resp, false);
            }
        });
        let modifier = Modifier::new(echo, identity_request_modifier(), response_modifier);
        let response = modifier.perform_sync(Request::new("http://example.invalid/a", Method::Get).unwrap());
        assert_eq!(response.status(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_done_handle_surfaces_as_error() {
        let echo = Arc::new(Echo { calls: Arc::new(AtomicUsize::new(0)) });
        let request_modifier: RequestModifierFn = Arc::new(|_req, done| {
            drop(done);
        });
        let modifier = Modifier::new(echo, request_modifier, identity_response_modifier());
        let response = modifier.perform_sync(Request::new("http://example.invalid/a", Method::Get).unwrap());
        assert!(response.metadata().get("error").unwrap().contains("done"));
    }
}
