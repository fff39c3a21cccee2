use std::sync::mpsc;

use crate::request::Request;
use crate::response::Response;
use crate::token::RequestToken;

/// Invoked exactly once with the final `Response` for a `perform` call.
pub type Callback = Box<dyn FnOnce(Response) + Send + 'static>;
/// Invoked with the responses pinned under a label.
pub type ResponsesCallback = Box<dyn FnOnce(Vec<Response>) + Send + 'static>;
/// Invoked with the set of labels that currently have pinned entries.
pub type LabelsCallback = Box<dyn FnOnce(Vec<String>) + Send + 'static>;

/// The uniform capability every pipeline layer exposes: Transport, Cache,
/// Coalescer and Modifier all implement `Client`, each wrapping the next
/// layer in. Composition is "is-a plus has-a": a layer both satisfies this
/// trait and holds the next layer as a field.
///
/// `perform` returns its token synchronously, after scheduling the work;
/// the callback always fires later, from a worker thread, never from the
/// caller's own thread. Pin operations default to forwarding unchanged,
/// since only the cache layer implements them non-trivially.
pub trait Client: Send + Sync {
    /// Asynchronously executes `request`. `callback` fires exactly once.
    fn perform(&self, request: Request, callback: Callback) -> RequestToken;

    /// Associates a delivered response with a durable pin label so the
    /// cache layer will not evict it. Default: forward (no-op at non-cache
    /// layers).
    fn pin(&self, _response: &Response, _label: &str) {}

    /// Removes one (entry, label) pin association.
    fn unpin(&self, _response: &Response, _label: &str) {}

    /// Removes every pin for `label`; pinned entries may then be evicted.
    fn remove_pinned(&self, _label: &str) {}

    /// Materializes every response currently pinned under `label`.
    fn pinned_for(&self, _label: &str, callback: ResponsesCallback) {
        callback(Vec::new());
    }

    /// Lists every label with at least one pinned entry.
    fn pin_labels(&self, callback: LabelsCallback) {
        callback(Vec::new());
    }
}

/// Blocking convenience wrapper over [`Client::perform`], implemented for
/// every `Client` so callers don't need to hand-roll the channel dance.
/// Must not be called from a callback already running on a layer's own
/// worker: it blocks the calling thread on a channel until the single
/// callback fires.
pub trait ClientExt: Client {
    fn perform_sync(&self, request: Request) -> Response;
}

impl<T: Client + ?Sized> ClientExt for T {
    fn perform_sync(&self, request: Request) -> Response {
        let (tx, rx) = mpsc::channel();
        self.perform(
            request,
            Box::new(move |response| {
                let _ = tx.send(response);
            }),
        );
        rx.recv().expect("callback must fire exactly once")
    }
}
