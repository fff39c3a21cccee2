use std::sync::{Arc, Mutex};

/// The external handle for cancelling an in-flight `perform` call.
///
/// `cancel()` is idempotent and safe to call from any thread at any time.
/// `cancelled()` only reports `true` once cancellation has been requested
/// *and* every dependent token created via [`RequestToken::create_dependent`]
/// has itself concluded (cancelled or dropped) — this is what lets an inner
/// layer retry internally without a caller's `cancel()` racing ahead of the
/// retry and reporting "done" prematurely.
#[derive(Clone)]
pub struct RequestToken(Arc<Mutex<State>>);

struct State {
    cancelled: bool,
    dependents: usize,
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
    parent: Option<RequestToken>,
}

impl RequestToken {
    /// Creates a fresh, uncancelled token with no parent.
    pub fn new() -> Self {
        RequestToken(Arc::new(Mutex::new(State {
            cancelled: false,
            dependents: 0,
            on_cancel: None,
            parent: None,
        })))
    }

    /// Registers the side effect to run the moment `cancel()` first takes
    /// effect (e.g. closing a socket). If the token was already cancelled,
    /// the hook runs immediately on the calling thread.
    pub fn set_on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hook = Some(hook);
        let already_cancelled = {
            let mut state = self.0.lock().unwrap();
            if state.cancelled {
                true
            } else {
                state.on_cancel = Some(Box::new(hook.take().unwrap()));
                false
            }
        };
        if already_cancelled {
            (hook.take().unwrap())();
        }
    }

    /// Idempotent cancellation. Runs the registered `on_cancel` hook exactly
    /// once, the first time it is called.
    pub fn cancel(&self) {
        let hook = {
            let mut state = self.0.lock().unwrap();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            state.on_cancel.take()
        };
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Whether cancellation has concluded: requested, and no dependent is
    /// still outstanding.
    pub fn cancelled(&self) -> bool {
        let state = self.0.lock().unwrap();
        state.cancelled && state.dependents == 0
    }

    /// Creates a child token tied to an internal retry. While the dependent
    /// is alive, `self.cancelled()` cannot observe `true` even if `self` was
    /// already cancelled.
    pub fn create_dependent(&self) -> RequestToken {
        self.0.lock().unwrap().dependents += 1;
        RequestToken(Arc::new(Mutex::new(State {
            cancelled: false,
            dependents: 0,
            on_cancel: None,
            parent: Some(self.clone()),
        })))
    }

    fn dependent_concluded(&self) {
        let mut state = self.0.lock().unwrap();
        state.dependents = state.dependents.saturating_sub(1);
    }
}

impl Default for RequestToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for State {
    fn drop(&mut self) {
        if let Some(parent) = self.parent.take() {
            parent.dependent_concluded();
        }
    }
}
