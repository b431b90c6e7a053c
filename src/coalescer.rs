//! De-duplication of concurrent requests to the same endpoint.
use std::{
    future::Future,
    sync::{Arc, Mutex},
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Coalesces the requests issued to one endpoint so that only the most recent one is honored.
///
/// When a request is added while an earlier one is still pending, the earlier one is superseded:
/// its cancellation token is cancelled and its outcome is discarded. Everybody waiting on
/// [`RequestCoalescer::result`] receives the outcome of the latest request.
///
/// Once the tracked request settles, the coalescer calls `on_teardown` so the owner can forget
/// it. A settled coalescer accepts no more requests.
pub(crate) struct RequestCoalescer<T> {
    state: Mutex<CoalescerState>,
    result: watch::Sender<Option<Result<T>>>,
    on_teardown: Box<dyn Fn() + Send + Sync>,
}

struct CoalescerState {
    /// Incremented for every added request. Only the request with the current generation may
    /// settle the coalescer.
    generation: u64,
    /// Cancellation token of the currently tracked request.
    cancel: Option<CancellationToken>,
    settled: bool,
}

impl<T> RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(on_teardown: impl Fn() + Send + Sync + 'static) -> Arc<RequestCoalescer<T>> {
        let (result, _) = watch::channel(None);
        Arc::new(RequestCoalescer {
            state: Mutex::new(CoalescerState {
                generation: 0,
                cancel: None,
                settled: false,
            }),
            result,
            on_teardown: Box::new(on_teardown),
        })
    }

    /// Start tracking `request`, superseding the pending one if any.
    ///
    /// The request is spawned on the current Tokio runtime. If the coalescer has already settled,
    /// the request is handed back untouched.
    pub fn add_request<F>(
        self: &Arc<Self>,
        request: F,
        cancel: CancellationToken,
    ) -> std::result::Result<(), F>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let generation = {
            let mut state = self
                .state
                .lock()
                .expect("thread holding coalescer lock should not panic");
            if state.settled {
                return Err(request);
            }
            if let Some(previous) = state.cancel.replace(cancel) {
                log::debug!(target: "unlaunch", "superseding pending request");
                previous.cancel();
            }
            state.generation += 1;
            state.generation
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = request.await;
            this.settle(generation, result);
        });

        Ok(())
    }

    fn settle(&self, generation: u64, result: Result<T>) {
        {
            let mut state = self
                .state
                .lock()
                .expect("thread holding coalescer lock should not panic");
            if state.settled || state.generation != generation {
                // Superseded.
                return;
            }
            state.settled = true;
            state.cancel = None;
        }

        // The lock must be released before tearing down: the owner inspects `is_settled()`.
        self.result.send_replace(Some(result));
        (self.on_teardown)();
    }

    pub fn is_settled(&self) -> bool {
        self.state
            .lock()
            .expect("thread holding coalescer lock should not panic")
            .settled
    }

    /// Outcome of the most recent request. Can be awaited by any number of callers.
    pub async fn result(&self) -> Result<T> {
        let mut receiver = self.result.subscribe();
        let outcome = receiver
            .wait_for(Option::is_some)
            .await
            .map(|outcome| outcome.clone());

        match outcome {
            Ok(Some(result)) => result,
            // The sender lives in `self`, so neither can happen.
            Ok(None) | Err(_) => Err(Error::RequestCancelled),
        }
    }
}
