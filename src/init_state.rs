//! Initialization outcome shared between the startup task and callers waiting on it.
use tokio::sync::watch;

use crate::{Error, Result};

/// Initialization state. Once `Succeeded` or `Failed`, the state never changes again.
#[derive(Debug, Clone)]
pub(crate) enum InitState {
    Pending,
    Succeeded,
    Failed(Error),
}

impl InitState {
    fn is_settled(&self) -> bool {
        !matches!(self, InitState::Pending)
    }
}

/// Tracks whether initialization finished and how.
///
/// Two signals are derived from the state:
/// - "ready" completes on the first outcome, successful or not, and never fails;
/// - "initialized" completes with `Ok(())` on success and with the stored error on failure.
///
/// Both can be awaited any number of times, before or after the outcome is known.
pub(crate) struct InitializationStateTracker {
    state: watch::Sender<InitState>,
}

impl InitializationStateTracker {
    pub fn new() -> InitializationStateTracker {
        let (state, _) = watch::channel(InitState::Pending);
        InitializationStateTracker { state }
    }

    pub fn signal_success(&self) {
        self.settle(InitState::Succeeded);
    }

    pub fn signal_failure(&self, err: Error) {
        self.settle(InitState::Failed(err));
    }

    fn settle(&self, outcome: InitState) {
        let updated = self.state.send_if_modified(|state| {
            if state.is_settled() {
                return false;
            }
            *state = outcome;
            true
        });
        if !updated {
            log::debug!(target: "unlaunch", "ignoring initialization outcome, already settled");
        }
    }

    async fn outcome(&self) -> InitState {
        let mut receiver = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let outcome = match receiver.wait_for(InitState::is_settled).await {
            Ok(state) => state.clone(),
            Err(_) => InitState::Pending,
        };
        outcome
    }

    /// Completes once initialization has either succeeded or failed.
    pub async fn ready(&self) {
        self.outcome().await;
    }

    /// Completes once initialization has succeeded, or returns the initialization error.
    pub async fn initialized(&self) -> Result<()> {
        match self.outcome().await {
            InitState::Failed(err) => Err(err),
            InitState::Succeeded | InitState::Pending => Ok(()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(*self.state.borrow(), InitState::Succeeded)
    }
}
