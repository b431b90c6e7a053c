//! Out-of-band reporting of errors that happen in the background.
use tokio::sync::broadcast;

use crate::Error;

const CHANNEL_CAPACITY: usize = 64;

/// Delivers background errors (telemetry failures, background refresh failures) to subscribers.
///
/// Reporting never blocks. Errors reported while nobody is subscribed are logged instead.
pub(crate) struct ErrorReporter {
    sender: broadcast::Sender<Error>,
}

impl ErrorReporter {
    pub fn new() -> ErrorReporter {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        ErrorReporter { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Error> {
        self.sender.subscribe()
    }

    pub fn maybe_report_error(&self, err: Error) {
        if let Err(broadcast::error::SendError(err)) = self.sender.send(err) {
            log::error!(target: "unlaunch", "{err}");
        }
    }

    /// Deliver `err` to current subscribers only. For errors the caller has already logged.
    pub fn notify_subscribers(&self, err: Error) {
        let _ = self.sender.send(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{capture_logs, captured_logs};

    #[test]
    fn delivers_to_subscribers() {
        let reporter = ErrorReporter::new();
        let mut errors = reporter.subscribe();

        reporter.maybe_report_error(Error::UnexpectedResponse {
            status: 500,
            context: "event posting",
        });

        assert!(matches!(
            errors.try_recv(),
            Ok(Error::UnexpectedResponse { status: 500, .. })
        ));
    }

    #[test]
    fn without_subscribers_errors_are_logged() {
        capture_logs();
        let reporter = ErrorReporter::new();

        reporter.maybe_report_error(Error::TransportUnavailable);

        assert_eq!(captured_logs(log::Level::Error).len(), 1);
    }

    #[test]
    fn notifying_without_subscribers_is_silent() {
        capture_logs();
        let reporter = ErrorReporter::new();

        reporter.notify_subscribers(Error::TransportUnavailable);

        assert!(captured_logs(log::Level::Error).is_empty());
    }
}
