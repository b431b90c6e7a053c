//! Buffering and periodic delivery of telemetry events.
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::task::JoinHandle;

use crate::{
    diagnostics::DiagnosticsAccumulator,
    error_reporter::ErrorReporter,
    event_sender::EventSender,
    events::Event,
    Error,
};

const IMPRESSIONS_PATH: &str = "/impressions";
const VARIATION_COUNTS_PATH: &str = "/events";

pub(crate) struct EventProcessorConfig {
    /// Base URL of the telemetry endpoints.
    pub events_url: String,
    /// Maximum number of events held in the outbox.
    pub capacity: usize,
    pub flush_interval: Duration,
    /// Queue raw impressions in addition to counting them.
    pub live_tail: bool,
    pub disabled: bool,
}

#[derive(Default)]
struct Outbox {
    queue: Vec<Event>,
    /// Set when an event was dropped, cleared when the next event fits. Used to warn only once
    /// per overflow episode.
    exceeded_capacity: bool,
}

/// Buffers impressions and variation counts and flushes them on a timer.
pub(crate) struct EventProcessor {
    sender: EventSender,
    impressions_url: String,
    variation_counts_url: String,
    capacity: usize,
    flush_interval: Duration,
    live_tail: bool,
    disabled: bool,
    outbox: Mutex<Outbox>,
    variation_counts: Mutex<BTreeMap<(String, String), u64>>,
    diagnostics: Option<Arc<dyn DiagnosticsAccumulator + Send + Sync>>,
    errors: Arc<ErrorReporter>,
    flush_timer: Mutex<Option<JoinHandle<()>>>,
}

impl EventProcessor {
    pub fn new(
        config: EventProcessorConfig,
        sender: EventSender,
        diagnostics: Option<Arc<dyn DiagnosticsAccumulator + Send + Sync>>,
        errors: Arc<ErrorReporter>,
    ) -> EventProcessor {
        let events_url = config.events_url.trim_end_matches('/');
        EventProcessor {
            sender,
            impressions_url: format!("{events_url}{IMPRESSIONS_PATH}"),
            variation_counts_url: format!("{events_url}{VARIATION_COUNTS_PATH}"),
            capacity: config.capacity,
            flush_interval: config.flush_interval,
            live_tail: config.live_tail,
            disabled: config.disabled,
            outbox: Mutex::new(Outbox::default()),
            variation_counts: Mutex::new(BTreeMap::new()),
            diagnostics,
            errors,
            flush_timer: Mutex::new(None),
        }
    }

    /// Record `event`.
    ///
    /// Impressions always bump the variation count of their `(flag, variation)` pair. With live
    /// tail enabled they are queued for delivery as well.
    pub fn enqueue(&self, event: Event) {
        if self.disabled {
            return;
        }

        match event {
            Event::Impression(impression) => {
                self.count_variation(&impression.flag_key, &impression.variation_key, 1);
                if self.live_tail {
                    self.add_to_outbox(Event::Impression(impression));
                }
            }
            Event::VariationCount(count) => {
                self.count_variation(&count.flag_key, &count.variation_key, count.count);
            }
        }
    }

    fn count_variation(&self, flag_key: &str, variation_key: &str, count: u64) {
        let mut counts = self
            .variation_counts
            .lock()
            .expect("thread holding variation counts lock should not panic");
        *counts
            .entry((flag_key.to_owned(), variation_key.to_owned()))
            .or_default() += count;
    }

    fn add_to_outbox(&self, event: Event) {
        {
            let mut outbox = self
                .outbox
                .lock()
                .expect("thread holding outbox lock should not panic");
            if outbox.queue.len() < self.capacity {
                outbox.queue.push(event);
                outbox.exceeded_capacity = false;
                return;
            }

            if !outbox.exceeded_capacity {
                outbox.exceeded_capacity = true;
                log::warn!(target: "unlaunch", capacity = self.capacity; "exceeded event queue capacity, increase capacity to avoid dropping events");
            }
        }

        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.increment_dropped_events();
        }
    }

    /// Send all queued impressions.
    ///
    /// The queue is swapped out before sending: events enqueued while the request is in flight go
    /// to the next flush. Events of a failed request are not requeued.
    pub async fn flush(&self) {
        if self.disabled {
            return;
        }

        let events = std::mem::take(
            &mut self
                .outbox
                .lock()
                .expect("thread holding outbox lock should not panic")
                .queue,
        );
        if events.is_empty() {
            return;
        }

        self.post(&events, &self.impressions_url).await;
    }

    /// Send and reset the variation counts accumulated since the last call.
    pub async fn flush_variation_count_events(&self) {
        if self.disabled {
            return;
        }

        let counts = std::mem::take(
            &mut *self
                .variation_counts
                .lock()
                .expect("thread holding variation counts lock should not panic"),
        );
        if counts.is_empty() {
            return;
        }

        let events: Vec<Event> = counts
            .into_iter()
            .map(|((flag_key, variation_key), count)| {
                Event::variation_count(flag_key, variation_key, count)
            })
            .collect();

        self.post(&events, &self.variation_counts_url).await;
    }

    async fn post(&self, events: &[Event], url: &str) {
        match self.sender.send_events(events, url).await {
            Ok(status) if status >= 400 => {
                let err = Error::UnexpectedResponse {
                    status,
                    context: "event posting",
                };
                log::error!(target: "unlaunch", endpoint = url; "{err}");
                self.errors.notify_subscribers(err);
            }
            Ok(status) => {
                log::debug!(target: "unlaunch", endpoint = url, status = status, count = events.len(); "events delivered");
            }
            Err(err) => {
                self.errors.maybe_report_error(err);
            }
        }
    }

    /// Start flushing both queues every `flush_interval`.
    ///
    /// The next tick is only scheduled once the current one has dispatched its flushes. Flushes
    /// run in their own tasks, so a slow request does not delay the timer.
    pub fn start(self: &Arc<Self>) {
        if self.disabled {
            return;
        }

        let mut timer = self
            .flush_timer
            .lock()
            .expect("thread holding flush timer lock should not panic");
        if timer.is_some() {
            return;
        }

        let processor = Arc::downgrade(self);
        let interval = self.flush_interval;
        *timer = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(processor) = processor.upgrade() else {
                    break;
                };
                tokio::spawn(async move {
                    processor.flush().await;
                    processor.flush_variation_count_events().await;
                });
            }
        }));
        log::debug!(target: "unlaunch", "started event flush timer");
    }

    /// Whether events are dropped instead of queued.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.flush_timer.lock().unwrap().is_some()
    }

    /// Stop the flush timer. Flushes already in flight keep running.
    pub fn stop(&self) {
        let timer = self
            .flush_timer
            .lock()
            .expect("thread holding flush timer lock should not panic")
            .take();
        if let Some(timer) = timer {
            timer.abort();
            log::debug!(target: "unlaunch", "stopped event flush timer");
        }
    }
}

impl Drop for EventProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}
