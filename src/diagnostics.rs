/// Receives diagnostic counters from the client.
///
/// Any `Fn()` closure can be used as an accumulator that only counts dropped events:
///
/// ```
/// # use std::sync::{atomic::{AtomicU64, Ordering}, Arc};
/// # use unlaunch::ClientConfig;
/// let dropped = Arc::new(AtomicU64::new(0));
/// let config = ClientConfig::from_environment("prod-key").diagnostics({
///     let dropped = dropped.clone();
///     move || {
///         dropped.fetch_add(1, Ordering::Relaxed);
///     }
/// });
/// ```
pub trait DiagnosticsAccumulator {
    /// Called every time an event is dropped because the event queue is full.
    fn increment_dropped_events(&self);
}

impl<T: Fn()> DiagnosticsAccumulator for T {
    fn increment_dropped_events(&self) {
        self();
    }
}
