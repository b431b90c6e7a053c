use std::{sync::Arc, time::Duration};

use crate::{
    transport::ReqwestTransport, Client, DiagnosticsAccumulator, KeyValueStore, Transport, User,
};

/// Configuration for [`Client`].
pub struct ClientConfig {
    pub(crate) environment: String,
    pub(crate) host: String,
    pub(crate) events_url: String,
    pub(crate) evaluation_reason: bool,
    pub(crate) offline: bool,
    pub(crate) local_storage: bool,
    pub(crate) send_events: bool,
    pub(crate) live_tail: bool,
    pub(crate) event_capacity: usize,
    pub(crate) flush_interval: Duration,
    pub(crate) default_value: String,
    pub(crate) all_flags_emit_events: bool,
    pub(crate) transport: Option<Arc<dyn Transport>>,
    pub(crate) storage: Option<Arc<dyn KeyValueStore>>,
    pub(crate) diagnostics: Option<Arc<dyn DiagnosticsAccumulator + Send + Sync>>,
}

impl ClientConfig {
    /// Default host of the flag evaluation API.
    pub const DEFAULT_HOST: &'static str = "https://api.unlaunch.io/api/v1";
    /// Default base URL of the telemetry endpoints.
    pub const DEFAULT_EVENTS_URL: &'static str = "https://api.unlaunch.io/api/v1/events";
    /// Default maximum number of queued events.
    pub const DEFAULT_EVENT_CAPACITY: usize = 100;
    /// Default period of the event flush timer.
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);
    /// Shortest accepted period of the event flush timer.
    pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(100);
    /// Default value served when a flag cannot be resolved.
    pub const DEFAULT_VALUE: &'static str = "control";

    /// Create a default configuration for the specified environment key.
    ///
    /// ```
    /// # use unlaunch::ClientConfig;
    /// ClientConfig::from_environment("prod-environment-key");
    /// ```
    pub fn from_environment(environment: impl Into<String>) -> Self {
        ClientConfig {
            environment: environment.into(),
            host: ClientConfig::DEFAULT_HOST.to_owned(),
            events_url: ClientConfig::DEFAULT_EVENTS_URL.to_owned(),
            evaluation_reason: true,
            offline: false,
            local_storage: false,
            send_events: true,
            live_tail: false,
            event_capacity: ClientConfig::DEFAULT_EVENT_CAPACITY,
            flush_interval: ClientConfig::DEFAULT_FLUSH_INTERVAL,
            default_value: ClientConfig::DEFAULT_VALUE.to_owned(),
            all_flags_emit_events: false,
            transport: Some(Arc::new(ReqwestTransport::new())),
            storage: None,
            diagnostics: None,
        }
    }

    /// Override the host of the flag evaluation API. Clients should use the default setting in
    /// most cases.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Override the base URL of the telemetry endpoints.
    pub fn events_url(mut self, events_url: impl Into<String>) -> Self {
        self.events_url = events_url.into();
        self
    }

    /// Ask the server to include evaluation reasons in flag results.
    pub fn evaluation_reason(mut self, evaluation_reason: bool) -> Self {
        self.evaluation_reason = evaluation_reason;
        self
    }

    /// In offline mode the client makes no requests and serves the default value for every flag.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Cache flag snapshots in [`storage`](Self::storage) and serve them on the next start while
    /// fresh flags are fetched in the background.
    pub fn local_storage(mut self, local_storage: bool) -> Self {
        self.local_storage = local_storage;
        self
    }

    /// Send impressions and variation counts to the telemetry endpoints.
    pub fn send_events(mut self, send_events: bool) -> Self {
        self.send_events = send_events;
        self
    }

    /// Send every impression instead of only aggregated variation counts.
    pub fn live_tail(mut self, live_tail: bool) -> Self {
        self.live_tail = live_tail;
        self
    }

    /// Maximum number of events held between flushes. Events over capacity are dropped.
    /// Values below 1 are raised to 1.
    pub fn event_capacity(mut self, event_capacity: usize) -> Self {
        self.event_capacity = event_capacity.max(1);
        self
    }

    /// Period of the event flush timer. Values below [`ClientConfig::MIN_FLUSH_INTERVAL`] are
    /// raised to it.
    pub fn flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval.max(ClientConfig::MIN_FLUSH_INTERVAL);
        self
    }

    /// Value served for flags that are unknown, have no result, or when offline.
    pub fn default_value(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = default_value.into();
        self
    }

    /// Emit impressions for flags evaluated by [`Client::all_flags`].
    pub fn all_flags_emit_events(mut self, all_flags_emit_events: bool) -> Self {
        self.all_flags_emit_events = all_flags_emit_events;
        self
    }

    /// Use a custom HTTP transport.
    ///
    /// ```
    /// # use unlaunch::{ClientConfig, ReqwestTransport};
    /// # use std::time::Duration;
    /// ClientConfig::from_environment("prod-environment-key")
    ///     .transport(ReqwestTransport::with_timeout(Duration::from_secs(3)));
    /// ```
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Run without any HTTP transport. Every request fails with
    /// [`Error::TransportUnavailable`](crate::Error::TransportUnavailable).
    pub fn without_transport(mut self) -> Self {
        self.transport = None;
        self
    }

    /// Storage used for cached flags and the anonymous identity.
    pub fn storage(mut self, storage: impl KeyValueStore + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Receive diagnostic counters, such as the number of dropped events.
    pub fn diagnostics(
        mut self,
        diagnostics: impl DiagnosticsAccumulator + Send + Sync + 'static,
    ) -> Self {
        self.diagnostics = Some(Arc::new(diagnostics));
        self
    }

    /// Create a new [`Client`] that evaluates `flag_keys` for `user`.
    ///
    /// Initialization starts in the background right away, so this must be called from within a
    /// Tokio runtime. Use [`Client::wait_for_initialization`] to wait for it.
    ///
    /// ```
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// # use unlaunch::{Client, ClientConfig, User};
    /// let client: Client = ClientConfig::from_environment("prod-environment-key")
    ///     .offline(true)
    ///     .to_client(["new-checkout"], User::new("user-123"));
    /// # client.wait_until_ready().await;
    /// # }
    /// ```
    pub fn to_client<K: Into<String>>(
        self,
        flag_keys: impl IntoIterator<Item = K>,
        user: impl Into<Option<User>>,
    ) -> Client {
        Client::new(
            self,
            flag_keys.into_iter().map(Into::into).collect(),
            user.into(),
        )
    }
}
