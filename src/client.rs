use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
};

use tokio::sync::{broadcast, OnceCell};

use crate::{
    error_reporter::ErrorReporter,
    event_processor::{EventProcessor, EventProcessorConfig},
    event_sender::EventSender,
    events::Event,
    flag::{index_flags, Flags, VariationDetail, DEFAULT_VALUE_SERVED},
    flag_store::FlagStore,
    init_state::InitializationStateTracker,
    requestor::{Requestor, RequestorConfig},
    snapshot_store::SnapshotStore,
    user_validator::UserValidator,
    ClientConfig, Error, Result, User,
};

/// A client for the Unlaunch feature flag service.
///
/// The client holds the flags evaluated by the server for one user and answers flag lookups from
/// memory. Lookups never fail: when a flag cannot be resolved, the configured default value is
/// served and the problem is logged.
///
/// Cloning a client is cheap. Clones share flags, user, and event queues.
///
/// ```no_run
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> unlaunch::Result<()> {
/// use unlaunch::{ClientConfig, User};
///
/// let client = ClientConfig::from_environment("prod-environment-key")
///     .to_client(["new-checkout"], User::new("user-123"));
/// client.wait_for_initialization().await?;
///
/// if client.variation("new-checkout") == "on" {
///     // show new checkout
/// }
///
/// client.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    environment: String,
    flag_keys: Vec<String>,
    offline: bool,
    send_events: bool,
    default_value: String,
    all_flags_emit_events: bool,
    requestor: Requestor,
    validator: UserValidator,
    /// `None` unless local storage is enabled and a storage backend is configured.
    snapshots: Option<SnapshotStore>,
    flags: FlagStore,
    user: RwLock<Option<User>>,
    init: InitializationStateTracker,
    events: Arc<EventProcessor>,
    errors: Arc<ErrorReporter>,
    closed: AtomicBool,
    warned_missing_user: AtomicBool,
    close_once: OnceCell<()>,
}

impl Client {
    /// Create a new `Client` and start initializing it in the background.
    ///
    /// Prefer [`ClientConfig::to_client`]. Must be called from within a Tokio runtime.
    pub fn new(config: ClientConfig, flag_keys: Vec<String>, user: Option<User>) -> Client {
        let errors = Arc::new(ErrorReporter::new());

        let snapshots = match (config.local_storage, &config.storage) {
            (true, Some(storage)) => Some(SnapshotStore::new(
                storage.clone(),
                config.environment.clone(),
            )),
            (true, None) => {
                log::warn!(target: "unlaunch", "local storage is enabled but no storage is configured, flags will not be cached");
                None
            }
            (false, _) => None,
        };

        let events = Arc::new(EventProcessor::new(
            EventProcessorConfig {
                events_url: config.events_url,
                capacity: config.event_capacity,
                flush_interval: config.flush_interval,
                live_tail: config.live_tail,
                disabled: !config.send_events || config.offline,
            },
            EventSender::new(config.transport.clone(), config.environment.clone()),
            config.diagnostics,
            errors.clone(),
        ));

        let requestor = Requestor::new(
            RequestorConfig {
                host: config.host,
                environment: config.environment.clone(),
                evaluation_reason: config.evaluation_reason,
            },
            config.transport,
        );

        let inner = Arc::new(ClientInner {
            environment: config.environment,
            flag_keys,
            offline: config.offline,
            send_events: config.send_events,
            default_value: config.default_value,
            all_flags_emit_events: config.all_flags_emit_events,
            requestor,
            validator: UserValidator::new(config.storage),
            snapshots,
            flags: FlagStore::new(),
            user: RwLock::new(None),
            init: InitializationStateTracker::new(),
            events,
            errors,
            closed: AtomicBool::new(false),
            warned_missing_user: AtomicBool::new(false),
            close_once: OnceCell::new(),
        });

        if !inner.events.is_disabled() {
            inner.events.start();
        }
        tokio::spawn(inner.clone().finish_init(user));

        Client { inner }
    }

    /// Wait until initialization has finished, successfully or not.
    ///
    /// Use [`Client::wait_for_initialization`] to learn whether it succeeded.
    pub async fn wait_until_ready(&self) {
        self.inner.init.ready().await;
    }

    /// Wait until the client is initialized. Returns the initialization error if it failed.
    ///
    /// Can be called any number of times, before or after initialization finished.
    pub async fn wait_for_initialization(&self) -> Result<()> {
        self.inner.init.initialized().await
    }

    /// Returns `true` once initialization has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.inner.init.is_initialized()
    }

    /// Get the variation of a flag served to the current user.
    ///
    /// Returns the configured default value if the client is offline, the flag is unknown, or
    /// the server did not pick a variation.
    pub fn variation(&self, flag_key: &str) -> String {
        self.inner.variation_detail(flag_key, true).value
    }

    /// Same as [`Client::variation`] but also returns the flag status and evaluation reason.
    pub fn variation_detail(&self, flag_key: &str) -> VariationDetail {
        self.inner.variation_detail(flag_key, true)
    }

    /// Get the configuration attached to the variation served to the current user.
    ///
    /// Returns an empty map if there is none.
    pub fn variation_configuration(
        &self,
        flag_key: &str,
    ) -> serde_json::Map<String, serde_json::Value> {
        let inner = &self.inner;
        if inner.offline {
            log::error!(target: "unlaunch", "no variation configuration available in offline mode");
            return serde_json::Map::new();
        }
        if flag_key.is_empty() {
            log::error!(target: "unlaunch", "flag key is missing, no variation configuration available");
            return serde_json::Map::new();
        }

        let flags = inner.flags.get_flags();
        match flags.get(flag_key) {
            None => {
                log::error!(target: "unlaunch", flag_key = flag_key; "flag not found, no variation configuration available");
                serde_json::Map::new()
            }
            Some(flag) if flag.variation().is_none() => {
                log::error!(target: "unlaunch", flag_key = flag_key; "no variation configuration available");
                serde_json::Map::new()
            }
            Some(flag) => flag.variant_config.clone(),
        }
    }

    /// Get the variations of all known flags, keyed by flag key.
    ///
    /// No impressions are emitted unless
    /// [`ClientConfig::all_flags_emit_events`] is enabled.
    pub fn all_flags(&self) -> HashMap<String, String> {
        let inner = &self.inner;
        let flags = inner.flags.get_flags();
        flags
            .values()
            .map(|flag| {
                let detail = inner.variation_detail(&flag.flag_key, inner.all_flags_emit_events);
                (flag.flag_key.clone(), detail.value)
            })
            .collect()
    }

    /// The current user, with its identity already validated. `None` until the user has been
    /// validated during initialization.
    pub fn get_user(&self) -> Option<User> {
        self.inner
            .user
            .read()
            .expect("thread holding user lock should not panic")
            .clone()
    }

    /// Switch to another user and fetch flags for it.
    ///
    /// On success, the flags of the new user replace the current ones at once. On failure, the
    /// user is switched but the previous flags are kept.
    pub async fn identify(&self, user: User) -> Result<()> {
        let inner = &self.inner;
        let user = inner.validator.validate_user(Some(&user)).await?;
        inner.set_user(user.clone());

        if inner.offline {
            return Ok(());
        }

        let flags = inner.fetch_flags(&user).await?;
        inner.replace_all_flags(&user, flags).await;
        Ok(())
    }

    /// Send queued impressions now. Does nothing if sending events is disabled.
    pub async fn flush(&self) {
        self.inner.events.flush().await;
    }

    /// Stop sending events, flush what is queued, and forget all flags.
    ///
    /// Calling `close` more than once is harmless: later calls wait for the first one to finish.
    pub async fn close(&self) {
        let inner = &self.inner;
        inner
            .close_once
            .get_or_init(|| async {
                inner.closed.store(true, Ordering::SeqCst);
                inner.events.stop();
                inner.events.flush().await;
                inner.events.flush_variation_count_events().await;
                inner.flags.clear();
                log::debug!(target: "unlaunch", "client closed");
            })
            .await;
    }

    /// Subscribe to errors that happen in the background, like failed event deliveries or failed
    /// flag refreshes. Errors reported while nobody is subscribed are logged.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<Error> {
        self.inner.errors.subscribe()
    }
}

impl ClientInner {
    async fn finish_init(self: Arc<Self>, user: Option<User>) {
        if let Err(err) = self.initialize(user).await {
            log::warn!(target: "unlaunch", "failed to initialize client: {err}");
            self.init.signal_failure(err);
        }
    }

    async fn initialize(&self, user: Option<User>) -> Result<()> {
        if self.environment.is_empty() {
            return Err(Error::InvalidEnvironment(
                "environment key is not specified".to_owned(),
            ));
        }

        let user = self.validator.validate_user(user.as_ref()).await?;
        self.log_storage_advisories();
        self.set_user(user.clone());

        if self.offline {
            self.flags.clear();
            self.signal_success();
            return Ok(());
        }

        let Some(snapshots) = &self.snapshots else {
            return match self.fetch_flags(&user).await {
                Ok(flags) => {
                    self.replace_all_flags(&user, flags).await;
                    self.signal_success();
                    Ok(())
                }
                Err(err) => {
                    self.flags.clear();
                    Err(err)
                }
            };
        };

        let cached = match user.identity() {
            Some(identity) => snapshots.load_flags(identity).await,
            None => None,
        };
        match cached {
            Some(cached) => {
                log::debug!(target: "unlaunch", count = cached.len(); "serving cached flags");
                self.flags.replace_flags(Arc::new(cached));

                // Signal on the next tick so that callers get a chance to subscribe first.
                tokio::task::yield_now().await;
                self.signal_success();

                match self.fetch_flags(&user).await {
                    Ok(flags) => self.replace_all_flags(&user, flags).await,
                    Err(err) => self.errors.maybe_report_error(err),
                }
            }
            None => {
                let flags = self.fetch_flags(&user).await?;
                self.replace_all_flags(&user, flags).await;
                self.signal_success();
            }
        }

        Ok(())
    }

    fn signal_success(&self) {
        log::info!(target: "unlaunch", "client initialized");
        self.init.signal_success();
    }

    fn log_storage_advisories(&self) {
        let production = self.environment.starts_with("prod");
        match (self.snapshots.is_some(), production) {
            (true, false) => {
                log::warn!(target: "unlaunch", "using local storage to cache flags, you may have to restart twice to see the latest flag values. Consider disabling local storage outside of production");
            }
            (false, true) => {
                log::warn!(target: "unlaunch", "disabling local storage in production is not recommended");
            }
            _ => {}
        }
    }

    fn set_user(&self, user: User) {
        *self
            .user
            .write()
            .expect("thread holding user lock should not panic") = Some(user);
    }

    fn is_current_user(&self, user: &User) -> bool {
        self.user
            .read()
            .expect("thread holding user lock should not panic")
            .as_ref()
            == Some(user)
    }

    async fn fetch_flags(&self, user: &User) -> Result<Flags> {
        let flags = self
            .requestor
            .fetch_flags_with_result(user, &self.flag_keys)
            .await?;
        Ok(index_flags(flags))
    }

    /// Replace all flags at once and persist them if caching is enabled.
    async fn replace_all_flags(&self, user: &User, flags: Flags) {
        if self.closed.load(Ordering::SeqCst) {
            log::debug!(target: "unlaunch", "client is closed, discarding fetched flags");
            return;
        }
        if !self.is_current_user(user) {
            log::debug!(target: "unlaunch", "user changed during fetch, discarding fetched flags");
            return;
        }

        let flags = Arc::new(flags);
        self.flags.replace_flags(flags.clone());

        if let (Some(snapshots), Some(identity)) = (&self.snapshots, user.identity()) {
            snapshots.save_flags(identity, &flags).await;
        }
    }

    fn variation_detail(&self, flag_key: &str, emit_event: bool) -> VariationDetail {
        if self.offline {
            return VariationDetail {
                value: self.default_value.clone(),
                status: None,
                reason: DEFAULT_VALUE_SERVED.to_owned(),
            };
        }

        let flags = self.flags.get_flags();
        let Some(flag) = flags.get(flag_key).filter(|flag| !flag.deleted) else {
            log::error!(target: "unlaunch", flag_key = flag_key; "flag not found. Either the flag does not exist or it is not available to client-side SDKs");
            return VariationDetail {
                value: self.default_value.clone(),
                status: None,
                reason: format!("flag not found, {} is served", self.default_value),
            };
        };

        let detail = VariationDetail {
            value: flag
                .variation()
                .unwrap_or_else(|| self.default_value.clone()),
            status: flag.status.clone(),
            reason: flag.evaluation_reason.clone().unwrap_or_default(),
        };

        if emit_event {
            self.track_impression(flag_key, &detail);
        }

        detail
    }

    fn track_impression(&self, flag_key: &str, detail: &VariationDetail) {
        if !self.send_events || self.closed.load(Ordering::SeqCst) {
            return;
        }

        let user_id = self
            .user
            .read()
            .expect("thread holding user lock should not panic")
            .as_ref()
            .and_then(|user| user.identity().map(str::to_owned))
            .filter(|identity| !identity.is_empty());
        let Some(user_id) = user_id else {
            if !self.warned_missing_user.swap(true, Ordering::SeqCst) {
                log::warn!(target: "unlaunch", "dropping event without a user, make sure the client was initialized with a user");
            }
            return;
        };

        self.events.enqueue(Event::impression(
            flag_key,
            user_id,
            detail.value.clone(),
            detail.status.clone(),
            detail.reason.clone(),
        ));
    }
}
