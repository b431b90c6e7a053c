//! The Rust client runtime for Unlaunch, a feature flag service.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that serves feature flag variations for a [`User`]. Flags
//! are evaluated by the server: on startup the client fetches the variations of the requested
//! flag keys for the user and answers every lookup from memory afterwards.
//!
//! ```no_run
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> unlaunch::Result<()> {
//! use unlaunch::{ClientConfig, InMemoryStore, User};
//!
//! let client = ClientConfig::from_environment("prod-environment-key")
//!     .local_storage(true)
//!     .storage(InMemoryStore::new())
//!     .to_client(["new-checkout"], User::new("user-123").with_attribute("country", "US"));
//!
//! client.wait_for_initialization().await?;
//! let variation = client.variation("new-checkout");
//! # let _ = variation;
//! client.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! Flag lookups emit telemetry: every served variation is counted, and with
//! [`ClientConfig::live_tail`] every impression is sent as well. Events are buffered and flushed
//! periodically in the background.
//!
//! With [`ClientConfig::local_storage`], the last fetched flags are cached in a
//! [`KeyValueStore`] and served immediately on the next start while fresh flags are fetched in the
//! background.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Flag lookups never fail. They log the problem and serve the configured default value instead.
//! Initialization errors are returned from [`Client::wait_for_initialization`]. Errors that happen
//! in the background, like failed event deliveries, are delivered to
//! [`Client::subscribe_errors`] subscribers, or logged when there are none.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages under the `unlaunch` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into SDK operations.
//!
//! # Examples
//!
//! Examples can be found in the `demos` directory of the `unlaunch` crate repository.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod client;
mod coalescer;
mod config;
mod diagnostics;
mod error;
mod error_reporter;
mod event_processor;
mod event_sender;
mod events;
mod flag;
mod flag_store;
mod init_state;
mod requestor;
mod snapshot_store;
mod storage;
mod transport;
mod user;
mod user_validator;

#[cfg(test)]
mod test_utils;

pub use client::Client;
pub use config::ClientConfig;
pub use diagnostics::DiagnosticsAccumulator;
pub use error::{is_http_error_recoverable, Error, Result};
pub use events::{Event, Impression, VariationCount};
pub use flag::{Flag, Flags, VariationDetail, DEFAULT_VALUE_SERVED};
pub use storage::{InMemoryStore, KeyValueStore};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use user::{AttributeValue, Attributes, User, ANONYMOUS_IDENTITY};
