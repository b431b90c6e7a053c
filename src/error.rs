use std::sync::Arc;

/// Represents a result type for operations in the Unlaunch client.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// client-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the Unlaunch client.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The environment key is missing, unknown, or was rejected by the server. Not retryable.
    #[error("invalid environment: {0}")]
    InvalidEnvironment(String),

    /// The user passed to the client is missing or malformed.
    #[error("invalid user: {0}")]
    InvalidUser(String),

    /// The server rejected the request as malformed. Holds the raw response body.
    #[error("request rejected by server: {0}")]
    InvalidArgument(String),

    /// No HTTP transport is configured for this client.
    #[error("cannot make HTTP requests in this environment")]
    TransportUnavailable,

    /// Fetching flags failed: network failure, unexpected content type, or a non-2xx status.
    #[error("error fetching flag settings: {0}")]
    FlagFetchError(String),

    /// The telemetry endpoint answered with a status >= 400. Affected events were dropped.
    #[error("{}", unexpected_response_message(.status, .context))]
    UnexpectedResponse {
        /// HTTP status code of the response.
        status: u16,
        /// What the client was doing when the error happened.
        context: &'static str,
    },

    /// Invalid host or events URL configuration.
    #[error("invalid base url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The request was superseded by a newer request to the same endpoint.
    #[error("request was superseded by a newer request")]
    RequestCancelled,

    /// Network error reported by the default transport.
    #[error(transparent)]
    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    Network(Arc<reqwest::Error>),

    /// Error reported by a custom [`Transport`](crate::Transport).
    #[error("transport error: {0}")]
    Transport(String),

    /// Error reported by a [`KeyValueStore`](crate::KeyValueStore).
    #[error("storage error: {0}")]
    Storage(String),

    /// A payload could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Serialization(value.to_string())
    }
}

/// Returns `true` if a request that failed with `status` may succeed when retried.
///
/// Everything outside of the 4xx range is recoverable. Within 4xx, only 400, 408, and 429 are.
pub fn is_http_error_recoverable(status: u16) -> bool {
    if (400..500).contains(&status) {
        return matches!(status, 400 | 408 | 429);
    }
    true
}

fn unexpected_response_message(status: &u16, context: &str) -> String {
    http_error_message(*status, context, "some events were dropped")
}

pub(crate) fn http_error_message(status: u16, context: &str, retry_message: &str) -> String {
    format!(
        "received error {status}{} for {context} - {}",
        if status == 401 {
            " (invalid environment key)"
        } else {
            ""
        },
        if is_http_error_recoverable(status) {
            retry_message
        } else {
            "giving up permanently"
        }
    )
}
