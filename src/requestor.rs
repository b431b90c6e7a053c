//! An HTTP client that fetches evaluated flags from the server.
use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, Weak},
};

use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::{
    coalescer::RequestCoalescer,
    error::http_error_message,
    flag::{Flag, FlagsEnvelope},
    transport::{HttpMethod, HttpRequest, HttpResponse, Transport},
    user::User,
    Error, Result,
};

const EVALUATE_ENDPOINT: &str = "/evaluate";

type ActiveRequests = Mutex<HashMap<String, Arc<RequestCoalescer<serde_json::Value>>>>;
type PendingFetch = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>;

pub(crate) struct RequestorConfig {
    pub host: String,
    pub environment: String,
    pub evaluation_reason: bool,
}

/// Issues flag evaluation and JSON requests.
///
/// Requests to the same URL are coalesced: a request issued while another one to the same URL is
/// pending supersedes it, and every caller receives the outcome of the latest request.
pub(crate) struct Requestor {
    config: RequestorConfig,
    transport: Option<Arc<dyn Transport>>,
    active_requests: Arc<ActiveRequests>,
}

impl Requestor {
    pub fn new(mut config: RequestorConfig, transport: Option<Arc<dyn Transport>>) -> Requestor {
        config.host = config.host.trim_end_matches('/').to_owned();
        Requestor {
            config,
            transport,
            active_requests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// `GET` a JSON document from `path`, relative to the host.
    pub async fn fetch_json(&self, path: &str) -> Result<serde_json::Value> {
        self.fetch(HttpRequest {
            method: HttpMethod::Get,
            url: format!("{}{}", self.config.host, path),
            headers: HashMap::new(),
            body: None,
        })
        .await
    }

    /// Ask the server to evaluate `flag_keys` for `user`.
    pub async fn fetch_flags_with_result(
        &self,
        user: &User,
        flag_keys: &[String],
    ) -> Result<Vec<Flag>> {
        let url = Url::parse_with_params(
            &format!("{}{}", self.config.host, EVALUATE_ENDPOINT),
            &[(
                "evaluationReason",
                if self.config.evaluation_reason {
                    "true"
                } else {
                    "false"
                },
            )],
        )
        .map_err(Error::InvalidBaseUrl)?;

        let id = match user.identity() {
            Some(identity) => identity.to_owned(),
            None => Uuid::new_v4().to_string(),
        };
        let body = json!({
            "attributes": user.attributes,
            "flagKeys": flag_keys.join(","),
            "id": id,
        });

        let headers = HashMap::from([
            ("Content-Type".to_owned(), "application/json".to_owned()),
            ("X-Api-Key".to_owned(), self.config.environment.clone()),
        ]);

        log::debug!(target: "unlaunch", count = flag_keys.len(); "fetching flags");
        let value = self
            .fetch(HttpRequest {
                method: HttpMethod::Post,
                url: url.into(),
                headers,
                body: Some(body.to_string()),
            })
            .await?;

        let envelope: FlagsEnvelope = serde_json::from_value(value)
            .map_err(|err| Error::FlagFetchError(format!("malformed flags response ({err})")))?;
        let flags = envelope.into_flags();
        log::debug!(target: "unlaunch", count = flags.len(); "successfully fetched flags");

        Ok(flags)
    }

    /// Send `request` through the coalescer of its URL and wait for the latest outcome.
    async fn fetch(&self, request: HttpRequest) -> Result<serde_json::Value> {
        let Some(transport) = self.transport.clone() else {
            return Err(Error::TransportUnavailable);
        };

        let endpoint = request.url.clone();
        let cancel = CancellationToken::new();
        let mut pending: PendingFetch = Box::pin(send(transport, request, cancel.clone()));

        let coalescer = {
            let mut active = self
                .active_requests
                .lock()
                .expect("thread holding active requests lock should not panic");
            loop {
                let coalescer = active
                    .entry(endpoint.clone())
                    .or_insert_with(|| {
                        RequestCoalescer::new(forget_endpoint(
                            Arc::downgrade(&self.active_requests),
                            endpoint.clone(),
                        ))
                    })
                    .clone();
                match coalescer.add_request(pending, cancel.clone()) {
                    Ok(()) => break coalescer,
                    Err(returned) => {
                        // Settled but not forgotten yet. Start over with a fresh coalescer.
                        pending = returned;
                        active.remove(&endpoint);
                    }
                }
            }
        };

        coalescer.result().await
    }
}

/// Teardown callback that removes the settled coalescer of `endpoint` from `active`.
fn forget_endpoint(active: Weak<ActiveRequests>, endpoint: String) -> impl Fn() + Send + Sync {
    move || {
        let Some(active) = active.upgrade() else {
            return;
        };
        let mut active = active
            .lock()
            .expect("thread holding active requests lock should not panic");
        // A newer coalescer may already have replaced the settled one.
        if active
            .get(&endpoint)
            .is_some_and(|coalescer| coalescer.is_settled())
        {
            active.remove(&endpoint);
        }
    }
}

async fn send(
    transport: Arc<dyn Transport>,
    request: HttpRequest,
    cancel: CancellationToken,
) -> Result<serde_json::Value> {
    log::debug!(target: "unlaunch", endpoint = request.url.as_str(); "sending request");
    match transport.request(request, cancel).await {
        Ok(response) => classify_response(response),
        Err(Error::RequestCancelled) => Err(Error::RequestCancelled),
        Err(err) => {
            log::warn!(target: "unlaunch", "network error while fetching flags: {err}");
            Err(Error::FlagFetchError(format!("network error ({err})")))
        }
    }
}

fn classify_response(response: HttpResponse) -> Result<serde_json::Value> {
    let content_type = response
        .header("content-type")
        .unwrap_or_default()
        .to_owned();
    let is_json = content_type.trim().starts_with("application/json");

    match (response.status, is_json) {
        (404, _) => Err(Error::InvalidEnvironment(
            "environment key was not recognized by the server".to_owned(),
        )),
        (400, true) => Err(Error::InvalidArgument(response.body)),
        (200, true) => serde_json::from_str(&response.body)
            .map_err(|err| Error::FlagFetchError(format!("malformed JSON response ({err})"))),
        (200 | 400, false) => Err(Error::FlagFetchError(format!(
            "expected application/json content type but got \"{content_type}\""
        ))),
        (status, _) => {
            log::warn!(target: "unlaunch", status = status; "unexpected response status");
            Err(Error::FlagFetchError(http_error_message(
                status,
                "flag request",
                "will retry on next request",
            )))
        }
    }
}
