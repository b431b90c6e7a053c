//! Fakes for the client's collaborators.
use std::{
    cell::RefCell,
    collections::VecDeque,
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, Once,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{
    flag::Flag,
    storage::KeyValueStore,
    transport::{HttpRequest, HttpResponse, Transport},
    Error, Result,
};

pub(crate) fn flag(key: &str, variation: &str) -> Flag {
    Flag {
        flag_key: key.to_owned(),
        result: Some(variation.into()),
        status: Some("ACTIVE".to_owned()),
        evaluation_reason: Some("Default rule served".to_owned()),
        variant_config: serde_json::Map::new(),
        deleted: false,
    }
}

pub(crate) fn json_response(body: serde_json::Value) -> HttpResponse {
    HttpResponse::new(200)
        .with_header("Content-Type", "application/json; charset=utf-8")
        .with_body(body.to_string())
}

pub(crate) fn flags_response(flags: &[Flag]) -> HttpResponse {
    json_response(json!({ "data": { "flags": flags } }))
}

enum Reply {
    Response(HttpResponse),
    Error(Error),
    Held(oneshot::Receiver<Result<HttpResponse>>),
}

/// A scripted [`Transport`].
///
/// Replies are queued per URL fragment and consumed in order. Requests without a queued reply get
/// an empty flag list. Every request is recorded.
#[derive(Default)]
pub(crate) struct FakeTransport {
    requests: Mutex<Vec<HttpRequest>>,
    replies: Mutex<Vec<(String, VecDeque<Reply>)>>,
    cancelled: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> FakeTransport {
        FakeTransport::default()
    }

    fn push(&self, url_fragment: &str, reply: Reply) {
        let mut replies = self.replies.lock().unwrap();
        match replies
            .iter_mut()
            .find(|(fragment, _)| fragment == url_fragment)
        {
            Some((_, queue)) => queue.push_back(reply),
            None => replies.push((url_fragment.to_owned(), VecDeque::from([reply]))),
        }
    }

    pub fn reply(&self, url_fragment: &str, response: HttpResponse) {
        self.push(url_fragment, Reply::Response(response));
    }

    pub fn reply_error(&self, url_fragment: &str, err: Error) {
        self.push(url_fragment, Reply::Error(err));
    }

    /// Queue a reply that is only delivered once the returned sender is used.
    pub fn hold(&self, url_fragment: &str) -> oneshot::Sender<Result<HttpResponse>> {
        let (sender, receiver) = oneshot::channel();
        self.push(url_fragment, Reply::Held(receiver));
        sender
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, url_fragment: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.url.contains(url_fragment))
            .collect()
    }

    /// Parsed JSON bodies of the requests sent to `url_fragment`.
    pub fn bodies_to(&self, url_fragment: &str) -> Vec<serde_json::Value> {
        self.requests_to(url_fragment)
            .into_iter()
            .filter_map(|request| serde_json::from_str(request.body.as_deref()?).ok())
            .collect()
    }

    pub fn cancelled_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn next_reply(&self, url: &str) -> Option<Reply> {
        let mut replies = self.replies.lock().unwrap();
        replies
            .iter_mut()
            .filter(|(fragment, _)| url.contains(fragment.as_str()))
            .find_map(|(_, queue)| queue.pop_front())
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn request(
        &self,
        request: HttpRequest,
        cancel: CancellationToken,
    ) -> Result<HttpResponse> {
        let reply = self.next_reply(&request.url);
        self.requests.lock().unwrap().push(request);

        match reply {
            Some(Reply::Response(response)) => Ok(response),
            Some(Reply::Error(err)) => Err(err),
            Some(Reply::Held(receiver)) => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        self.cancelled.fetch_add(1, Ordering::SeqCst);
                        Err(Error::RequestCancelled)
                    }
                    reply = receiver => reply
                        .unwrap_or_else(|_| Err(Error::Transport("reply dropped".to_owned()))),
                }
            }
            None => Ok(flags_response(&[])),
        }
    }
}

/// A [`KeyValueStore`] whose every operation fails.
pub(crate) struct FailingStore;

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(Error::Storage("storage unavailable".to_owned()))
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(Error::Storage("storage unavailable".to_owned()))
    }
}

/// Wait until `condition` holds, failing the test after a second.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) {
    let wait = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(1), wait)
        .await
        .expect("condition was not met in time");
}

/// Run `future` to completion, failing the test after a second.
pub(crate) async fn within_a_second<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), future)
        .await
        .expect("future did not complete in time")
}

thread_local! {
    static CAPTURED_LOGS: RefCell<Vec<(log::Level, String)>> = const { RefCell::new(Vec::new()) };
}

/// Records `unlaunch` log records per thread, so concurrently running tests do not see each
/// other's logs.
struct CapturingLogger;

impl log::Log for CapturingLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.target() == "unlaunch"
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let message = record.args().to_string();
            CAPTURED_LOGS.with(|logs| logs.borrow_mut().push((record.level(), message)));
        }
    }

    fn flush(&self) {}
}

static LOGGER: CapturingLogger = CapturingLogger;

/// Start capturing logs emitted on the current thread, discarding anything captured before.
///
/// Only records from tasks polled on the calling thread are seen, so use it with the default
/// current-thread test runtime.
pub fn capture_logs() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
        }
    });
    CAPTURED_LOGS.with(|logs| logs.borrow_mut().clear());
}

/// Messages captured on the current thread at `level`.
pub fn captured_logs(level: log::Level) -> Vec<String> {
    CAPTURED_LOGS.with(|logs| {
        logs.borrow()
            .iter()
            .filter(|(captured, _)| *captured == level)
            .map(|(_, message)| message.clone())
            .collect()
    })
}
