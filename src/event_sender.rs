use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    transport::{HttpMethod, HttpRequest, Transport},
    Error, Result,
};

/// Posts batches of events to the telemetry endpoints.
pub(crate) struct EventSender {
    transport: Option<Arc<dyn Transport>>,
    environment: String,
}

impl EventSender {
    pub fn new(transport: Option<Arc<dyn Transport>>, environment: impl Into<String>) -> EventSender {
        EventSender {
            transport,
            environment: environment.into(),
        }
    }

    /// Post `events` as a JSON array to `url`. Returns the response status.
    ///
    /// Event posts are never superseded, so the request is sent without a cancellation trigger.
    pub async fn send_events<E: Serialize>(&self, events: &[E], url: &str) -> Result<u16> {
        let transport = self
            .transport
            .as_ref()
            .ok_or(Error::TransportUnavailable)?;

        let body = serde_json::to_string(events)?;
        let headers = HashMap::from([
            ("Content-Type".to_owned(), "application/json".to_owned()),
            ("X-Api-Key".to_owned(), self.environment.clone()),
        ]);

        log::debug!(target: "unlaunch", endpoint = url, count = events.len(); "posting events");
        let response = transport
            .request(
                HttpRequest {
                    method: HttpMethod::Post,
                    url: url.to_owned(),
                    headers,
                    body: Some(body),
                },
                CancellationToken::new(),
            )
            .await?;

        Ok(response.status)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        events::Event,
        test_utils::FakeTransport,
        transport::HttpResponse,
    };

    #[tokio::test]
    async fn posts_json_array_with_api_key() {
        let transport = Arc::new(FakeTransport::new());
        transport.reply("/impressions", HttpResponse::new(202));
        let sender = EventSender::new(Some(transport.clone() as Arc<dyn Transport>), "env-key");

        let status = sender
            .send_events(
                &[Event::impression("a", "bob", "on", None, "")],
                "https://events.test/impressions",
            )
            .await
            .unwrap();

        assert_eq!(status, 202);
        let request = &transport.requests()[0];
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.headers["X-Api-Key"], "env-key");
        let body = &transport.bodies_to("/impressions")[0];
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["type"], "IMPRESSION");
    }

    #[tokio::test]
    async fn without_transport_sending_fails() {
        let sender = EventSender::new(None, "env-key");

        let result = sender
            .send_events(&[Event::variation_count("a", "on", 1)], "https://events.test/events")
            .await;

        assert!(matches!(result, Err(Error::TransportUnavailable)));
    }
}
