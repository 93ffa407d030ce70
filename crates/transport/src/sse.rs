use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Url;
use snafu::ResultExt;
use tokio::sync::oneshot;

use murmur_core::ChatEvent;

use crate::error::{
    BuildClientSnafu, FeedbackRequestSnafu, FeedbackStatusSnafu, InvalidEndpointSnafu,
    TransportResult,
};
use crate::request::{ChatRequest, FeedbackSubmission};
use crate::stream::{StreamEvent, StreamHandle, StreamSender, stream_parts};
use crate::{BoxFuture, ChatTransport};

const CHAT_STREAM_PATH: &str = "api/chat";
const FEEDBACK_PATH: &str = "api/feedback";

/// Connection settings for the SSE transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseTransportConfig {
    pub base_url: String,
    pub bearer_token: Option<String>,
}

impl SseTransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().to_string(),
            bearer_token: None,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

/// Production transport: POSTs the request as JSON and decodes the
/// `text/event-stream` response, one tagged event per SSE `data:` payload.
pub struct SseTransport {
    client: reqwest::Client,
    chat_url: Url,
    feedback_url: Url,
    bearer_token: Option<String>,
}

impl SseTransport {
    pub fn new(config: SseTransportConfig) -> TransportResult<Self> {
        let base = Url::parse(&config.base_url).context(InvalidEndpointSnafu {
            stage: "parse-base-url",
            raw: config.base_url.clone(),
        })?;
        let chat_url = base.join(CHAT_STREAM_PATH).context(InvalidEndpointSnafu {
            stage: "join-chat-path",
            raw: config.base_url.clone(),
        })?;
        let feedback_url = base.join(FEEDBACK_PATH).context(InvalidEndpointSnafu {
            stage: "join-feedback-path",
            raw: config.base_url.clone(),
        })?;

        let client = reqwest::Client::builder()
            .build()
            .context(BuildClientSnafu {
                stage: "build-http-client",
            })?;

        Ok(Self {
            client,
            chat_url,
            feedback_url,
            bearer_token: config.bearer_token,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl ChatTransport for SseTransport {
    fn open_stream(&self, request: ChatRequest) -> TransportResult<StreamHandle> {
        let (event_tx, events, cancel, cancel_rx) = stream_parts();
        let http_request = self.authorize(self.client.post(self.chat_url.clone()).json(&request));

        let worker = Box::pin(run_sse_worker(http_request, event_tx, cancel_rx));
        Ok(StreamHandle {
            events,
            cancel,
            worker,
        })
    }

    fn submit_feedback<'a>(
        &'a self,
        submission: FeedbackSubmission,
    ) -> BoxFuture<'a, TransportResult<()>> {
        Box::pin(async move {
            let response = self
                .authorize(self.client.post(self.feedback_url.clone()).json(&submission))
                .send()
                .await
                .context(FeedbackRequestSnafu { stage: "send" })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return FeedbackStatusSnafu {
                    stage: "status",
                    status: status.as_u16(),
                    body,
                }
                .fail();
            }
            Ok(())
        })
    }
}

async fn run_sse_worker(
    http_request: reqwest::RequestBuilder,
    event_tx: StreamSender,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let response = match http_request.send().await {
        Ok(response) => response,
        Err(error) => {
            let _ = event_tx.send(StreamEvent::Failed(format!(
                "failed to reach the chat endpoint: {error}"
            )));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let _ = event_tx.send(StreamEvent::Failed(format!(
            "chat endpoint returned status {status}: {body}"
        )));
        return;
    }

    let mut sse_stream = response.bytes_stream().eventsource();

    loop {
        tokio::select! {
            // Either a fired cancel or a dropped handle means no one wants
            // further events.
            _ = &mut cancel_rx => {
                tracing::debug!("chat stream cancelled; stopping delivery");
                break;
            }
            next = sse_stream.next() => {
                match next {
                    None => break,
                    Some(Ok(sse_event)) => {
                        if sse_event.data.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<ChatEvent>(&sse_event.data) {
                            Ok(event) => {
                                if event_tx.send(StreamEvent::Event(event)).is_err() {
                                    break;
                                }
                            }
                            Err(error) => {
                                // Malformed payloads are protocol anomalies:
                                // skip them, keep the stream alive.
                                tracing::warn!(
                                    data = %sse_event.data,
                                    %error,
                                    "skipping undecodable stream event"
                                );
                            }
                        }
                    }
                    Some(Err(error)) => {
                        let _ = event_tx.send(StreamEvent::Failed(format!(
                            "chat stream broke mid-flight: {error}"
                        )));
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[test]
    fn endpoint_paths_derive_from_the_base_url() {
        let transport =
            SseTransport::new(SseTransportConfig::new("https://chat.example.test/")).unwrap();
        assert_eq!(
            transport.chat_url.as_str(),
            "https://chat.example.test/api/chat"
        );
        assert_eq!(
            transport.feedback_url.as_str(),
            "https://chat.example.test/api/feedback"
        );
    }

    #[test]
    fn an_unparsable_base_url_is_rejected() {
        let result = SseTransport::new(SseTransportConfig::new("not a url"));
        assert!(matches!(result, Err(TransportError::InvalidEndpoint { .. })));
    }
}
