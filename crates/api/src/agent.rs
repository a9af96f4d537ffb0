//! HTTP transport for the agent `:run` endpoint.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;

use talkdata_core::Config;
use talkdata_runtime::{AgentRequest, AgentTransport, SseEvent, SseStream, TransportError};

use crate::sse::SseDecoder;

pub const TOKEN_TYPE_HEADER: &str = "X-Snowflake-Authorization-Token-Type";

/// Credentials attached to every upstream request.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub token: Option<String>,
    pub token_type: Option<String>,
}

impl Credentials {
    pub(crate) fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = request;
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(token_type) = &self.token_type {
            request = request.header(TOKEN_TYPE_HEADER, token_type);
        }
        request
    }
}

/// Shared client with the configured connect timeout. No overall request
/// timeout: agent streams stay open as long as the service keeps talking.
pub fn http_client(config: &Config) -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.http.connect_timeout_secs.into()))
        .build()
        .map_err(|e| TransportError::Network(e.to_string()))
}

/// Streams agent responses over HTTP.
pub struct HttpAgentTransport {
    client: reqwest::Client,
    url: String,
    credentials: Credentials,
}

impl HttpAgentTransport {
    pub fn new(client: reqwest::Client, url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            client,
            url: url.into(),
            credentials,
        }
    }

    pub fn from_config(client: reqwest::Client, config: &Config) -> Self {
        Self::new(
            client,
            config.agent.url.clone(),
            Credentials {
                token: config.agent.auth_token.clone(),
                token_type: config.agent.auth_token_type.clone(),
            },
        )
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn open_stream(&self, request: &AgentRequest) -> Result<SseStream, TransportError> {
        debug!(url = %self.url, model = %request.model, "starting agent streaming request");

        let builder = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .json(request);
        let response = self
            .credentials
            .apply(builder)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(sse_events(response.bytes_stream()))
    }

    fn transport_name(&self) -> &str {
        "http"
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

struct State {
    bytes: ByteStream,
    decoder: SseDecoder,
    pending: std::collections::VecDeque<SseEvent>,
    finished: bool,
}

/// Turn a response body into decoded SSE events.
pub(crate) fn sse_events(
    bytes: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> SseStream {
    let state = State {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: Default::default(),
        finished: false,
    };

    let events = stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(&chunk);
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(TransportError::Stream(e.to_string())), state));
                }
                None => {
                    state.finished = true;
                    state.pending.extend(state.decoder.finish());
                }
            }
        }
    });

    Box::pin(events)
}
