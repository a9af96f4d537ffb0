use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::request::{AgentRequest, StatementRequest};
use crate::stream::SseEvent;
use crate::table::StatementResponse;

pub type SseStream = Pin<Box<dyn Stream<Item = Result<SseEvent, TransportError>> + Send>>;

/// Opens agent `:run` streams.
///
/// Defined here rather than next to the HTTP client because the session is
/// the consumer; implementations live in `talkdata-api` or in tests.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Send the request and return the response as a stream of raw SSE events.
    async fn open_stream(&self, request: &AgentRequest) -> Result<SseStream, TransportError>;

    /// Transport name for logging/debugging.
    fn transport_name(&self) -> &str;
}

/// Executes SQL statements synchronously.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    async fn execute(&self, request: &StatementRequest) -> Result<StatementResponse, TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Stream error: {0}")]
    Stream(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Queue-backed transports for driving a session without a network.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use futures::{stream, StreamExt};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// One scripted item of a mocked stream.
    #[derive(Debug, Clone)]
    pub enum Scripted {
        Event(SseEvent),
        Error(String),
        /// Never yields; models a hung upstream.
        Hang,
        /// Pauses the stream until the gate is notified.
        Wait(std::sync::Arc<Notify>),
    }

    /// An agent transport that replays queued streams in FIFO order and
    /// records every request it was given.
    #[derive(Default)]
    pub struct MockAgentTransport {
        streams: Mutex<VecDeque<Result<Vec<Scripted>, String>>>,
        requests: Mutex<Vec<AgentRequest>>,
    }

    impl MockAgentTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a stream made of the given data payloads.
        pub fn queue_data(&self, payloads: &[&str]) {
            self.queue_script(
                payloads
                    .iter()
                    .map(|d| Scripted::Event(SseEvent::data(*d)))
                    .collect(),
            );
        }

        pub fn queue_script(&self, script: Vec<Scripted>) {
            self.streams.lock().unwrap().push_back(Ok(script));
        }

        /// Make the next `open_stream` call fail.
        pub fn queue_open_failure(&self, message: &str) {
            self.streams
                .lock()
                .unwrap()
                .push_back(Err(message.to_string()));
        }

        pub fn requests(&self) -> Vec<AgentRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AgentTransport for MockAgentTransport {
        async fn open_stream(&self, request: &AgentRequest) -> Result<SseStream, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            let next = self
                .streams
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![Scripted::Event(SseEvent::data("[DONE]"))]));

            let script = next.map_err(TransportError::Network)?;
            let items = stream::iter(script).then(|item| async move {
                match item {
                    Scripted::Event(event) => Some(Ok(event)),
                    Scripted::Error(message) => Some(Err(TransportError::Stream(message))),
                    Scripted::Hang => {
                        std::future::pending::<()>().await;
                        None
                    }
                    Scripted::Wait(gate) => {
                        gate.notified().await;
                        None
                    }
                }
            });
            Ok(Box::pin(items.filter_map(|item| async move { item })))
        }

        fn transport_name(&self) -> &str {
            "mock"
        }
    }

    /// A statement executor that returns queued responses and records
    /// requests. After `hold()`, `execute` waits until the returned `Notify`
    /// is notified.
    #[derive(Default)]
    pub struct MockStatementExecutor {
        responses: Mutex<VecDeque<Result<StatementResponse, String>>>,
        requests: Mutex<Vec<StatementRequest>>,
        gate: Mutex<Option<std::sync::Arc<Notify>>>,
    }

    impl MockStatementExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn queue_response(&self, response: StatementResponse) {
            self.responses.lock().unwrap().push_back(Ok(response));
        }

        pub fn queue_failure(&self, message: &str) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Err(message.to_string()));
        }

        pub fn hold(&self) -> std::sync::Arc<Notify> {
            let notify = std::sync::Arc::new(Notify::new());
            *self.gate.lock().unwrap() = Some(notify.clone());
            notify
        }

        pub fn requests(&self) -> Vec<StatementRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StatementExecutor for MockStatementExecutor {
        async fn execute(
            &self,
            request: &StatementRequest,
        ) -> Result<StatementResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err("no statement response queued".to_string()))
                .map_err(TransportError::Network)
        }
    }
}
