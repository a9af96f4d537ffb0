//! The agent session: owns the transcript, runs one turn at a time and
//! publishes every change through a `watch` channel.
//!
//! A turn is a single cooperative task. It suspends on the primary stream,
//! the statement call and the follow-up stream; each suspension point is
//! raced against the caller's [`CancellationToken`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accumulator::append_table;
use crate::followup::{
    apply_followup_fragment, build_followup_history, classify_statement, Applied,
    StatementOutcome, ASYNC_TIMEOUT_NOTICE,
};
use crate::interpret::{interpret_event, InterpretError};
use crate::message::{Message, MessageId};
use crate::provider::{AgentTransport, SseStream, StatementExecutor, TransportError};
use crate::request::AgentSettings;
use crate::router::{route_primary, SqlTrigger};
use crate::stream::{AgentEvent, SseEvent};
use crate::table::StatementResponse;
use crate::transcript::{strip_sql_tables, Transcript};

const NOTICE_CAPACITY: usize = 64;

pub const AGENT_UNREACHABLE_NOTICE: &str = "Failed to reach the agent service";
pub const STATEMENTS_UNREACHABLE_NOTICE: &str = "Failed to reach the statements service";
pub const MALFORMED_NOTICE: &str = "Received a malformed response from the agent service";
pub const UNEXPECTED_NOTICE: &str = "Unexpected response from agent API";

/// Externally visible session state. `Idle` is both the initial state and
/// the state every turn ends in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AgentState {
    #[default]
    Idle,
    Loading,
    Streaming,
    ExecutingSql,
    RunningAnalytics,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Loading => "loading",
            AgentState::Streaming => "streaming",
            AgentState::ExecutingSql => "executing_sql",
            AgentState::RunningAnalytics => "running_analytics",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an observer can see of a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub state: AgentState,
    pub transcript: Transcript,
    pub latest_assistant_message_id: Option<MessageId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Error,
    Warning,
}

/// A user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    /// The agent or statements service reported an error in-band.
    UpstreamError(String),
    /// The statement went asynchronous, which this client does not poll.
    Unsupported,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a turn is already in progress")]
    TurnInProgress,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Malformed(#[from] InterpretError),
}

pub struct AgentSession {
    transport: Arc<dyn AgentTransport>,
    executor: Arc<dyn StatementExecutor>,
    settings: AgentSettings,
    snapshot: watch::Sender<SessionSnapshot>,
    notices: broadcast::Sender<Notice>,
    busy: AtomicBool,
}

/// Marks the session busy for the lifetime of a turn and returns it to
/// `Idle` on every exit path.
struct TurnGuard<'a> {
    session: &'a AgentSession,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.session.set_state(AgentState::Idle);
        self.session.busy.store(false, Ordering::Release);
    }
}

impl AgentSession {
    pub fn new(
        transport: Arc<dyn AgentTransport>,
        executor: Arc<dyn StatementExecutor>,
        settings: AgentSettings,
    ) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            transport,
            executor,
            settings,
            snapshot,
            notices,
            busy: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> AgentState {
        self.snapshot.borrow().state
    }

    /// Send `text` as a new user message and drive the turn to completion.
    ///
    /// Returns [`SessionError::TurnInProgress`] without touching the
    /// transcript when another turn is running.
    pub async fn start_turn(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, SessionError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Rejected turn: another turn is in progress");
            return Err(SessionError::TurnInProgress);
        }
        let _guard = TurnGuard { session: self };

        info!(chars = text.len(), "Starting turn");
        let result = self.run_turn(text, cancel).await;
        match &result {
            Ok(outcome) => info!(?outcome, "Turn finished"),
            Err(e) => warn!(error = %e, "Turn failed"),
        }
        result
    }

    async fn run_turn(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, SessionError> {
        let prior = self.snapshot.borrow().transcript.messages().to_vec();
        let user = Message::user(MessageId::generate(), text);

        let mut history = strip_sql_tables(&prior);
        history.push(user.clone());

        self.snapshot.send_modify(|s| {
            s.transcript.push(user);
            s.state = AgentState::Loading;
        });

        let request = self.settings.build_request(history);
        debug!(
            transport = self.transport.transport_name(),
            messages = request.messages.len(),
            "Opening agent stream"
        );
        let mut stream = match or_cancel(cancel, self.transport.open_stream(&request)).await {
            None => return Ok(TurnOutcome::Cancelled),
            Some(opened) => opened.map_err(|e| self.unreachable(AGENT_UNREACHABLE_NOTICE, e))?,
        };

        let mut assistant = Message::empty_assistant(MessageId::generate());
        loop {
            let event = match self.next_event(&mut stream, cancel).await? {
                Some(event) => event,
                None if cancel.is_cancelled() => return Ok(TurnOutcome::Cancelled),
                None => return Ok(TurnOutcome::Completed),
            };

            let fragments = match self.interpret(&event)? {
                AgentEvent::Done => return Ok(TurnOutcome::Completed),
                AgentEvent::UpstreamError { code, message } => {
                    return Ok(self.upstream_error(&code, message))
                }
                AgentEvent::Delta(fragments) => fragments,
            };

            let routed = route_primary(&mut assistant, &fragments, &self.settings.search_tool_name);
            if routed.unexpected {
                warn!(data = %event.data, "Unexpected response from agent API");
                self.notify(NoticeLevel::Warning, UNEXPECTED_NOTICE);
            }
            if routed.changed {
                self.publish_message(&assistant);
            }

            if let Some(trigger) = routed.trigger {
                drop(stream);
                return self
                    .run_followup(&prior, text, &mut assistant, trigger, cancel)
                    .await;
            }

            if !routed.hold_streaming {
                self.set_state(AgentState::Streaming);
            }
        }
    }

    /// Execute the generated SQL, render it into the primary message and
    /// stream the follow-up answer into a new assistant message.
    async fn run_followup(
        &self,
        prior: &[Message],
        question: &str,
        primary: &mut Message,
        trigger: SqlTrigger,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, SessionError> {
        info!(statement = %trigger.statement, "Executing generated SQL");
        self.set_state(AgentState::ExecutingSql);

        let statement = self.settings.build_statement(&trigger.statement);
        let response = match or_cancel(cancel, self.executor.execute(&statement)).await {
            None => return Ok(TurnOutcome::Cancelled),
            Some(result) => {
                result.map_err(|e| self.unreachable(STATEMENTS_UNREACHABLE_NOTICE, e))?
            }
        };

        match classify_statement(&response) {
            StatementOutcome::Ready => {}
            StatementOutcome::AsyncPending => {
                warn!(
                    handle = ?response.statement_handle,
                    "Statement went asynchronous, aborting turn"
                );
                self.notify(NoticeLevel::Error, ASYNC_TIMEOUT_NOTICE);
                return Ok(TurnOutcome::Unsupported);
            }
            StatementOutcome::Failed(message) => {
                warn!(code = ?response.code, %message, "Statement returned no result set");
                self.notify(NoticeLevel::Error, &message);
                return Ok(TurnOutcome::UpstreamError(message));
            }
        }

        debug!(rows = response.row_count(), "Statement returned rows");
        append_table(primary, &response, true);
        self.publish_message(primary);

        self.set_state(AgentState::RunningAnalytics);
        let history = build_followup_history(
            prior,
            question,
            &trigger,
            response.statement_handle.as_deref(),
        );
        let request = self.settings.build_request(history);
        debug!(messages = request.messages.len(), "Opening follow-up stream");
        let mut stream = match or_cancel(cancel, self.transport.open_stream(&request)).await {
            None => return Ok(TurnOutcome::Cancelled),
            Some(opened) => opened.map_err(|e| self.unreachable(AGENT_UNREACHABLE_NOTICE, e))?,
        };

        let mut followup = Message::empty_assistant(MessageId::generate());
        let result = self
            .consume_followup(&mut stream, &mut followup, &response, cancel)
            .await;

        if matches!(result, Ok(TurnOutcome::Cancelled)) {
            debug!(id = %followup.id, "Discarding partial follow-up message");
            let primary_id = primary.id.clone();
            self.snapshot.send_modify(|s| {
                if s.transcript.remove(&followup.id).is_some() {
                    s.latest_assistant_message_id = Some(primary_id);
                }
            });
        }
        result
    }

    async fn consume_followup(
        &self,
        stream: &mut SseStream,
        followup: &mut Message,
        response: &StatementResponse,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, SessionError> {
        loop {
            let event = match self.next_event(stream, cancel).await? {
                Some(event) => event,
                None if cancel.is_cancelled() => return Ok(TurnOutcome::Cancelled),
                None => return Ok(TurnOutcome::Completed),
            };

            let fragments = match self.interpret(&event)? {
                AgentEvent::Done => return Ok(TurnOutcome::Completed),
                AgentEvent::UpstreamError { code, message } => {
                    return Ok(self.upstream_error(&code, message))
                }
                AgentEvent::Delta(fragments) => fragments,
            };

            let mut changed = false;
            for fragment in &fragments {
                match apply_followup_fragment(followup, fragment, response) {
                    Applied::Changed => changed = true,
                    Applied::Unknown(raw) => {
                        warn!(fragment = %raw, "Unknown fragment in follow-up stream");
                        self.notify(NoticeLevel::Warning, UNEXPECTED_NOTICE);
                    }
                }
            }
            if changed {
                self.publish_message(followup);
            }
        }
    }

    /// The next raw event; `None` when the stream ended or the turn was
    /// cancelled.
    async fn next_event(
        &self,
        stream: &mut SseStream,
        cancel: &CancellationToken,
    ) -> Result<Option<SseEvent>, SessionError> {
        match or_cancel(cancel, stream.next()).await {
            None => Ok(None),
            Some(None) => {
                debug!("Agent stream ended");
                Ok(None)
            }
            Some(Some(Ok(event))) => Ok(Some(event)),
            Some(Some(Err(e))) => Err(self.unreachable(AGENT_UNREACHABLE_NOTICE, e)),
        }
    }

    fn interpret(&self, event: &SseEvent) -> Result<AgentEvent, SessionError> {
        interpret_event(event).map_err(|e| {
            error!(error = %e, "Malformed agent event");
            self.notify(NoticeLevel::Error, MALFORMED_NOTICE);
            SessionError::Malformed(e)
        })
    }

    fn upstream_error(&self, code: &str, message: String) -> TurnOutcome {
        warn!(code, %message, "Agent service returned an error");
        self.notify(NoticeLevel::Error, &message);
        TurnOutcome::UpstreamError(message)
    }

    fn unreachable(&self, notice: &str, e: TransportError) -> SessionError {
        error!(error = %e, "{}", notice);
        self.notify(NoticeLevel::Error, notice);
        SessionError::Transport(e)
    }

    fn publish_message(&self, message: &Message) {
        self.snapshot.send_modify(|s| {
            s.transcript.upsert(message);
            s.latest_assistant_message_id = Some(message.id.clone());
        });
    }

    fn set_state(&self, state: AgentState) {
        self.snapshot.send_if_modified(|s| {
            if s.state == state {
                return false;
            }
            debug!(from = %s.state, to = %state, "State change");
            s.state = state;
            true
        });
    }

    fn notify(&self, level: NoticeLevel, message: &str) {
        // No subscribers is fine.
        let _ = self.notices.send(Notice {
            level,
            message: message.to_string(),
        });
    }
}

/// Run `fut` unless `cancel` fires first. Cancellation wins ties.
async fn or_cancel<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}
