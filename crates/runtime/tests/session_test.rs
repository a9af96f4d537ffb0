//! End-to-end turns driven through the mock transports.
//!
//! Covers the text path, the SQL-then-follow-up workflow, in-band errors,
//! reentrancy and cancellation.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use talkdata_runtime::provider::mock::{MockAgentTransport, MockStatementExecutor, Scripted};
use talkdata_runtime::session::UNEXPECTED_NOTICE;
use talkdata_runtime::table::{ResultSetMetaData, RowType, ASYNC_IN_PROGRESS};
use talkdata_runtime::{
    AgentSession, AgentSettings, AgentState, ContentBlock, NoticeLevel, Role, SessionError,
    SseEvent, StatementResponse, TurnOutcome,
};

struct Harness {
    transport: Arc<MockAgentTransport>,
    executor: Arc<MockStatementExecutor>,
    session: Arc<AgentSession>,
}

fn harness() -> Harness {
    let transport = Arc::new(MockAgentTransport::new());
    let executor = Arc::new(MockStatementExecutor::new());
    let mut settings = AgentSettings::new("claude-3-5-sonnet");
    settings.warehouse = Some("ANALYTICS_WH".into());
    let session = Arc::new(AgentSession::new(
        transport.clone(),
        executor.clone(),
        settings,
    ));
    Harness {
        transport,
        executor,
        session,
    }
}

fn text_delta(text: &str) -> String {
    json!({"delta": {"content": [{"type": "text", "text": text}]}}).to_string()
}

fn tool_delta(tool: &str, result: serde_json::Value) -> String {
    json!({"delta": {"content": [
        {"type": "tool_use", "tool_use": {"tool_use_id": "toolu_01", "name": tool, "input": {"query": "claims"}}},
        {"type": "tool_results", "tool_results": {"name": tool, "content": [{"type": "json", "json": result}]}}
    ]}})
    .to_string()
}

fn analyst_delta() -> String {
    tool_delta(
        "analyst1",
        json!({"sql": "SELECT COUNT(*) AS CLAIMS FROM claims", "text": "This counts last month's claims."}),
    )
}

fn one_row(handle: &str) -> StatementResponse {
    StatementResponse {
        code: Some("090001".into()),
        message: Some("Statement executed successfully.".into()),
        statement_handle: Some(handle.into()),
        result_set_meta_data: Some(ResultSetMetaData {
            num_rows: 1,
            row_type: vec![RowType {
                name: "CLAIMS".into(),
                data_type: "fixed".into(),
                scale: Some(0),
                precision: Some(18),
                nullable: Some(false),
            }],
        }),
        data: vec![vec![Some("1284".into())]],
    }
}

fn kinds(blocks: &[ContentBlock]) -> Vec<&'static str> {
    blocks.iter().map(|b| b.kind()).collect()
}

#[tokio::test]
async fn sql_then_followup_scenario() {
    let h = harness();
    h.transport.queue_data(&[&analyst_delta(), "[DONE]"]);
    h.executor.queue_response(one_row("01b2c3d4-0000"));
    h.transport.queue_data(&[
        &text_delta("There were "),
        &text_delta("1,284 claims last month."),
        "[DONE]",
    ]);

    let outcome = h
        .session
        .start_turn("How many claims last month?", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, TurnOutcome::Completed);

    let snap = h.session.snapshot();
    assert_eq!(snap.state, AgentState::Idle);
    let messages = snap.transcript.messages();
    assert_eq!(messages.len(), 3);

    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].text(), "How many claims last month?");

    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(kinds(&messages[1].content), vec!["tool_use", "tool_results", "sql_table"]);
    match &messages[1].content[2] {
        ContentBlock::SqlTable { text, primary } => {
            assert!(*primary);
            assert!(text.contains("| CLAIMS |"));
            assert!(text.contains("| 1284 |"));
        }
        other => panic!("expected sql_table, got {:?}", other),
    }

    assert_eq!(messages[2].role, Role::Assistant);
    assert_eq!(messages[2].text(), "There were 1,284 claims last month.");
    assert_eq!(snap.latest_assistant_message_id.as_ref(), Some(&messages[2].id));

    // Statement request carries the generated SQL and the warehouse.
    let statements = h.executor.requests();
    assert_eq!(statements.len(), 1);
    assert_eq!(statements[0].statement, "SELECT COUNT(*) AS CLAIMS FROM claims");
    assert_eq!(statements[0].warehouse.as_deref(), Some("ANALYTICS_WH"));

    // The follow-up request ends with the synthetic turns and never carries
    // rendered tables.
    let requests = h.transport.requests();
    assert_eq!(requests.len(), 2);
    let followup = &requests[1].messages;
    let last = followup.last().unwrap();
    assert_eq!(last.role, Role::User);
    match &last.content[0] {
        ContentBlock::ToolResults { tool_results } => {
            assert_eq!(tool_results.name, "sql_exec");
            assert_eq!(tool_results.first_json().unwrap()["query_id"], "01b2c3d4-0000");
        }
        other => panic!("expected sql_exec tool results, got {:?}", other),
    }
    let question = &followup[followup.len() - 3];
    assert_eq!(question.text(), "How many claims last month?");
    assert!(followup
        .iter()
        .flat_map(|m| &m.content)
        .all(|b| b.kind() != "sql_table"));

    // Synthetic turns stay out of the published transcript.
    assert!(messages
        .iter()
        .all(|m| followup.last().map(|l| &l.id) != Some(&m.id)));
}

#[tokio::test]
async fn followup_table_fragment_appends_secondary_table() {
    let h = harness();
    h.transport.queue_data(&[&analyst_delta()]);
    h.executor.queue_response(one_row("01b2"));
    let followup = json!({"delta": {"content": [
        {"type": "text", "text": "Here is the breakdown."},
        {"type": "table", "table": {"query_id": "01b2"}},
        {"type": "chart", "chart": {"chart_spec": "{\"mark\":\"bar\"}"}}
    ]}})
    .to_string();
    h.transport.queue_data(&[&followup, "[DONE]"]);

    h.session
        .start_turn("Break claims down", &CancellationToken::new())
        .await
        .unwrap();

    let snap = h.session.snapshot();
    let answer = &snap.transcript.messages()[2];
    assert_eq!(kinds(&answer.content), vec!["text", "table", "sql_table", "chart"]);
    assert!(matches!(
        answer.content[2],
        ContentBlock::SqlTable { primary: false, .. }
    ));
}

#[tokio::test]
async fn prior_tables_are_stripped_from_the_next_request() {
    let h = harness();
    h.transport.queue_data(&[&analyst_delta(), "[DONE]"]);
    h.executor.queue_response(one_row("01b2"));
    h.transport.queue_data(&[&text_delta("1,284"), "[DONE]"]);
    h.transport.queue_data(&[&text_delta("You're welcome."), "[DONE]"]);

    let cancel = CancellationToken::new();
    h.session.start_turn("How many claims?", &cancel).await.unwrap();
    h.session.start_turn("Thanks", &cancel).await.unwrap();

    let requests = h.transport.requests();
    assert_eq!(requests.len(), 3);
    let third = &requests[2];
    assert_eq!(third.messages.len(), 4);
    assert_eq!(kinds(&third.messages[1].content), vec!["tool_use", "tool_results"]);
    assert_eq!(third.messages[3].text(), "Thanks");

    // The published transcript still shows the table.
    let snap = h.session.snapshot();
    assert_eq!(snap.transcript.len(), 5);
    assert_eq!(
        kinds(&snap.transcript.messages()[1].content),
        vec!["tool_use", "tool_results", "sql_table"]
    );
}

#[tokio::test]
async fn tool_results_without_sql_do_not_trigger() {
    let h = harness();
    h.transport.queue_data(&[
        &tool_delta("analyst1", json!({"text": "I cannot answer that with SQL."})),
        "[DONE]",
    ]);

    let outcome = h
        .session
        .start_turn("What is the meaning of life?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Completed);
    assert!(h.executor.requests().is_empty());
    assert_eq!(h.transport.requests().len(), 1);
    assert_eq!(h.session.state(), AgentState::Idle);
}

#[tokio::test]
async fn nameless_analyst_result_triggers_and_keeps_upstream_keys() {
    let h = harness();
    let primary = json!({"delta": {"content": [
        {"type": "tool_use", "tool_use": {"tool_use_id": "toolu_01", "name": "analyst1", "input": {"query": "claims"}}},
        {"type": "tool_results", "tool_results": {
            "tool_use_id": "toolu_01",
            "status": "success",
            "content": [{"type": "json", "json": {"sql": "SELECT 1"}}]
        }}
    ]}});
    h.transport.queue_data(&[&primary.to_string(), "[DONE]"]);
    h.executor.queue_response(one_row("01b2"));
    h.transport.queue_data(&[&text_delta("One."), "[DONE]"]);
    h.transport.queue_data(&[&text_delta("Sure."), "[DONE]"]);

    let outcome = h
        .session
        .start_turn("Give me one", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Completed);
    let statements = h.executor.requests();
    assert_eq!(statements.len(), 1);
    assert_eq!(statements[0].statement, "SELECT 1");
    let snap = h.session.snapshot();
    assert_eq!(
        kinds(&snap.transcript.messages()[1].content),
        vec!["tool_use", "tool_results", "sql_table"]
    );

    // The synthetic tool turn falls back to the tool_use name.
    let requests = h.transport.requests();
    let followup = &requests[1].messages;
    match &followup[followup.len() - 2].content[1] {
        ContentBlock::ToolResults { tool_results } => assert_eq!(tool_results.name, "analyst1"),
        other => panic!("expected tool_results, got {:?}", other),
    }

    h.session
        .start_turn("Thanks", &CancellationToken::new())
        .await
        .unwrap();
    let history = serde_json::to_value(&h.transport.requests()[2].messages).unwrap();
    let sent = &history[1]["content"][1]["tool_results"];
    assert_eq!(sent["tool_use_id"], "toolu_01");
    assert_eq!(sent["status"], "success");
    assert!(sent.get("name").is_none());
}

#[tokio::test]
async fn undecodable_tool_results_warn_without_triggering() {
    let h = harness();
    let mut notices = h.session.notices();
    let primary = json!({"delta": {"content": [
        {"type": "tool_use", "tool_use": {"tool_use_id": "toolu_01", "name": "analyst1", "input": {}}},
        {"type": "tool_results", "tool_results": {"content": "SELECT 1"}}
    ]}});
    h.transport.queue_data(&[&primary.to_string(), "[DONE]"]);

    let outcome = h
        .session
        .start_turn("Give me one", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Completed);
    assert!(h.executor.requests().is_empty());
    assert_eq!(kinds(&h.session.snapshot().transcript.messages()[1].content), vec!["tool_use"]);
    let notice = notices.try_recv().unwrap();
    assert_eq!(notice.level, NoticeLevel::Warning);
    assert_eq!(notice.message, UNEXPECTED_NOTICE);
}

#[tokio::test]
async fn triggering_turn_walks_states_in_order() {
    let h = harness();
    let stream_gate = Arc::new(Notify::new());
    let statement_gate = h.executor.hold();
    let followup_gate = Arc::new(Notify::new());
    h.transport.queue_script(vec![
        Scripted::Wait(stream_gate.clone()),
        Scripted::Event(SseEvent::data(analyst_delta())),
    ]);
    h.executor.queue_response(one_row("01b2"));
    h.transport.queue_script(vec![
        Scripted::Wait(followup_gate.clone()),
        Scripted::Event(SseEvent::data(text_delta("1,284"))),
        Scripted::Event(SseEvent::data("[DONE]")),
    ]);

    // Each gate opens only after its state was recorded, so no transition
    // can be coalesced away.
    let mut rx = h.session.subscribe();
    let recorder = tokio::spawn(async move {
        let mut states = Vec::new();
        loop {
            let state = rx.borrow_and_update().state;
            if states.last() != Some(&state) {
                states.push(state);
                match state {
                    AgentState::Loading => stream_gate.notify_one(),
                    AgentState::ExecutingSql => statement_gate.notify_one(),
                    AgentState::RunningAnalytics => followup_gate.notify_one(),
                    AgentState::Idle if states.len() > 1 => break,
                    _ => {}
                }
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        states
    });
    tokio::task::yield_now().await;

    let outcome = h
        .session
        .start_turn("How many claims?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(
        recorder.await.unwrap(),
        vec![
            AgentState::Idle,
            AgentState::Loading,
            AgentState::ExecutingSql,
            AgentState::RunningAnalytics,
            AgentState::Idle,
        ]
    );
}

#[tokio::test]
async fn upstream_error_event_notifies_once() {
    let h = harness();
    let mut notices = h.session.notices();
    h.transport
        .queue_data(&[r#"{"code":"400","message":"bad request"}"#]);

    let outcome = h
        .session
        .start_turn("hi", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::UpstreamError("bad request".into()));
    let snap = h.session.snapshot();
    assert_eq!(snap.state, AgentState::Idle);
    assert_eq!(snap.transcript.len(), 1, "no assistant content appended");
    assert_eq!(snap.latest_assistant_message_id, None);

    let notice = notices.try_recv().unwrap();
    assert_eq!(notice.level, NoticeLevel::Error);
    assert_eq!(notice.message, "bad request");
    assert!(notices.try_recv().is_err());
}

#[tokio::test]
async fn async_statement_aborts_turn() {
    let h = harness();
    let mut notices = h.session.notices();
    h.transport.queue_data(&[&analyst_delta(), "[DONE]"]);
    h.executor.queue_response(StatementResponse {
        code: Some("333334".into()),
        message: Some(format!("{} Use the handle to poll.", ASYNC_IN_PROGRESS)),
        statement_handle: Some("01b2".into()),
        ..StatementResponse::default()
    });

    let outcome = h
        .session
        .start_turn("How many claims last month?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Unsupported);
    let snap = h.session.snapshot();
    assert_eq!(snap.state, AgentState::Idle);
    assert_eq!(
        kinds(&snap.transcript.messages()[1].content),
        vec!["tool_use", "tool_results"]
    );
    assert_eq!(h.transport.requests().len(), 1, "no follow-up request");
    assert_eq!(
        notices.try_recv().unwrap().message,
        "SQL execution took too long to respond. Please try again."
    );
}

#[tokio::test]
async fn statement_without_result_set_is_an_upstream_error() {
    let h = harness();
    h.transport.queue_data(&[&analyst_delta()]);
    h.executor.queue_response(StatementResponse {
        code: Some("002003".into()),
        message: Some("SQL compilation error: Object 'CLAIMS' does not exist".into()),
        ..StatementResponse::default()
    });

    let outcome = h
        .session
        .start_turn("How many claims?", &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(outcome, TurnOutcome::UpstreamError(m) if m.contains("does not exist")));
    assert_eq!(h.session.state(), AgentState::Idle);
}

#[tokio::test]
async fn malformed_payload_propagates_without_applying() {
    let h = harness();
    h.transport
        .queue_data(&[&text_delta("ok so far"), "{\"delta\": {\"content\": [", "[DONE]"]);

    let err = h
        .session
        .start_turn("hi", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Malformed(_)));
    let snap = h.session.snapshot();
    assert_eq!(snap.state, AgentState::Idle);
    assert_eq!(snap.transcript.messages()[1].text(), "ok so far");
}

#[tokio::test]
async fn transport_failure_notifies_and_propagates() {
    let h = harness();
    let mut notices = h.session.notices();
    h.transport.queue_open_failure("connection refused");

    let err = h
        .session
        .start_turn("hi", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Transport(_)));
    assert_eq!(h.session.state(), AgentState::Idle);
    assert_eq!(
        notices.try_recv().unwrap().message,
        "Failed to reach the agent service"
    );
}

#[tokio::test]
async fn unexpected_fragment_warns_and_continues() {
    let h = harness();
    let mut notices = h.session.notices();
    h.transport.queue_data(&[
        r#"{"delta":{"content":[{"type":"chart","chart":{}}]}}"#,
        &text_delta("still here"),
        "[DONE]",
    ]);

    let outcome = h
        .session
        .start_turn("hi", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(h.session.snapshot().transcript.messages()[1].text(), "still here");
    assert_eq!(notices.try_recv().unwrap().level, NoticeLevel::Warning);
}

#[tokio::test]
async fn search_tool_use_holds_streaming_state() {
    let h = harness();
    h.transport.queue_script(vec![
        Scripted::Event(SseEvent::data(tool_delta(
            "search1",
            json!({"searchResults": [{"doc_id": 1, "text": "Claims policy"}]}),
        ))),
        Scripted::Hang,
    ]);
    let mut rx = h.session.subscribe();
    let cancel = CancellationToken::new();

    let task = {
        let session = h.session.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { session.start_turn("What is the policy?", &cancel).await })
    };

    let state = rx
        .wait_for(|s| s.transcript.len() == 2)
        .await
        .unwrap()
        .state;
    assert_eq!(state, AgentState::Loading);

    cancel.cancel();
    assert_eq!(task.await.unwrap().unwrap(), TurnOutcome::Cancelled);
}

#[tokio::test]
async fn second_turn_is_rejected_while_one_is_running() {
    let h = harness();
    let gate = h.executor.hold();
    h.transport.queue_data(&[&analyst_delta()]);
    h.executor.queue_response(one_row("01b2"));
    h.transport.queue_data(&[&text_delta("done"), "[DONE]"]);
    let mut rx = h.session.subscribe();

    let task = {
        let session = h.session.clone();
        tokio::spawn(async move {
            session
                .start_turn("How many claims?", &CancellationToken::new())
                .await
        })
    };

    rx.wait_for(|s| s.state == AgentState::ExecutingSql)
        .await
        .unwrap();
    let before = h.session.snapshot().transcript.len();

    let err = h
        .session
        .start_turn("interrupting", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::TurnInProgress));
    assert_eq!(h.session.snapshot().transcript.len(), before);
    assert_eq!(h.session.state(), AgentState::ExecutingSql);

    gate.notify_one();
    assert_eq!(task.await.unwrap().unwrap(), TurnOutcome::Completed);
    assert_eq!(h.session.state(), AgentState::Idle);

    // The session accepts turns again.
    h.transport.queue_data(&[&text_delta("again"), "[DONE]"]);
    h.session
        .start_turn("next", &CancellationToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn cancel_during_followup_discards_partial_answer() {
    let h = harness();
    h.transport.queue_data(&[&analyst_delta()]);
    h.executor.queue_response(one_row("01b2"));
    h.transport.queue_script(vec![
        Scripted::Event(SseEvent::data(text_delta("There were"))),
        Scripted::Hang,
    ]);
    let mut rx = h.session.subscribe();
    let cancel = CancellationToken::new();

    let task = {
        let session = h.session.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { session.start_turn("How many claims?", &cancel).await })
    };

    rx.wait_for(|s| s.state == AgentState::RunningAnalytics && s.transcript.len() == 3)
        .await
        .unwrap();
    cancel.cancel();

    assert_eq!(task.await.unwrap().unwrap(), TurnOutcome::Cancelled);
    let snap = h.session.snapshot();
    assert_eq!(snap.state, AgentState::Idle);
    assert_eq!(snap.transcript.len(), 2);
    let primary = &snap.transcript.messages()[1];
    assert_eq!(
        kinds(&primary.content),
        vec!["tool_use", "tool_results", "sql_table"]
    );
    assert_eq!(snap.latest_assistant_message_id.as_ref(), Some(&primary.id));
}

#[tokio::test]
async fn cancel_during_statement_keeps_primary_content() {
    let h = harness();
    let _gate = h.executor.hold();
    h.transport.queue_data(&[&analyst_delta()]);
    h.executor.queue_response(one_row("01b2"));
    let mut rx = h.session.subscribe();
    let cancel = CancellationToken::new();

    let task = {
        let session = h.session.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { session.start_turn("How many claims?", &cancel).await })
    };

    rx.wait_for(|s| s.state == AgentState::ExecutingSql)
        .await
        .unwrap();
    cancel.cancel();

    assert_eq!(task.await.unwrap().unwrap(), TurnOutcome::Cancelled);
    let snap = h.session.snapshot();
    assert_eq!(snap.state, AgentState::Idle);
    assert_eq!(
        kinds(&snap.transcript.messages()[1].content),
        vec!["tool_use", "tool_results"]
    );
    assert_eq!(h.transport.requests().len(), 1);
}
