//! Pieces of the SQL-then-follow-up workflow that do not touch the network:
//! classifying the statement response, building the follow-up history and
//! applying follow-up fragments. The session drives them.

use serde_json::json;

use crate::accumulator::{
    append_chart, append_table, append_table_payload, append_text, append_tool_result,
    append_tool_use,
};
use crate::message::{ContentBlock, Message, MessageId, Role, ToolResultContent, ToolResults};
use crate::request::SQL_EXEC_TOOL_NAME;
use crate::router::SqlTrigger;
use crate::stream::ContentFragment;
use crate::table::StatementResponse;
use crate::transcript::strip_sql_tables;

/// Shown when the backend hands back an async handle instead of rows.
pub const ASYNC_TIMEOUT_NOTICE: &str = "SQL execution took too long to respond. Please try again.";

/// How the session should proceed after the statement call.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementOutcome {
    /// Rows are available; render them and continue with the follow-up.
    Ready,
    /// Async execution is not supported; abort with a timeout notice.
    AsyncPending,
    /// Any other response without a result set.
    Failed(String),
}

pub fn classify_statement(response: &StatementResponse) -> StatementOutcome {
    if response.is_async_pending() {
        return StatementOutcome::AsyncPending;
    }
    if !response.has_result_set() {
        let message = response
            .message
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "SQL execution returned no result set".to_string());
        return StatementOutcome::Failed(message);
    }
    StatementOutcome::Ready
}

/// History sent with the follow-up request: the conversation before this
/// turn without rendered tables, then the question, the text-to-SQL call and
/// a reference to the executed statement.
pub fn build_followup_history(
    prior: &[Message],
    question: &str,
    trigger: &SqlTrigger,
    statement_handle: Option<&str>,
) -> Vec<Message> {
    let mut history = strip_sql_tables(prior);

    history.push(Message::user(MessageId::generate(), question));

    history.push(Message {
        id: MessageId::generate(),
        role: Role::Assistant,
        content: vec![
            ContentBlock::ToolUse {
                tool_use: trigger.tool_use.clone(),
            },
            ContentBlock::ToolResults {
                tool_results: ToolResults {
                    name: if trigger.tool_results.name.is_empty() {
                        trigger.tool_use.name.clone()
                    } else {
                        trigger.tool_results.name.clone()
                    },
                    content: vec![ToolResultContent::Json {
                        json: json!({
                            "text": trigger.explanation.clone().unwrap_or_default(),
                            "sql": trigger.statement,
                        }),
                    }],
                    ..ToolResults::default()
                },
            },
        ],
    });

    history.push(Message {
        id: MessageId::generate(),
        role: Role::User,
        content: vec![ContentBlock::ToolResults {
            tool_results: ToolResults {
                name: SQL_EXEC_TOOL_NAME.to_string(),
                content: vec![ToolResultContent::Json {
                    json: json!({ "query_id": statement_handle.unwrap_or_default() }),
                }],
                ..ToolResults::default()
            },
        }],
    });

    history
}

/// Result of applying one follow-up fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Changed,
    /// Shape not understood; nothing was appended.
    Unknown(String),
}

/// Apply one follow-up fragment. A table fragment is followed by the
/// rendered result of `response` as a non-primary table.
pub fn apply_followup_fragment(
    msg: &mut Message,
    fragment: &ContentFragment,
    response: &StatementResponse,
) -> Applied {
    match fragment {
        ContentFragment::Text(text) => append_text(msg, text),
        ContentFragment::Chart(chart) => append_chart(msg, chart.clone()),
        ContentFragment::Table(table) => {
            append_table_payload(msg, table.clone());
            append_table(msg, response, false);
        }
        ContentFragment::ToolResults(results) => append_tool_result(msg, results.clone()),
        ContentFragment::ToolUse(tool_use) => append_tool_use(msg, tool_use.clone()),
        ContentFragment::Unknown(raw) => return Applied::Unknown(raw.to_string()),
    }
    Applied::Changed
}
