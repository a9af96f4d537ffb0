//! Folds streamed content into the assistant message being built.
//!
//! Each function mutates exactly one message; republishing the transcript
//! afterwards is the caller's job.

use serde_json::Value;

use crate::message::{ContentBlock, Message, ToolResults, ToolUse};
use crate::table::StatementResponse;

/// Append a text delta, extending the trailing text block when there is one.
pub fn append_text(msg: &mut Message, text: &str) {
    if let Some(ContentBlock::Text { text: last }) = msg.content.last_mut() {
        last.push_str(text);
        return;
    }
    msg.content.push(ContentBlock::Text {
        text: text.to_string(),
    });
}

pub fn append_tool_use(msg: &mut Message, tool_use: ToolUse) {
    msg.content.push(ContentBlock::ToolUse { tool_use });
}

pub fn append_tool_result(msg: &mut Message, tool_results: ToolResults) {
    msg.content.push(ContentBlock::ToolResults { tool_results });
}

/// Render a statement result as markdown and append it as a `sql_table`.
pub fn append_table(msg: &mut Message, response: &StatementResponse, primary: bool) {
    msg.content.push(ContentBlock::SqlTable {
        text: response.to_markdown(),
        primary,
    });
}

pub fn append_table_payload(msg: &mut Message, table: Value) {
    msg.content.push(ContentBlock::Table { table });
}

pub fn append_chart(msg: &mut Message, chart: Value) {
    msg.content.push(ContentBlock::Chart { chart });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageId, ToolResultContent};
    use crate::table::{ResultSetMetaData, RowType};
    use serde_json::json;

    fn fresh() -> Message {
        Message::empty_assistant(MessageId::from("a1"))
    }

    fn tool_use() -> ToolUse {
        ToolUse {
            tool_use_id: "toolu_1".into(),
            name: "analyst1".into(),
            input: json!({"query": "claims"}),
            ..ToolUse::default()
        }
    }

    #[test]
    fn test_text_deltas_coalesce() {
        let mut msg = fresh();
        append_text(&mut msg, "Hel");
        append_text(&mut msg, "lo");
        append_text(&mut msg, " world");

        assert_eq!(
            msg.content,
            vec![ContentBlock::Text {
                text: "Hello world".into()
            }]
        );
    }

    #[test]
    fn test_text_after_tool_starts_new_block() {
        let mut msg = fresh();
        append_text(&mut msg, "Looking");
        append_tool_use(&mut msg, tool_use());
        append_text(&mut msg, "Found");
        append_text(&mut msg, " it");

        let kinds: Vec<&str> = msg.content.iter().map(|b| b.kind()).collect();
        assert_eq!(kinds, vec!["text", "tool_use", "text"]);
        assert_eq!(msg.text(), "LookingFound it");
    }

    #[test]
    fn test_tool_use_then_results_keep_order() {
        let mut msg = fresh();
        let results = ToolResults {
            name: "analyst1".into(),
            content: vec![ToolResultContent::Json {
                json: json!({"sql": "SELECT 1"}),
            }],
            ..ToolResults::default()
        };
        append_tool_use(&mut msg, tool_use());
        append_tool_result(&mut msg, results.clone());

        assert_eq!(msg.content.len(), 2);
        assert_eq!(msg.content[0], ContentBlock::ToolUse { tool_use: tool_use() });
        assert_eq!(msg.content[1], ContentBlock::ToolResults { tool_results: results });
    }

    #[test]
    fn test_repeated_tool_use_is_not_merged() {
        let mut msg = fresh();
        append_tool_use(&mut msg, tool_use());
        append_tool_use(&mut msg, tool_use());
        assert_eq!(msg.content.len(), 2);
    }

    #[test]
    fn test_append_table_renders_markdown() {
        let mut msg = fresh();
        let response = StatementResponse {
            result_set_meta_data: Some(ResultSetMetaData {
                num_rows: 1,
                row_type: vec![RowType {
                    name: "N".into(),
                    data_type: "fixed".into(),
                    scale: Some(0),
                    precision: Some(18),
                    nullable: Some(false),
                }],
            }),
            data: vec![vec![Some("7".into())]],
            ..Default::default()
        };

        append_table(&mut msg, &response, false);

        assert_eq!(
            msg.content,
            vec![ContentBlock::SqlTable {
                text: "| N |\n| --- |\n| 7 |".into(),
                primary: false,
            }]
        );
    }

    #[test]
    fn test_chart_and_table_payloads_pass_through() {
        let mut msg = fresh();
        let chart = json!({"chart_spec": "{\"mark\":\"bar\"}"});
        let table = json!({"result_set": {"data": [["1"]]}});
        append_chart(&mut msg, chart.clone());
        append_table_payload(&mut msg, table.clone());

        assert_eq!(msg.content[0], ContentBlock::Chart { chart });
        assert_eq!(msg.content[1], ContentBlock::Table { table });
    }
}
