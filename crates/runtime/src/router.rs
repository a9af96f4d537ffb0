//! Routes primary-stream deltas into the assistant message and detects the
//! generated SQL that starts the execution workflow.

use tracing::debug;

use crate::accumulator::{append_text, append_tool_result, append_tool_use};
use crate::message::{Message, ToolResults, ToolUse};
use crate::stream::ContentFragment;

/// Generated SQL found in a text-to-SQL tool result, with the context the
/// follow-up request needs.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlTrigger {
    pub statement: String,
    pub explanation: Option<String>,
    pub tool_use: ToolUse,
    pub tool_results: ToolResults,
}

/// What the session must do after one primary delta was applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Routed {
    pub trigger: Option<SqlTrigger>,
    /// The delta started a search tool call; skip the streaming transition
    /// for this event.
    pub hold_streaming: bool,
    /// The leading fragment was not text or tool_use, or the fragment paired
    /// with a tool_use could not be decoded.
    pub unexpected: bool,
    /// The message was mutated and must be republished.
    pub changed: bool,
}

/// Split a primary delta into its leading fragment and the tool results that
/// belong to it. Pairing is positional: the results, if any, are the fragment
/// immediately after the tool_use in the same delta.
pub fn pair_tool_results(
    fragments: &[ContentFragment],
) -> (Option<&ContentFragment>, Option<&ToolResults>) {
    let lead = fragments.first();
    let results = match (lead, fragments.get(1)) {
        (Some(ContentFragment::ToolUse(_)), Some(ContentFragment::ToolResults(results))) => {
            Some(results)
        }
        _ => None,
    };
    (lead, results)
}

/// Apply one primary-stream delta to `msg`.
pub fn route_primary(
    msg: &mut Message,
    fragments: &[ContentFragment],
    search_tool_name: &str,
) -> Routed {
    let (lead, results) = pair_tool_results(fragments);

    match lead {
        Some(ContentFragment::Text(text)) => {
            append_text(msg, text);
            Routed {
                changed: true,
                ..Routed::default()
            }
        }
        Some(ContentFragment::ToolUse(tool_use)) => {
            append_tool_use(msg, tool_use.clone());
            let hold_streaming = tool_use.name == search_tool_name;
            let undecoded = matches!(fragments.get(1), Some(ContentFragment::Unknown(_)));

            let Some(results) = results.filter(|r| !r.content.is_empty()) else {
                return Routed {
                    hold_streaming,
                    unexpected: undecoded,
                    changed: true,
                    ..Routed::default()
                };
            };
            append_tool_result(msg, results.clone());

            let trigger = extract_sql(results).map(|(statement, explanation)| {
                debug!(tool = %tool_use.name, "tool result carries generated SQL");
                SqlTrigger {
                    statement,
                    explanation,
                    tool_use: tool_use.clone(),
                    tool_results: results.clone(),
                }
            });

            Routed {
                trigger,
                hold_streaming,
                unexpected: false,
                changed: true,
            }
        }
        _ => Routed {
            unexpected: true,
            ..Routed::default()
        },
    }
}

/// The `sql` and `text` fields of the first content item, when it is JSON
/// and the SQL is non-empty.
fn extract_sql(results: &ToolResults) -> Option<(String, Option<String>)> {
    let json = match results.content.first()? {
        crate::message::ToolResultContent::Json { json } => json,
        _ => return None,
    };
    let statement = json["sql"].as_str().filter(|s| !s.trim().is_empty())?;
    let explanation = json["text"].as_str().map(String::from);
    Some((statement.to_string(), explanation))
}
