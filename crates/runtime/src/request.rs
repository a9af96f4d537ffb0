//! Request bodies for the agent and statements services.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use talkdata_core::Config;

use crate::message::Message;

pub const SEARCH_TOOL_NAME: &str = "search1";
pub const ANALYST_TOOL_NAME: &str = "analyst1";
pub const DATA_TO_CHART_TOOL_NAME: &str = "data_to_chart";
pub const SQL_EXEC_TOOL_NAME: &str = "sql_exec";

/// Body of an agent `:run` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_resources: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub tool_spec: ToolSpecBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpecBody {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
}

impl ToolSpec {
    pub fn new(tool_type: &str, name: &str) -> Self {
        Self {
            tool_spec: ToolSpecBody {
                tool_type: tool_type.to_string(),
                name: name.to_string(),
            },
        }
    }

    pub fn search() -> Self {
        Self::new("cortex_search", SEARCH_TOOL_NAME)
    }

    pub fn analyst() -> Self {
        Self::new("cortex_analyst_text_to_sql", ANALYST_TOOL_NAME)
    }

    pub fn data_to_chart() -> Self {
        Self::new("data_to_chart", DATA_TO_CHART_TOOL_NAME)
    }

    pub fn sql_exec() -> Self {
        Self::new("cortex_analyst_sql_exec", SQL_EXEC_TOOL_NAME)
    }

    /// Search, text-to-SQL, charting and SQL execution.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::search(),
            Self::analyst(),
            Self::data_to_chart(),
            Self::sql_exec(),
        ]
    }
}

/// Everything a session needs to build requests, besides the history.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub model: String,
    pub experimental: Option<Value>,
    pub tools: Vec<ToolSpec>,
    pub tool_resources: Option<Value>,
    /// Tool whose `tool_use` events hold back the streaming state by one event.
    pub search_tool_name: String,
    pub warehouse: Option<String>,
}

impl AgentSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            experimental: None,
            tools: ToolSpec::defaults(),
            tool_resources: None,
            search_tool_name: SEARCH_TOOL_NAME.to_string(),
            warehouse: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let experimental = config
            .agent
            .related_queries
            .then(|| json!({ "EnableRelatedQueries": true }));

        let mut resources = Map::new();
        if let Some(service) = &config.tools.search_service {
            resources.insert(
                config.tools.search_tool_name.clone(),
                json!({
                    "search_service": service,
                    "max_results": config.tools.search_max_results,
                }),
            );
        }
        if let Some(model_file) = &config.tools.semantic_model_file {
            resources.insert(
                ANALYST_TOOL_NAME.to_string(),
                json!({ "semantic_model_file": model_file }),
            );
        }

        Self {
            model: config.agent.model.clone(),
            experimental,
            tools: ToolSpec::defaults(),
            tool_resources: (!resources.is_empty()).then_some(Value::Object(resources)),
            search_tool_name: config.tools.search_tool_name.clone(),
            warehouse: config.statements.warehouse.clone(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn build_request(&self, messages: Vec<Message>) -> AgentRequest {
        AgentRequest {
            model: self.model.clone(),
            experimental: self.experimental.clone(),
            messages,
            tools: self.tools.clone(),
            tool_resources: self.tool_resources.clone(),
        }
    }

    pub fn build_statement(&self, statement: &str) -> StatementRequest {
        StatementRequest {
            statement: statement.to_string(),
            warehouse: self.warehouse.clone(),
            parameters: OutputParameters::default(),
        }
    }
}

/// Body of a statements call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementRequest {
    pub statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse: Option<String>,
    pub parameters: OutputParameters,
}

/// Output formats the execution backend is asked to use. Fixed; table
/// rendering depends on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct OutputParameters {
    pub binary_output_format: String,
    pub date_output_format: String,
    pub time_output_format: String,
    pub timestamp_ltz_output_format: String,
    pub timestamp_ntz_output_format: String,
    pub timestamp_tz_output_format: String,
    pub timestamp_output_format: String,
    pub timezone: String,
}

impl Default for OutputParameters {
    fn default() -> Self {
        Self {
            binary_output_format: "HEX".into(),
            date_output_format: "YYYY-Mon-DD".into(),
            time_output_format: "HH24:MI:SS".into(),
            timestamp_ltz_output_format: String::new(),
            timestamp_ntz_output_format: "YYYY-MM-DD HH24:MI:SS.FF3".into(),
            timestamp_tz_output_format: String::new(),
            timestamp_output_format: "YYYY-MM-DD HH24:MI:SS.FF3 TZHTZM".into(),
            timezone: "America/Los_Angeles".into(),
        }
    }
}
