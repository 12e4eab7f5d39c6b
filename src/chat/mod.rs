// Tool-calling orchestration: step records, the per-step preparation
// policy, intent heuristics over the latest user message, and the
// client-facing debounced message queue.

pub mod intent;
pub mod prepare;
pub mod queue;
pub mod render_spec;
pub mod sources;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use prepare::{PreparedStep, StepPolicy, ToolChoice};

// Tool names understood by the step policy. The gateway executes them; we
// only decide which are exposed on each step.
pub const SELECT_TOOLS: &str = "select_tools";
pub const RENDER_UI: &str = "render_ui";
pub const GOOGLE_SEARCH: &str = "google_search";
pub const LIST_ACCESSIBLE_WORKSPACES: &str = "list_accessible_workspaces";
pub const GET_WORKSPACE_CONTEXT: &str = "get_workspace_context";
pub const SET_WORKSPACE_CONTEXT: &str = "set_workspace_context";
pub const LIST_WORKSPACE_MEMBERS: &str = "list_workspace_members";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepToolCall {
    pub name: String,
    pub call_id: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepToolResult {
    pub name: String,
    pub call_id: String,
    #[serde(default)]
    pub output: Value,
}

/// One reasoning step of a model turn: the tool calls the model made and
/// the results the gateway runtime produced for them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub tool_calls: Vec<StepToolCall>,
    pub tool_results: Vec<StepToolResult>,
}

impl StepRecord {
    pub fn with_result(name: &str, output: Value) -> Self {
        StepRecord {
            tool_calls: vec![StepToolCall {
                name: name.to_string(),
                call_id: format!("call_{}", name),
                input: Value::Null,
            }],
            tool_results: vec![StepToolResult {
                name: name.to_string(),
                call_id: format!("call_{}", name),
                output,
            }],
        }
    }
}

/// Look up the tool set `select_tools` chose earlier in the turn, if any.
/// The meta-tool's output is `{"tools": ["name", ...]}`.
pub fn selected_tools(steps: &[StepRecord]) -> Vec<String> {
    for step in steps {
        for result in &step.tool_results {
            if result.name == SELECT_TOOLS {
                if let Some(tools) = result.output.get("tools").and_then(Value::as_array) {
                    return tools
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect();
                }
            }
        }
    }
    Vec::new()
}

pub fn tool_has_run(steps: &[StepRecord], name: &str) -> bool {
    steps
        .iter()
        .any(|s| s.tool_results.iter().any(|r| r.name == name))
}

pub fn tool_call_count(steps: &[StepRecord], name: &str) -> usize {
    steps
        .iter()
        .map(|s| s.tool_calls.iter().filter(|c| c.name == name).count())
        .sum()
}
