// Step-indexed tool-selection policy: given the steps taken so far in one
// model turn and the latest user message, decide which tools the next step
// exposes and whether tool use is mandatory.

use serde::Serialize;

use super::{
    intent, render_spec, selected_tools, tool_call_count, tool_has_run, StepRecord,
    GET_WORKSPACE_CONTEXT, GOOGLE_SEARCH, LIST_ACCESSIBLE_WORKSPACES, LIST_WORKSPACE_MEMBERS,
    RENDER_UI, SELECT_TOOLS, SET_WORKSPACE_CONTEXT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    Required,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparedStep {
    pub active_tools: Vec<String>,
    pub tool_choice: ToolChoice,
}

impl PreparedStep {
    fn required(tools: Vec<&str>) -> Self {
        PreparedStep {
            active_tools: tools.into_iter().map(str::to_string).collect(),
            tool_choice: ToolChoice::Required,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepPolicy {
    pub render_ui_max_attempts: usize,
}

impl Default for StepPolicy {
    fn default() -> Self {
        StepPolicy {
            render_ui_max_attempts: 2,
        }
    }
}

impl StepPolicy {
    /// Decide the tool set for the next step of the turn.
    pub fn prepare(&self, steps: &[StepRecord], latest_user_message: &str) -> PreparedStep {
        // Step 0 always goes through the select_tools meta-tool.
        if steps.is_empty() {
            return PreparedStep::required(vec![SELECT_TOOLS]);
        }

        let selected = selected_tools(steps);

        // Workspace-context resolution comes before anything else: listing
        // first, then get/set until one of them has run.
        if intent::references_other_workspace(latest_user_message)
            && !workspace_context_resolved(steps)
        {
            if !tool_has_run(steps, LIST_ACCESSIBLE_WORKSPACES) {
                return PreparedStep::required(vec![LIST_ACCESSIBLE_WORKSPACES]);
            }
            return PreparedStep::required(vec![GET_WORKSPACE_CONTEXT, SET_WORKSPACE_CONTEXT]);
        }

        if intent::asks_about_members(latest_user_message)
            && !tool_has_run(steps, LIST_WORKSPACE_MEMBERS)
        {
            let mut tools = selected.clone();
            if !tools.iter().any(|t| t == LIST_WORKSPACE_MEMBERS) {
                tools.push(LIST_WORKSPACE_MEMBERS.to_string());
            }
            return PreparedStep {
                active_tools: tools,
                tool_choice: ToolChoice::Required,
            };
        }

        if intent::wants_web_search(latest_user_message) && !tool_has_run(steps, GOOGLE_SEARCH) {
            return PreparedStep::required(vec![GOOGLE_SEARCH]);
        }

        let renderable_done = render_ui_succeeded(steps);
        let attempts = tool_call_count(steps, RENDER_UI);
        let markdown_preferred = intent::prefers_markdown_tables(latest_user_message);
        let render_requested = !markdown_preferred
            && (intent::wants_render_ui(latest_user_message)
                || selected.iter().any(|t| t == RENDER_UI));

        if render_requested && !renderable_done && attempts < self.render_ui_max_attempts {
            return PreparedStep::required(vec![RENDER_UI]);
        }

        // Past this point render_ui is never forced again. A markdown-table
        // preference removes it from the active set entirely, as do a
        // renderable spec or an exhausted retry budget.
        let drop_render_ui =
            markdown_preferred || renderable_done || attempts >= self.render_ui_max_attempts;
        let active_tools: Vec<String> = if drop_render_ui {
            selected.into_iter().filter(|t| t != RENDER_UI).collect()
        } else {
            selected
        };

        PreparedStep {
            active_tools,
            tool_choice: ToolChoice::Auto,
        }
    }
}

fn workspace_context_resolved(steps: &[StepRecord]) -> bool {
    tool_has_run(steps, GET_WORKSPACE_CONTEXT) || tool_has_run(steps, SET_WORKSPACE_CONTEXT)
}

/// A render_ui result counts only when its output is a renderable spec that
/// was not auto-repaired.
fn render_ui_succeeded(steps: &[StepRecord]) -> bool {
    steps.iter().any(|s| {
        s.tool_results
            .iter()
            .any(|r| r.name == RENDER_UI && render_spec::is_renderable_spec(&r.output))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{StepToolCall, StepToolResult};
    use serde_json::{json, Value};

    fn select_step(tools: &[&str]) -> StepRecord {
        StepRecord::with_result(SELECT_TOOLS, json!({ "tools": tools }))
    }

    fn render_attempt(output: Value) -> StepRecord {
        StepRecord {
            tool_calls: vec![StepToolCall {
                name: RENDER_UI.to_string(),
                call_id: "call_render".to_string(),
                input: json!({}),
            }],
            tool_results: vec![StepToolResult {
                name: RENDER_UI.to_string(),
                call_id: "call_render".to_string(),
                output,
            }],
        }
    }

    fn renderable_output() -> Value {
        json!({
            "spec": {
                "root": "main",
                "elements": {"main": {"type": "stack"}}
            }
        })
    }

    #[test]
    fn step_zero_forces_select_tools() {
        let prepared = StepPolicy::default().prepare(&[], "anything at all");
        assert_eq!(prepared.active_tools, vec![SELECT_TOOLS.to_string()]);
        assert_eq!(prepared.tool_choice, ToolChoice::Required);
    }

    #[test]
    fn selected_tools_pass_through_unmodified() {
        let steps = vec![select_step(&["get_tasks", "get_calendar"])];
        let prepared = StepPolicy::default().prepare(&steps, "plan my day from app data");
        assert_eq!(prepared.active_tools, vec!["get_tasks", "get_calendar"]);
        assert_eq!(prepared.tool_choice, ToolChoice::Auto);
    }

    #[test]
    fn workspace_reference_forces_listing_then_context() {
        let policy = StepPolicy::default();
        let msg = "show tasks in the Acme Corp workspace";

        let steps = vec![select_step(&["get_tasks"])];
        let prepared = policy.prepare(&steps, msg);
        assert_eq!(prepared.active_tools, vec![LIST_ACCESSIBLE_WORKSPACES]);
        assert_eq!(prepared.tool_choice, ToolChoice::Required);

        let mut steps = steps;
        steps.push(StepRecord::with_result(
            LIST_ACCESSIBLE_WORKSPACES,
            json!({"workspaces": [{"id": "ws-2", "name": "Acme Corp"}]}),
        ));
        let prepared = policy.prepare(&steps, msg);
        assert_eq!(
            prepared.active_tools,
            vec![GET_WORKSPACE_CONTEXT, SET_WORKSPACE_CONTEXT]
        );

        steps.push(StepRecord::with_result(
            SET_WORKSPACE_CONTEXT,
            json!({"ws_id": "ws-2"}),
        ));
        let prepared = policy.prepare(&steps, msg);
        assert_eq!(prepared.active_tools, vec!["get_tasks"]);
        assert_eq!(prepared.tool_choice, ToolChoice::Auto);
    }

    #[test]
    fn members_cue_adds_member_listing_to_selection() {
        let steps = vec![select_step(&["get_tasks"])];
        let prepared = StepPolicy::default().prepare(&steps, "what are my teammates working on");
        assert_eq!(
            prepared.active_tools,
            vec!["get_tasks", LIST_WORKSPACE_MEMBERS]
        );
        assert_eq!(prepared.tool_choice, ToolChoice::Required);
    }

    #[test]
    fn web_search_forced_once() {
        let policy = StepPolicy::default();
        let msg = "what's the current weather";

        let mut steps = vec![select_step(&[])];
        let prepared = policy.prepare(&steps, msg);
        assert_eq!(prepared.active_tools, vec![GOOGLE_SEARCH]);
        assert_eq!(prepared.tool_choice, ToolChoice::Required);

        steps.push(StepRecord::with_result(
            GOOGLE_SEARCH,
            json!({"sources": []}),
        ));
        let prepared = policy.prepare(&steps, msg);
        assert_ne!(prepared.active_tools, vec![GOOGLE_SEARCH.to_string()]);
        assert_eq!(prepared.tool_choice, ToolChoice::Auto);
    }

    #[test]
    fn render_ui_forced_until_renderable() {
        let policy = StepPolicy::default();
        let msg = "render a dashboard of sales";

        let steps = vec![select_step(&[RENDER_UI])];
        let prepared = policy.prepare(&steps, msg);
        assert_eq!(prepared.active_tools, vec![RENDER_UI]);
        assert_eq!(prepared.tool_choice, ToolChoice::Required);
    }

    #[test]
    fn renderable_output_drops_render_ui_for_good() {
        let policy = StepPolicy::default();
        let msg = "render a dashboard of sales";

        let steps = vec![
            select_step(&[RENDER_UI, "get_tasks"]),
            render_attempt(renderable_output()),
        ];
        let prepared = policy.prepare(&steps, msg);
        assert!(!prepared.active_tools.iter().any(|t| t == RENDER_UI));
        assert_eq!(prepared.active_tools, vec!["get_tasks"]);
        assert_eq!(prepared.tool_choice, ToolChoice::Auto);

        // stays dropped on every later step of the turn
        let mut steps = steps;
        steps.push(StepRecord::default());
        let prepared = policy.prepare(&steps, msg);
        assert!(!prepared.active_tools.iter().any(|t| t == RENDER_UI));
    }

    #[test]
    fn recovered_spec_does_not_end_retry_loop() {
        let policy = StepPolicy::default();
        let msg = "render a dashboard of sales";

        let mut recovered = renderable_output();
        recovered["recoveredFromInvalidSpec"] = json!(true);
        let steps = vec![select_step(&[RENDER_UI]), render_attempt(recovered)];
        let prepared = policy.prepare(&steps, msg);
        assert_eq!(prepared.active_tools, vec![RENDER_UI]);
        assert_eq!(prepared.tool_choice, ToolChoice::Required);
    }

    #[test]
    fn render_ui_retry_budget_exhausts() {
        let policy = StepPolicy::default();
        let msg = "render a dashboard of sales";

        let steps = vec![
            select_step(&[RENDER_UI]),
            render_attempt(json!({"error": "invalid spec"})),
            render_attempt(json!({"error": "invalid spec"})),
        ];
        let prepared = policy.prepare(&steps, msg);
        assert!(!prepared.active_tools.iter().any(|t| t == RENDER_UI));
        assert_eq!(prepared.tool_choice, ToolChoice::Auto);
    }

    #[test]
    fn markdown_table_preference_drops_render_ui() {
        let steps = vec![select_step(&[RENDER_UI, "get_tasks"])];
        let prepared =
            StepPolicy::default().prepare(&steps, "give me the numbers as a table, no visuals");
        assert_eq!(prepared.active_tools, vec!["get_tasks"]);
        assert_eq!(prepared.tool_choice, ToolChoice::Auto);
    }
}
