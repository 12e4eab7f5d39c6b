use axum::Error;
use reqwest_eventsource::{Event as ReqwestEvent, EventSource};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use crate::ai::client::{GatewayClient, GatewayError};
use crate::chat::sources::{parse_google_search_sources, SearchSource};
use crate::chat::{
    PreparedStep, StepPolicy, StepRecord, StepToolCall, StepToolResult, GOOGLE_SEARCH,
};
use crate::data::model::ThinkingMode;

/// Hard cap on reasoning steps per model turn.
pub const MAX_TURN_STEPS: usize = 8;

#[derive(Debug)]
pub enum GenerationEvent {
    StepStart(usize),
    Text(String),
    Reasoning(String),
    ToolCall(StepToolCall),
    ToolResult(StepToolResult),
    Sources(Vec<SearchSource>),
    Usage(UsageInfo),
    End,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageInfo {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub role: String,
    pub content: String,
}

/// Everything one model turn needs besides the event channel.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub model: String,
    pub messages: Vec<GatewayMessage>,
    pub latest_user_message: String,
    pub thinking_mode: ThinkingMode,
    pub timezone: Option<String>,
    pub policy: StepPolicy,
}

pub const STREAM_PATH: &str = "/v1/responses/stream";

fn step_body(request: &TurnRequest, prepared: &PreparedStep, steps: &[StepRecord]) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": request.messages,
        "stream": true,
        "thinking": matches!(request.thinking_mode, ThinkingMode::Thinking),
    });
    if let Some(tz) = &request.timezone {
        body["timezone"] = json!(tz);
    }
    if !prepared.active_tools.is_empty() {
        body["tools"] = json!(prepared.active_tools);
        body["toolChoice"] = json!(prepared.tool_choice);
    }
    // The gateway is stateless across steps: it only sees the tool calls
    // and results of this turn if we post them back.
    if !steps.is_empty() {
        body["steps"] = json!(steps);
    }
    body
}

/// Open the gateway stream for the first step. Kept separate so the route
/// can fail with a proper status before any SSE bytes go out.
pub async fn open_first_step(
    client: &GatewayClient,
    request: &TurnRequest,
) -> Result<EventSource, GatewayError> {
    let prepared = request.policy.prepare(&[], &request.latest_user_message);
    client
        .open_stream(STREAM_PATH, &step_body(request, &prepared, &[]))
        .await
}

/// Run the tool-call step loop for one turn, forwarding deltas as they
/// arrive. Tool execution happens inside the gateway runtime; each step we
/// only decide which tools it may reach for.
pub async fn generate_turn_stream(
    client: &GatewayClient,
    request: TurnRequest,
    first_step: EventSource,
    sender: mpsc::Sender<Result<GenerationEvent, Error>>,
) {
    let mut steps: Vec<StepRecord> = Vec::new();
    let mut pending = Some(first_step);

    for step_index in 0..MAX_TURN_STEPS {
        let prepared = request
            .policy
            .prepare(&steps, &request.latest_user_message);
        tracing::debug!(
            step = step_index,
            tools = ?prepared.active_tools,
            choice = ?prepared.tool_choice,
            "prepared tool step"
        );

        if sender
            .send(Ok(GenerationEvent::StepStart(step_index)))
            .await
            .is_err()
        {
            return;
        }

        let stream = match pending.take() {
            Some(stream) => stream,
            None => {
                let body = step_body(&request, &prepared, &steps);
                match client.open_stream(STREAM_PATH, &body).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::error!("gateway step open failed: {}", e);
                        let _ = sender.send(Err(Error::new(e))).await;
                        return;
                    }
                }
            }
        };

        let Some(outcome) = run_step(stream, &sender).await else {
            // receiver went away mid-stream
            return;
        };

        let finished_with_tools = outcome.finish_reason.as_deref() == Some("tool-calls")
            || !outcome.record.tool_results.is_empty();
        steps.push(outcome.record);

        if !finished_with_tools {
            break;
        }
    }

    let _ = sender.send(Ok(GenerationEvent::End)).await;
}

struct StepOutcome {
    record: StepRecord,
    finish_reason: Option<String>,
}

/// Consume one gateway SSE stream, forwarding deltas and accumulating the
/// step record. Returns None when the event receiver was dropped.
async fn run_step(
    mut stream: EventSource,
    sender: &mpsc::Sender<Result<GenerationEvent, Error>>,
) -> Option<StepOutcome> {
    let mut record = StepRecord::default();
    let mut finish_reason: Option<String> = None;

    while let Some(event) = stream.next().await {
        match event {
            Ok(ReqwestEvent::Open) => {}
            Ok(ReqwestEvent::Message(message)) => {
                if message.data.trim() == "[DONE]" {
                    stream.close();
                    break;
                }
                let Ok(parsed) = serde_json::from_str::<Value>(&message.data) else {
                    continue;
                };
                let forwarded = match parsed["type"].as_str() {
                    Some("text-delta") => parsed["delta"]
                        .as_str()
                        .map(|t| GenerationEvent::Text(t.to_string())),
                    Some("reasoning-delta") => parsed["delta"]
                        .as_str()
                        .map(|t| GenerationEvent::Reasoning(t.to_string())),
                    Some("tool-call") => {
                        let call = StepToolCall {
                            name: parsed["name"].as_str().unwrap_or_default().to_string(),
                            call_id: parsed["callId"].as_str().unwrap_or_default().to_string(),
                            input: parsed["input"].clone(),
                        };
                        record.tool_calls.push(call.clone());
                        Some(GenerationEvent::ToolCall(call))
                    }
                    Some("tool-result") => {
                        let result = StepToolResult {
                            name: parsed["name"].as_str().unwrap_or_default().to_string(),
                            call_id: parsed["callId"].as_str().unwrap_or_default().to_string(),
                            output: parsed["output"].clone(),
                        };
                        record.tool_results.push(result.clone());
                        if result.name == GOOGLE_SEARCH {
                            let sources = parse_google_search_sources(&result.output);
                            if !sources.is_empty()
                                && sender
                                    .send(Ok(GenerationEvent::Sources(sources)))
                                    .await
                                    .is_err()
                            {
                                return None;
                            }
                        }
                        Some(GenerationEvent::ToolResult(result))
                    }
                    Some("usage") => serde_json::from_value::<UsageInfo>(parsed.clone())
                        .ok()
                        .map(GenerationEvent::Usage),
                    Some("finish") => {
                        finish_reason = parsed["reason"].as_str().map(str::to_string);
                        None
                    }
                    _ => None,
                };
                if let Some(event) = forwarded {
                    if sender.send(Ok(event)).await.is_err() {
                        stream.close();
                        return None;
                    }
                }
            }
            Err(err) => {
                tracing::error!("gateway stream error: {}", err);
                stream.close();
                if sender.send(Err(Error::new(err))).await.is_err() {
                    return None;
                }
                break;
            }
        }
    }

    Some(StepOutcome {
        record,
        finish_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::SELECT_TOOLS;

    #[test]
    fn usage_parses_gateway_payload() {
        let parsed: UsageInfo = serde_json::from_value(json!({
            "type": "usage",
            "promptTokens": 120,
            "completionTokens": 48,
            "totalTokens": 168
        }))
        .unwrap();
        assert_eq!(parsed.total_tokens, 168);
    }

    fn request_for(policy: StepPolicy) -> TurnRequest {
        TurnRequest {
            model: "gemini-2.5-flash".to_string(),
            messages: vec![GatewayMessage {
                role: "user".to_string(),
                content: "hello".to_string(),
            }],
            latest_user_message: "hello".to_string(),
            thinking_mode: ThinkingMode::Fast,
            timezone: None,
            policy,
        }
    }

    #[test]
    fn first_step_body_forces_select_tools() {
        let policy = StepPolicy::default();
        let prepared = policy.prepare(&[], "hello");
        assert_eq!(prepared.active_tools, vec![SELECT_TOOLS.to_string()]);
        let choice = serde_json::to_value(prepared.tool_choice).unwrap();
        assert_eq!(choice, json!("required"));

        let request = request_for(policy);
        let body = step_body(&request, &prepared, &[]);
        assert!(body.get("steps").is_none());
    }

    #[test]
    fn later_step_bodies_carry_prior_tool_results() {
        let policy = StepPolicy::default();
        let steps = vec![StepRecord::with_result(
            SELECT_TOOLS,
            json!({"tools": ["get_tasks"]}),
        )];
        let prepared = policy.prepare(&steps, "hello");
        let request = request_for(policy);

        let body = step_body(&request, &prepared, &steps);
        assert_eq!(body["steps"][0]["toolResults"][0]["name"], SELECT_TOOLS);
        assert_eq!(
            body["steps"][0]["toolCalls"][0]["callId"],
            "call_select_tools"
        );
    }
}
