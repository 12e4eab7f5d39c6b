use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::{sse::Event, IntoResponse, Response, Sse},
    Json,
};
use futures::stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::ai::client::GatewayError;
use crate::ai::stream::{
    generate_turn_stream, open_first_step, GatewayMessage, GenerationEvent, TurnRequest, UsageInfo,
};
use crate::chat::sources::{is_http_url, SearchSource};
use crate::chat::{StepPolicy, StepToolCall, StepToolResult};
use crate::data::model::{
    is_supported_model, ChatRequestBody, CreditSource, MessagePart, Role, ThinkingMode, UiMessage,
    User, DEFAULT_MODEL,
};
use crate::AppState;

/// At most this many messages are forwarded to the gateway (most recent
/// first dropped-from-the-front).
pub const MAX_CONTEXT_MESSAGES: usize = 30;
pub const MAX_MESSAGE_CHARS: usize = 10_000;

/// Credits charged per started thousand tokens, minimum one per turn.
const CREDITS_PER_KILOTOKEN: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),
    #[error("user not authenticated")]
    MissingUser,
    #[error("workspace access denied")]
    WorkspaceForbidden,
    #[error("insufficient credits")]
    InsufficientCredits,
    #[error("chat not found")]
    ChatNotFound,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ChatError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ChatError::UnsupportedModel(model) => (
                StatusCode::BAD_REQUEST,
                format!("Unsupported model: {}", model),
            ),
            ChatError::MissingUser => (
                StatusCode::UNAUTHORIZED,
                "Not authenticated".to_string(),
            ),
            ChatError::WorkspaceForbidden => (
                StatusCode::FORBIDDEN,
                "Workspace access denied".to_string(),
            ),
            ChatError::InsufficientCredits => (
                StatusCode::PAYMENT_REQUIRED,
                "Insufficient credits".to_string(),
            ),
            ChatError::ChatNotFound => (StatusCode::NOT_FOUND, "Chat not found".to_string()),
            ChatError::Gateway(e) => {
                tracing::error!("gateway error: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "Model gateway unavailable".to_string(),
                )
            }
            ChatError::Database(e) => {
                tracing::error!("database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// What survives request validation: the gateway-facing message window and
/// the turn parameters.
#[derive(Debug, Clone)]
pub struct ValidatedTurn {
    pub model: String,
    pub gateway_messages: Vec<GatewayMessage>,
    pub latest_user_message: String,
    pub thinking_mode: ThinkingMode,
    pub timezone: Option<String>,
}

fn message_text(message: &UiMessage) -> String {
    let mut out = String::new();
    for part in &message.parts {
        if let MessagePart::Text { text } = part {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(text);
        }
    }
    out
}

/// Validate the wire body: part kinds are already a closed union at the
/// serde layer, so what remains is URL strictness, size caps and the
/// context window.
pub fn validate_request(body: &ChatRequestBody) -> Result<ValidatedTurn, ChatError> {
    let model = body.model.as_deref().unwrap_or(DEFAULT_MODEL);
    if !is_supported_model(model) {
        return Err(ChatError::UnsupportedModel(model.to_string()));
    }

    for message in &body.messages {
        let mut chars = 0usize;
        for part in &message.parts {
            match part {
                MessagePart::Text { text } | MessagePart::Reasoning { text } => {
                    chars += text.chars().count();
                }
                MessagePart::SourceUrl { url, .. } => {
                    if !is_http_url(url) {
                        return Err(ChatError::BadRequest(format!(
                            "source url must be absolute http(s): {}",
                            url
                        )));
                    }
                }
                MessagePart::StepStart | MessagePart::DynamicTool { .. } => {}
            }
        }
        if chars > MAX_MESSAGE_CHARS {
            return Err(ChatError::BadRequest(format!(
                "message exceeds {} characters",
                MAX_MESSAGE_CHARS
            )));
        }
    }

    let window_start = body.messages.len().saturating_sub(MAX_CONTEXT_MESSAGES);
    let window = &body.messages[window_start..];

    let latest_user_message = window
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(message_text)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ChatError::BadRequest("no user message in request".to_string()))?;

    let gateway_messages = window
        .iter()
        .map(|m| GatewayMessage {
            role: m.role.as_str().to_string(),
            content: message_text(m),
        })
        .filter(|m| !m.content.is_empty())
        .collect();

    Ok(ValidatedTurn {
        model: model.to_string(),
        gateway_messages,
        latest_user_message,
        thinking_mode: body.thinking_mode.unwrap_or_default(),
        timezone: body.timezone.clone(),
    })
}

/// Which pool funds this request. Workspace billing needs a workspace id;
/// without one the request falls back to the personal pool.
fn resolve_credit_pool(body: &ChatRequestBody, user: &User) -> (CreditSource, String) {
    let source = body.credit_source.unwrap_or_default();
    match source {
        CreditSource::Workspace => {
            let ws = body.credit_ws_id.clone().or_else(|| body.ws_id.clone());
            match ws {
                Some(ws_id) => (CreditSource::Workspace, ws_id),
                None => (CreditSource::Personal, user.id.to_string()),
            }
        }
        CreditSource::Personal => (CreditSource::Personal, user.id.to_string()),
    }
}

pub fn debit_for_usage(usage: Option<&UsageInfo>) -> i64 {
    match usage {
        Some(u) => (((u.total_tokens as i64) + 999) / 1000).max(CREDITS_PER_KILOTOKEN),
        None => CREDITS_PER_KILOTOKEN,
    }
}

// --- handlers ------------------------------------------------------------

#[axum::debug_handler]
pub async fn list_chats(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<Option<User>>,
) -> Result<Json<serde_json::Value>, ChatError> {
    let user = current_user.ok_or(ChatError::MissingUser)?;
    let chats = state.chat_repo.get_all_chats(user.id).await?;
    Ok(Json(json!({ "chats": chats })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChatRequest {
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub ws_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NewChatResponse {
    pub id: String,
    pub title: String,
}

#[axum::debug_handler]
pub async fn new_chat(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<Option<User>>,
    Json(request): Json<NewChatRequest>,
) -> Result<Json<NewChatResponse>, ChatError> {
    let user = current_user.ok_or(ChatError::MissingUser)?;
    if request.message.trim().is_empty() {
        return Err(ChatError::BadRequest("message cannot be empty".to_string()));
    }
    let model = request.model.as_deref().unwrap_or(DEFAULT_MODEL);
    if !is_supported_model(model) {
        return Err(ChatError::UnsupportedModel(model.to_string()));
    }
    if let Some(ws_id) = &request.ws_id {
        if !state.chat_repo.is_workspace_member(ws_id, user.id).await? {
            return Err(ChatError::WorkspaceForbidden);
        }
    }

    let chat = state
        .chat_repo
        .create_chat(user.id, request.ws_id.as_deref(), &request.message, model)
        .await?;
    state
        .chat_repo
        .add_user_message(&chat.id, &request.message)
        .await?;

    Ok(Json(NewChatResponse {
        id: chat.id,
        title: chat.title,
    }))
}

#[axum::debug_handler]
pub async fn get_chat(
    Path(chat_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<Option<User>>,
) -> Result<Json<serde_json::Value>, ChatError> {
    let user = current_user.ok_or(ChatError::MissingUser)?;
    let chat = state
        .chat_repo
        .get_chat(&chat_id)
        .await?
        .ok_or(ChatError::ChatNotFound)?;
    if chat.user_id != user.id && !chat.is_public {
        return Err(ChatError::ChatNotFound);
    }

    let records = state.chat_repo.recent_messages(&chat_id, 200).await?;
    let parse = |s: &Option<String>| -> serde_json::Value {
        s.as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or(serde_json::Value::Null)
    };
    let messages: Vec<serde_json::Value> = records
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "role": r.role,
                "content": r.content,
                "metadata": {
                    "reasoning": r.reasoning,
                    "toolCalls": parse(&r.tool_calls),
                    "toolResults": parse(&r.tool_results),
                    "sources": parse(&r.sources),
                },
                "createdAt": r.created_at,
            })
        })
        .collect();

    Ok(Json(json!({ "chat": chat, "messages": messages })))
}

#[axum::debug_handler]
pub async fn delete_chat(
    Path(chat_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<Option<User>>,
) -> Result<StatusCode, ChatError> {
    let user = current_user.ok_or(ChatError::MissingUser)?;
    let chat = state
        .chat_repo
        .get_chat(&chat_id)
        .await?
        .ok_or(ChatError::ChatNotFound)?;
    if chat.user_id != user.id {
        return Err(ChatError::ChatNotFound);
    }
    state.chat_repo.delete_chat(&chat_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Accumulates the assistant message while deltas stream out, so the
// finished message can be persisted in one piece.
#[derive(Clone, Default)]
struct MessageAccumulator {
    text: String,
    reasoning: String,
    tool_calls: Vec<StepToolCall>,
    tool_results: Vec<StepToolResult>,
    sources: Vec<SearchSource>,
    usage: Option<UsageInfo>,
}

#[axum::debug_handler]
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<Option<User>>,
    Json(body): Json<ChatRequestBody>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, axum::Error>>>, ChatError> {
    let user = current_user.ok_or(ChatError::MissingUser)?;
    let turn = validate_request(&body)?;

    if let Some(ws_id) = &body.ws_id {
        if !state.chat_repo.is_workspace_member(ws_id, user.id).await? {
            return Err(ChatError::WorkspaceForbidden);
        }
    }

    let (credit_source, credit_owner) = resolve_credit_pool(&body, &user);
    if credit_source == CreditSource::Workspace
        && Some(&credit_owner) != body.ws_id.as_ref()
        && !state
            .chat_repo
            .is_workspace_member(&credit_owner, user.id)
            .await?
    {
        return Err(ChatError::WorkspaceForbidden);
    }
    if state
        .chat_repo
        .credit_balance(credit_source, &credit_owner)
        .await?
        <= 0
    {
        return Err(ChatError::InsufficientCredits);
    }

    // resolve the chat before touching the gateway, so a bad id is a 404
    // and not a wasted model call
    let existing = match &body.id {
        Some(id) => {
            let chat = state
                .chat_repo
                .get_chat(id)
                .await?
                .ok_or(ChatError::ChatNotFound)?;
            if chat.user_id != user.id {
                return Err(ChatError::ChatNotFound);
            }
            Some(chat)
        }
        None => None,
    };

    let turn_request = TurnRequest {
        model: turn.model.clone(),
        messages: turn.gateway_messages,
        latest_user_message: turn.latest_user_message.clone(),
        thinking_mode: turn.thinking_mode,
        timezone: turn.timezone,
        policy: StepPolicy::default(),
    };
    let first_step = open_first_step(state.gateway.as_ref(), &turn_request).await?;

    let chat = match existing {
        Some(chat) => chat,
        None => {
            state
                .chat_repo
                .create_chat(
                    user.id,
                    body.ws_id.as_deref(),
                    &turn.latest_user_message,
                    &turn.model,
                )
                .await?
        }
    };

    state
        .chat_repo
        .add_user_message(&chat.id, &turn.latest_user_message)
        .await?;

    let (sender, receiver) = mpsc::channel::<Result<GenerationEvent, axum::Error>>(16);
    let gateway = state.gateway.clone();
    tokio::spawn(async move {
        generate_turn_stream(&gateway, turn_request, first_step, sender).await;
    });

    let ctx = Arc::new(PersistCtx {
        state: Arc::clone(&state),
        chat_id: chat.id.clone(),
        credit_source,
        credit_owner,
    });
    let receiver_stream = ReceiverStream::new(receiver);
    let initial = (receiver_stream, MessageAccumulator::default());

    let event_stream = stream::unfold(initial, move |(mut rc, mut acc)| {
        let ctx = Arc::clone(&ctx);
        async move {
            match rc.next().await {
                Some(Ok(event)) => {
                    let payload = match event {
                        GenerationEvent::StepStart(step) => {
                            json!({"type": "step-start", "step": step})
                        }
                        GenerationEvent::Text(delta) => {
                            acc.text.push_str(&delta);
                            json!({"type": "text-delta", "delta": delta})
                        }
                        GenerationEvent::Reasoning(delta) => {
                            acc.reasoning.push_str(&delta);
                            json!({"type": "reasoning-delta", "delta": delta})
                        }
                        GenerationEvent::ToolCall(call) => {
                            let payload = json!({
                                "type": "tool-call",
                                "toolName": call.name,
                                "toolCallId": call.call_id,
                                "input": call.input,
                            });
                            acc.tool_calls.push(call);
                            payload
                        }
                        GenerationEvent::ToolResult(result) => {
                            let payload = json!({
                                "type": "tool-result",
                                "toolName": result.name,
                                "toolCallId": result.call_id,
                                "output": result.output,
                            });
                            acc.tool_results.push(result);
                            payload
                        }
                        GenerationEvent::Sources(sources) => {
                            let payload = json!({"type": "sources", "sources": sources});
                            acc.sources.extend(sources);
                            payload
                        }
                        GenerationEvent::Usage(usage) => {
                            let payload = json!({
                                "type": "usage",
                                "promptTokens": usage.prompt_tokens,
                                "completionTokens": usage.completion_tokens,
                                "totalTokens": usage.total_tokens,
                            });
                            acc.usage = Some(usage);
                            payload
                        }
                        GenerationEvent::End => {
                            persist_turn(&ctx, &acc).await;
                            let event = Event::default()
                                .event("close")
                                .json_data(json!({"type": "finish"}));
                            return Some((event, (rc, acc)));
                        }
                    };
                    Some((Event::default().json_data(payload), (rc, acc)))
                }
                Some(Err(e)) => Some((Err(e), (rc, acc))),
                None => None,
            }
        }
    });

    Ok(Sse::new(event_stream))
}

struct PersistCtx {
    state: Arc<AppState>,
    chat_id: String,
    credit_source: CreditSource,
    credit_owner: String,
}

async fn persist_turn(ctx: &PersistCtx, acc: &MessageAccumulator) {
    let encode = |present: bool, v: serde_json::Result<String>| -> Option<String> {
        if present {
            v.ok()
        } else {
            None
        }
    };
    let tool_calls = encode(
        !acc.tool_calls.is_empty(),
        serde_json::to_string(&acc.tool_calls),
    );
    let tool_results = encode(
        !acc.tool_results.is_empty(),
        serde_json::to_string(&acc.tool_results),
    );
    let sources = encode(!acc.sources.is_empty(), serde_json::to_string(&acc.sources));

    if let Err(e) = ctx
        .state
        .chat_repo
        .add_assistant_message(
            &ctx.chat_id,
            &acc.text,
            (!acc.reasoning.is_empty()).then_some(acc.reasoning.as_str()),
            tool_calls.as_deref(),
            tool_results.as_deref(),
            sources.as_deref(),
        )
        .await
    {
        tracing::error!("failed to persist assistant message: {}", e);
    }

    let debit = debit_for_usage(acc.usage.as_ref());
    if let Err(e) = ctx
        .state
        .chat_repo
        .record_credit_usage(ctx.credit_source, &ctx.credit_owner, debit, "chat turn")
        .await
    {
        tracing::error!("failed to record credit usage: {}", e);
    }
}
