use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A chat session. Thin record; the messages live in `chat_messages`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Chat {
    pub id: String,
    pub user_id: i64,
    pub ws_id: Option<String>,
    pub title: String,
    pub model: String,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A message as assembled on the client from streaming deltas: an ordered
/// sequence of typed parts. Immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UiMessage {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
}

/// Closed tagged union of wire message parts. Anything else on the wire is
/// rejected at deserialization time.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    StepStart,
    DynamicTool {
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        state: ToolPartState,
        #[serde(default)]
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
    SourceUrl {
        #[serde(rename = "sourceId")]
        source_id: String,
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ToolPartState {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "output-available")]
    OutputAvailable,
    #[serde(rename = "output-error")]
    OutputError,
}

/// File attachment metadata. The bytes live in external object storage;
/// signed-URL plumbing is out of scope here.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageFileAttachment {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    pub storage_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingMode {
    Fast,
    Thinking,
}

impl Default for ThinkingMode {
    fn default() -> Self {
        ThinkingMode::Fast
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CreditSource {
    Workspace,
    Personal,
}

impl Default for CreditSource {
    fn default() -> Self {
        CreditSource::Workspace
    }
}

/// Wire contract of `POST /api/v1/chat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestBody {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<UiMessage>,
    #[serde(default)]
    pub ws_id: Option<String>,
    #[serde(default)]
    pub is_mira_mode: Option<bool>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub thinking_mode: Option<ThinkingMode>,
    #[serde(default)]
    pub credit_source: Option<CreditSource>,
    #[serde(default)]
    pub credit_ws_id: Option<String>,
}

/// Persisted message row. Metadata columns hold JSON.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatMessageRecord {
    pub id: i64,
    pub chat_id: String,
    pub role: String,
    pub content: String,
    pub reasoning: Option<String>,
    pub tool_calls: Option<String>,
    pub tool_results: Option<String>,
    pub sources: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Entry of the model catalog exposed at `GET /api/v1/models`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub provider: &'static str,
    pub context_length: u32,
    pub supports_thinking: bool,
}

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

pub const SUPPORTED_MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "gemini-2.5-flash",
        name: "Gemini 2.5 Flash",
        provider: "google",
        context_length: 1_048_576,
        supports_thinking: true,
    },
    ModelInfo {
        id: "gemini-2.5-pro",
        name: "Gemini 2.5 Pro",
        provider: "google",
        context_length: 1_048_576,
        supports_thinking: true,
    },
    ModelInfo {
        id: "gpt-4o-mini",
        name: "GPT-4o mini",
        provider: "openai",
        context_length: 128_000,
        supports_thinking: false,
    },
    ModelInfo {
        id: "claude-sonnet-4",
        name: "Claude Sonnet 4",
        provider: "anthropic",
        context_length: 200_000,
        supports_thinking: true,
    },
];

pub fn is_supported_model(id: &str) -> bool {
    SUPPORTED_MODELS.iter().any(|m| m.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_part_rejects_unknown_kind() {
        let err = serde_json::from_str::<MessagePart>(r#"{"type":"video","url":"x"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn dynamic_tool_part_round_trips_wire_names() {
        let json = r#"{
            "type": "dynamic-tool",
            "toolName": "google_search",
            "toolCallId": "call_1",
            "state": "output-available",
            "input": {"query": "rust"},
            "output": {"sources": []}
        }"#;
        let part: MessagePart = serde_json::from_str(json).unwrap();
        match &part {
            MessagePart::DynamicTool {
                tool_name, state, ..
            } => {
                assert_eq!(tool_name, "google_search");
                assert_eq!(*state, ToolPartState::OutputAvailable);
            }
            other => panic!("unexpected part: {:?}", other),
        }
        let back = serde_json::to_value(&part).unwrap();
        assert_eq!(back["toolCallId"], "call_1");
    }

    #[test]
    fn request_body_defaults_are_permissive() {
        let body: ChatRequestBody = serde_json::from_str("{}").unwrap();
        assert!(body.id.is_none());
        assert!(body.messages.is_empty());
        assert!(body.thinking_mode.is_none());
    }

    #[test]
    fn model_catalog_contains_default() {
        assert!(is_supported_model(DEFAULT_MODEL));
        assert!(!is_supported_model("gpt-2"));
    }
}
