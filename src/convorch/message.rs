//! Opaque, provider-fidelity-preserving chat messages.
//!
//! Providers evolve their message envelopes (reasoning traces, citations,
//! confidence scores). Decoding into a fixed struct and re-encoding would
//! silently drop such fields, degrading subsequent turns where the provider
//! expects its own prior output echoed back verbatim. [`Message`] is
//! therefore a trait object carrying two data slots per concrete
//! implementation: a decoded view for the accessors the orchestrator needs,
//! and the raw serialized bytes for round-tripping. Forward-compatibility
//! comes from the raw-bytes slot, never from exhaustive decoding.
//!
//! [`JsonMessage`] is the crate's reference implementation for backends whose
//! wire envelope is a JSON object. Backends with a different wire shape may
//! implement [`Message`] directly instead.

use std::fmt;

use serde_json::{Map, Value};

/// Tag identifying who authored a message.
///
/// `Other` is the catch-all for role strings a future provider might
/// introduce that this crate doesn't know about yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Other(String),
}

impl Role {
    /// The wire-format string for this role, used by [`JsonMessage`] and any
    /// other JSON-envelope backend.
    pub fn as_str(&self) -> &str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::Other(raw) => raw.as_str(),
        }
    }

    /// Parse a wire-format role string, falling back to `Other` for anything
    /// unrecognized.
    pub fn from_str(raw: &str) -> Role {
        match raw {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            other => Role::Other(other.to_string()),
        }
    }
}

/// Why the provider stopped generating.
///
/// `Unknown` is a forward-compat escape hatch: the orchestrator treats it as
/// a fatal error for the current call (see [`crate::OrchestratorError::UnknownFinishReason`]),
/// since a value this crate can't interpret means the loop cannot safely
/// decide whether to continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Unknown(String),
}

/// A model-issued request to invoke a local tool.
///
/// `id` is provider-minted and must be echoed back in the corresponding
/// `tool`-role result message so the provider can correlate the two.
/// `arguments` is opaque JSON text — the library never parses it.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Token accounting for a single `chat_completion` round-trip, when the
/// provider reports it.
#[derive(Debug, Clone, Copy)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Failure constructing a [`Message`] from raw bytes.
#[derive(Debug)]
pub enum MessageError {
    /// The bytes are not valid JSON.
    InvalidJson(serde_json::Error),
    /// The JSON parsed but isn't an object, or is missing a mandatory `role`.
    MissingRole,
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::InvalidJson(e) => write!(f, "invalid message envelope: {}", e),
            MessageError::MissingRole => write!(f, "message envelope missing a \"role\" field"),
        }
    }
}

impl std::error::Error for MessageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MessageError::InvalidJson(e) => Some(e),
            MessageError::MissingRole => None,
        }
    }
}

/// Provider-specific message, opaque beyond the accessors below.
///
/// Implementations must satisfy: for any `Message` constructed from bytes
/// `b`, `to_bytes()` yields bytes semantically equivalent to `b` — all
/// fields preserved, with only whitespace/ordering allowed to differ.
/// Accessors never mutate; messages are immutable once built.
pub trait Message: Send + Sync + fmt::Debug {
    /// Who authored this message.
    fn role(&self) -> Role;
    /// The message body, if any (assistant/system/user messages with no
    /// accompanying tool calls always have one; a pure tool-call-only
    /// assistant message may not).
    fn content(&self) -> Option<&str>;
    /// Tool calls requested by the model. Non-empty only on assistant
    /// messages whose `finish_reason` was `ToolCalls`.
    fn tool_calls(&self) -> &[ToolCall];
    /// For a `tool`-role message, the id of the call it answers.
    fn tool_call_id(&self) -> Option<&str>;
    /// The canonical serialized form of this message, used by the state
    /// codec and never inspected for content by the orchestrator.
    fn to_bytes(&self) -> Result<Vec<u8>, MessageError>;
    /// Produce an owned, independent copy of this message.
    fn clone_message(&self) -> Box<dyn Message>;
}

impl Clone for Box<dyn Message> {
    fn clone(&self) -> Self {
        self.clone_message()
    }
}

/// Reference [`Message`] implementation for JSON-envelope providers.
///
/// Stores the full parsed [`serde_json::Value`] it was built from — including
/// any fields this crate doesn't know about — alongside the conventional
/// `role`/`content`/`tool_calls`/`tool_call_id` keys it decodes eagerly.
/// `to_bytes` re-serializes the stored value, so unknown fields always
/// survive a round-trip even though key ordering may change.
#[derive(Debug, Clone)]
pub struct JsonMessage {
    raw: Value,
    role: Role,
    content: Option<String>,
    tool_calls: Vec<ToolCall>,
    tool_call_id: Option<String>,
}

impl JsonMessage {
    /// Build a message from decoded parts, recording them into a fresh JSON
    /// envelope under the conventional keys.
    pub fn new(
        role: Role,
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
        tool_call_id: Option<String>,
    ) -> Self {
        let mut map = Map::new();
        map.insert("role".to_string(), Value::String(role.as_str().to_string()));
        if let Some(c) = &content {
            map.insert("content".to_string(), Value::String(c.clone()));
        }
        if !tool_calls.is_empty() {
            let calls: Vec<Value> = tool_calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.id,
                        "name": tc.name,
                        "arguments": tc.arguments,
                    })
                })
                .collect();
            map.insert("tool_calls".to_string(), Value::Array(calls));
        }
        if let Some(id) = &tool_call_id {
            map.insert("tool_call_id".to_string(), Value::String(id.clone()));
        }
        JsonMessage {
            raw: Value::Object(map),
            role,
            content,
            tool_calls,
            tool_call_id,
        }
    }

    /// Parse a message from its raw JSON bytes, decoding the conventional
    /// fields but keeping the full value around for lossless round-tripping.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        let value: Value = serde_json::from_slice(bytes).map_err(MessageError::InvalidJson)?;
        Self::from_value(value)
    }

    /// Parse a message from an already-deserialized JSON value (used by the
    /// state codec, which decodes the outer envelope once and hands each
    /// inner message value here directly instead of round-tripping through
    /// bytes twice).
    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        let role_str = value
            .get("role")
            .and_then(|v| v.as_str())
            .ok_or(MessageError::MissingRole)?;
        let role = Role::from_str(role_str);

        let content = value
            .get("content")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let tool_calls = value
            .get("tool_calls")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|entry| {
                        let id = entry.get("id")?.as_str()?.to_string();
                        let name = entry.get("name")?.as_str()?.to_string();
                        let arguments = entry
                            .get("arguments")
                            .map(|a| {
                                a.as_str()
                                    .map(|s| s.to_string())
                                    .unwrap_or_else(|| a.to_string())
                            })
                            .unwrap_or_default();
                        Some(ToolCall { id, name, arguments })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let tool_call_id = value
            .get("tool_call_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok(JsonMessage {
            raw: value,
            role,
            content,
            tool_calls,
            tool_call_id,
        })
    }

    /// The underlying JSON value, exposed so the state codec can embed it
    /// directly into the outer envelope's `messages` array without
    /// re-parsing `to_bytes()`.
    pub fn raw_value(&self) -> &Value {
        &self.raw
    }
}

impl Message for JsonMessage {
    fn role(&self) -> Role {
        self.role.clone()
    }

    fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    fn tool_call_id(&self) -> Option<&str> {
        self.tool_call_id.as_deref()
    }

    fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(&self.raw).map_err(MessageError::InvalidJson)
    }

    fn clone_message(&self) -> Box<dyn Message> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_fields() {
        let msg = JsonMessage::new(Role::User, Some("hi".to_string()), vec![], None);
        let bytes = msg.to_bytes().unwrap();
        let decoded = JsonMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.role(), Role::User);
        assert_eq!(decoded.content(), Some("hi"));
    }

    #[test]
    fn preserves_unknown_fields_across_round_trip() {
        let mut value = serde_json::json!({
            "role": "assistant",
            "content": "hello",
            "reasoning_trace": "scratch work the provider wants echoed back",
        });
        value["citations"] = serde_json::json!(["doc-1", "doc-2"]);
        let msg = JsonMessage::from_value(value).unwrap();
        let bytes = msg.to_bytes().unwrap();
        let roundtripped: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(roundtripped["reasoning_trace"], "scratch work the provider wants echoed back");
        assert_eq!(roundtripped["citations"][0], "doc-1");
    }

    #[test]
    fn missing_role_is_an_error() {
        let err = JsonMessage::from_bytes(br#"{"content": "hi"}"#).unwrap_err();
        assert!(matches!(err, MessageError::MissingRole));
    }

    #[test]
    fn tool_call_round_trips() {
        let msg = JsonMessage::new(
            Role::Assistant,
            None,
            vec![ToolCall {
                id: "t1".to_string(),
                name: "echo".to_string(),
                arguments: r#"{"input":"42"}"#.to_string(),
            }],
            None,
        );
        let bytes = msg.to_bytes().unwrap();
        let decoded = JsonMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.tool_calls().len(), 1);
        assert_eq!(decoded.tool_calls()[0].id, "t1");
        assert_eq!(decoded.tool_calls()[0].arguments, r#"{"input":"42"}"#);
    }

    #[test]
    fn unknown_role_string_becomes_other() {
        let decoded = JsonMessage::from_bytes(br#"{"role": "developer", "content": "x"}"#).unwrap();
        assert_eq!(decoded.role(), Role::Other("developer".to_string()));
    }
}
