//! The provider collaborator this crate consumes.
//!
//! `Backend` is deliberately thin: one round-trip per call, no conversation
//! bookkeeping, no retry policy. Concrete provider HTTP clients are treated
//! as an external collaborator (out of scope for this crate — see
//! `cloudllm::clients::openai`/`claude`/`gemini` for what one looks like in
//! the sibling provider-plumbing crate this orchestrator is meant to sit
//! in front of).

use std::error::Error;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::message::{FinishReason, Message, TokenUsage};

/// Schema handed to a backend alongside a chat request so the model can plan
/// tool calls. Opaque to this crate: forwarded verbatim.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// One provider round-trip's result.
#[derive(Debug)]
pub struct ChatResponse {
    pub message: Box<dyn Message>,
    pub finish_reason: FinishReason,
    pub usage: Option<TokenUsage>,
}

/// The operations the orchestrator needs from a concrete provider client.
///
/// Implementations must be `Send + Sync` so a single backend can be shared
/// read-only across concurrent orchestrator calls.
#[async_trait]
pub trait Backend: Send + Sync {
    /// One provider round-trip; no looping.
    async fn chat_completion(
        &self,
        ctx: &CancellationToken,
        messages: &[Box<dyn Message>],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, Box<dyn Error + Send + Sync>>;

    /// Stable identifier used in state validation (`StateCodec::decode`
    /// discards state minted by a different provider).
    fn provider_name(&self) -> &str;

    /// Build a system-role message in this provider's wire format.
    fn new_system_message(&self, text: &str) -> Box<dyn Message>;

    /// Build a user-role message in this provider's wire format.
    fn new_user_message(&self, text: &str) -> Box<dyn Message>;

    /// Build a tool-result message echoing `tool_call_id`, in this
    /// provider's wire format.
    fn new_tool_message(&self, tool_call_id: &str, content: &str) -> Box<dyn Message>;

    /// Reconstruct a message from its raw serialized bytes (the inverse of
    /// [`Message::to_bytes`]).
    fn unmarshal_message(&self, bytes: &[u8]) -> Result<Box<dyn Message>, Box<dyn Error + Send + Sync>>;
}
