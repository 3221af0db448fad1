//! Pluggable control over unbounded conversation-history growth.
//!
//! Mirrors `context_strategy.rs`'s split between deciding *when* to act and
//! *how* to act, but generalizes it into three composable pieces instead of
//! one monolithic trait: [`Trigger`] ("is it time?"), [`Strategy`] ("do it"),
//! and [`Compactor`] (the two combined, plus the `Composite*` combinators
//! that let callers chain several of them).

use async_trait::async_trait;
use std::error::Error;

use crate::backend::Backend;
use crate::message::{Message, Role, TokenUsage};

/// Everything a [`Trigger`]/[`Strategy`]/[`Compactor`] needs to make its
/// decision.
pub struct CompactionRequest<'a> {
    /// Conversation history, excluding the leading system preamble.
    pub history: &'a [Box<dyn Message>],
    /// The leading system preamble, for reference only — compactors never
    /// alter it.
    pub preamble: &'a [Box<dyn Message>],
    /// Token usage from the most recent model call of this turn, if the
    /// provider reported one.
    pub last_usage: Option<TokenUsage>,
    /// Count of `history` messages the provider has already observed in a
    /// prior completion call. Built-in compactors ignore this; it's threaded
    /// through for future strategies that differentiate seen-history from
    /// pending annotations.
    pub processed_length: usize,
    /// Handle to the backend, for provider-aware strategies (e.g. one that
    /// summarizes via an LLM call).
    pub backend: &'a dyn Backend,
}

/// Result of a compaction attempt.
pub struct CompactionResponse {
    pub history: Vec<Box<dyn Message>>,
    pub was_compacted: bool,
}

impl CompactionResponse {
    fn unchanged(history: &[Box<dyn Message>]) -> Self {
        CompactionResponse {
            history: history.iter().map(|m| m.clone_message()).collect(),
            was_compacted: false,
        }
    }
}

/// Decides *when* to compact.
pub trait Trigger: Send + Sync {
    fn should_compact(&self, request: &CompactionRequest<'_>) -> bool;
}

/// Decides *how* to compact. `async` so a future summarizing strategy can
/// call back into the backend; the built-in strategies never actually await.
#[async_trait]
pub trait Strategy: Send + Sync {
    async fn compact_messages(&self, request: &CompactionRequest<'_>) -> CompactionResponse;
}

/// A pluggable component that may shorten history at the end of a
/// successful turn.
#[async_trait]
pub trait Compactor: Send + Sync {
    async fn compact(
        &self,
        request: &CompactionRequest<'_>,
    ) -> Result<CompactionResponse, Box<dyn Error + Send + Sync>>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &str;
}

/// After any front-trim, the result must start at a `user`-role message —
/// providers reject histories that begin mid-exchange (e.g. a tool result
/// with no preceding tool call). If no user message remains, the sequence
/// collapses to empty; user boundaries are always safe restart points.
pub fn advance_to_user_boundary(history: Vec<Box<dyn Message>>) -> Vec<Box<dyn Message>> {
    match history.iter().position(|m| m.role() == Role::User) {
        Some(idx) => history.into_iter().skip(idx).collect(),
        None => Vec::new(),
    }
}

/// Pairs one [`Trigger`] with one [`Strategy`].
pub struct SplitCompactor {
    trigger: Box<dyn Trigger>,
    strategy: Box<dyn Strategy>,
    name: String,
}

impl SplitCompactor {
    pub fn new(name: impl Into<String>, trigger: Box<dyn Trigger>, strategy: Box<dyn Strategy>) -> Self {
        SplitCompactor {
            trigger,
            strategy,
            name: name.into(),
        }
    }
}

#[async_trait]
impl Compactor for SplitCompactor {
    async fn compact(
        &self,
        request: &CompactionRequest<'_>,
    ) -> Result<CompactionResponse, Box<dyn Error + Send + Sync>> {
        if self.trigger.should_compact(request) {
            Ok(self.strategy.compact_messages(request).await)
        } else {
            Ok(CompactionResponse::unchanged(request.history))
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Returns `true` if any contained trigger does.
pub struct CompositeTrigger {
    triggers: Vec<Box<dyn Trigger>>,
}

impl CompositeTrigger {
    pub fn new(triggers: Vec<Box<dyn Trigger>>) -> Self {
        CompositeTrigger { triggers }
    }
}

impl Trigger for CompositeTrigger {
    fn should_compact(&self, request: &CompactionRequest<'_>) -> bool {
        self.triggers.iter().any(|t| t.should_compact(request))
    }
}

/// Tries a list of compactors in order, returning the first that reports
/// `was_compacted = true`. No-op if none do.
pub struct CompositeCompactor {
    compactors: Vec<Box<dyn Compactor>>,
}

impl CompositeCompactor {
    pub fn new(compactors: Vec<Box<dyn Compactor>>) -> Self {
        CompositeCompactor { compactors }
    }
}

#[async_trait]
impl Compactor for CompositeCompactor {
    async fn compact(
        &self,
        request: &CompactionRequest<'_>,
    ) -> Result<CompactionResponse, Box<dyn Error + Send + Sync>> {
        for compactor in &self.compactors {
            let response = compactor.compact(request).await?;
            if response.was_compacted {
                return Ok(response);
            }
        }
        Ok(CompactionResponse::unchanged(request.history))
    }

    fn name(&self) -> &str {
        "CompositeCompactor"
    }
}

// ---------------------------------------------------------------------------
// MessageLimitCompactor
// ---------------------------------------------------------------------------

struct MessageLimitTrigger {
    max_messages: usize,
}

impl Trigger for MessageLimitTrigger {
    fn should_compact(&self, request: &CompactionRequest<'_>) -> bool {
        self.max_messages > 0 && request.history.len() > self.max_messages
    }
}

struct MessageLimitStrategy {
    max_messages: usize,
}

#[async_trait]
impl Strategy for MessageLimitStrategy {
    async fn compact_messages(&self, request: &CompactionRequest<'_>) -> CompactionResponse {
        let history = request.history;
        let start = history.len().saturating_sub(self.max_messages);
        let trimmed: Vec<Box<dyn Message>> = history[start..].iter().map(|m| m.clone_message()).collect();
        let bounded = advance_to_user_boundary(trimmed);
        CompactionResponse {
            was_compacted: true,
            history: bounded,
        }
    }
}

/// Triggers when `max_messages > 0 ∧ |history| > max_messages`. Strategy:
/// keep the last `max_messages` elements, then advance to the first
/// user-role message.
pub struct MessageLimitCompactor {
    inner: SplitCompactor,
}

impl MessageLimitCompactor {
    pub fn new(max_messages: usize) -> Self {
        MessageLimitCompactor {
            inner: SplitCompactor::new(
                "MessageLimitCompactor",
                Box::new(MessageLimitTrigger { max_messages }),
                Box::new(MessageLimitStrategy { max_messages }),
            ),
        }
    }
}

#[async_trait]
impl Compactor for MessageLimitCompactor {
    async fn compact(
        &self,
        request: &CompactionRequest<'_>,
    ) -> Result<CompactionResponse, Box<dyn Error + Send + Sync>> {
        self.inner.compact(request).await
    }

    fn name(&self) -> &str {
        "MessageLimitCompactor"
    }
}

// ---------------------------------------------------------------------------
// TokenLimitCompactor
// ---------------------------------------------------------------------------

struct TokenLimitTrigger {
    max_tokens: u64,
}

impl Trigger for TokenLimitTrigger {
    fn should_compact(&self, request: &CompactionRequest<'_>) -> bool {
        self.max_tokens > 0
            && request
                .last_usage
                .map(|u| u.prompt_tokens > self.max_tokens)
                .unwrap_or(false)
    }
}

struct TokenLimitStrategy;

#[async_trait]
impl Strategy for TokenLimitStrategy {
    async fn compact_messages(&self, request: &CompactionRequest<'_>) -> CompactionResponse {
        let history = request.history;
        if history.len() <= 2 {
            return CompactionResponse::unchanged(history);
        }
        let drop_count = (history.len() / 3).max(1);
        let trimmed: Vec<Box<dyn Message>> = history[drop_count..].iter().map(|m| m.clone_message()).collect();
        let bounded = advance_to_user_boundary(trimmed);
        CompactionResponse {
            was_compacted: true,
            history: bounded,
        }
    }
}

/// Triggers when usage is present and `prompt_tokens > max_tokens > 0`.
/// Strategy: drop the oldest third of messages (floor, minimum 1) — unless
/// history has ≤ 2 messages, in which case no-op — then advance to the first
/// user-role message.
///
/// `target_tokens` defaults to `max_tokens * 3 / 4` when left at zero; it is
/// threaded through for callers who want to query the configured target, but
/// the coarse "drop 1/3" heuristic doesn't currently consume it directly
/// (no per-message token counts are available — see `spec.md`'s Open
/// Questions).
pub struct TokenLimitCompactor {
    inner: SplitCompactor,
    pub max_tokens: u64,
    pub target_tokens: u64,
}

impl TokenLimitCompactor {
    pub fn new(max_tokens: u64, target_tokens: u64) -> Self {
        let target_tokens = if target_tokens == 0 {
            max_tokens * 3 / 4
        } else {
            target_tokens
        };
        TokenLimitCompactor {
            inner: SplitCompactor::new(
                "TokenLimitCompactor",
                Box::new(TokenLimitTrigger { max_tokens }),
                Box::new(TokenLimitStrategy),
            ),
            max_tokens,
            target_tokens,
        }
    }
}

#[async_trait]
impl Compactor for TokenLimitCompactor {
    async fn compact(
        &self,
        request: &CompactionRequest<'_>,
    ) -> Result<CompactionResponse, Box<dyn Error + Send + Sync>> {
        self.inner.compact(request).await
    }

    fn name(&self) -> &str {
        "TokenLimitCompactor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::JsonMessage;
    use async_trait::async_trait as _async_trait;
    use std::error::Error as StdError;
    use tokio_util::sync::CancellationToken;

    struct StubBackend;

    #[_async_trait]
    impl Backend for StubBackend {
        async fn chat_completion(
            &self,
            _ctx: &CancellationToken,
            _messages: &[Box<dyn Message>],
            _tools: &[crate::backend::ToolDefinition],
        ) -> Result<crate::backend::ChatResponse, Box<dyn StdError + Send + Sync>> {
            unreachable!()
        }
        fn provider_name(&self) -> &str {
            "stub"
        }
        fn new_system_message(&self, text: &str) -> Box<dyn Message> {
            Box::new(JsonMessage::new(Role::System, Some(text.to_string()), vec![], None))
        }
        fn new_user_message(&self, text: &str) -> Box<dyn Message> {
            Box::new(JsonMessage::new(Role::User, Some(text.to_string()), vec![], None))
        }
        fn new_tool_message(&self, id: &str, content: &str) -> Box<dyn Message> {
            Box::new(JsonMessage::new(Role::Tool, Some(content.to_string()), vec![], Some(id.to_string())))
        }
        fn unmarshal_message(&self, bytes: &[u8]) -> Result<Box<dyn Message>, Box<dyn StdError + Send + Sync>> {
            JsonMessage::from_bytes(bytes)
                .map(|m| Box::new(m) as Box<dyn Message>)
                .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)
        }
    }

    fn user(text: &str) -> Box<dyn Message> {
        Box::new(JsonMessage::new(Role::User, Some(text.to_string()), vec![], None))
    }

    fn assistant(text: &str) -> Box<dyn Message> {
        Box::new(JsonMessage::new(Role::Assistant, Some(text.to_string()), vec![], None))
    }

    #[tokio::test]
    async fn message_limit_compactor_trims_and_starts_at_user() {
        let backend = StubBackend;
        let history: Vec<Box<dyn Message>> = vec![
            user("1"), assistant("2"), user("3"), assistant("4"), user("5"), assistant("6"),
        ];
        let compactor = MessageLimitCompactor::new(3);
        let request = CompactionRequest {
            history: &history,
            preamble: &[],
            last_usage: None,
            processed_length: history.len(),
            backend: &backend,
        };
        let response = compactor.compact(&request).await.unwrap();
        assert!(response.was_compacted);
        assert!(response.history.len() <= 3);
        assert_eq!(response.history[0].role(), Role::User);
    }

    #[tokio::test]
    async fn token_limit_compactor_noop_under_budget() {
        let backend = StubBackend;
        let history: Vec<Box<dyn Message>> = vec![user("1"), assistant("2")];
        let compactor = TokenLimitCompactor::new(1000, 0);
        let request = CompactionRequest {
            history: &history,
            preamble: &[],
            last_usage: Some(TokenUsage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 }),
            processed_length: history.len(),
            backend: &backend,
        };
        let response = compactor.compact(&request).await.unwrap();
        assert!(!response.was_compacted);
        assert_eq!(response.history.len(), 2);
    }

    #[tokio::test]
    async fn token_limit_compactor_triggers_over_budget() {
        let backend = StubBackend;
        let history: Vec<Box<dyn Message>> = vec![
            user("1"), assistant("2"), user("3"), assistant("4"), user("5"), assistant("6"),
        ];
        let compactor = TokenLimitCompactor::new(100, 0);
        assert_eq!(compactor.target_tokens, 75);
        let request = CompactionRequest {
            history: &history,
            preamble: &[],
            last_usage: Some(TokenUsage { prompt_tokens: 200, completion_tokens: 5, total_tokens: 205 }),
            processed_length: history.len(),
            backend: &backend,
        };
        let response = compactor.compact(&request).await.unwrap();
        assert!(response.was_compacted);
        assert!(response.history.len() < history.len());
    }

    #[tokio::test]
    async fn composite_compactor_uses_first_that_fires() {
        let backend = StubBackend;
        let history: Vec<Box<dyn Message>> = vec![user("1"), assistant("2"), user("3"), assistant("4")];
        let composite = CompositeCompactor::new(vec![
            Box::new(MessageLimitCompactor::new(100)), // never fires
            Box::new(MessageLimitCompactor::new(2)),   // fires
        ]);
        let request = CompactionRequest {
            history: &history,
            preamble: &[],
            last_usage: None,
            processed_length: history.len(),
            backend: &backend,
        };
        let response = composite.compact(&request).await.unwrap();
        assert!(response.was_compacted);
        assert!(response.history.len() <= 2);
    }

    #[tokio::test]
    async fn composite_compactor_noop_when_none_fire() {
        let backend = StubBackend;
        let history: Vec<Box<dyn Message>> = vec![user("1"), assistant("2")];
        let composite = CompositeCompactor::new(vec![Box::new(MessageLimitCompactor::new(100))]);
        let request = CompactionRequest {
            history: &history,
            preamble: &[],
            last_usage: None,
            processed_length: history.len(),
            backend: &backend,
        };
        let response = composite.compact(&request).await.unwrap();
        assert!(!response.was_compacted);
        assert_eq!(response.history.len(), 2);
    }

    #[test]
    fn boundary_rule_drops_to_empty_when_no_user_remains() {
        let history: Vec<Box<dyn Message>> = vec![assistant("a"), assistant("b")];
        let bounded = advance_to_user_boundary(history);
        assert!(bounded.is_empty());
    }
}
