//! Drives the iterative model-call / tool-execute loop, assembles message
//! lists per-call, invokes compaction on successful completion, and
//! surfaces the final text.
//!
//! The three public operations mirror the teacher's fluent, builder-style
//! entry points (`Agent::new(..).with_expertise(..)`): [`Orchestrator::new`]
//! takes the mandatory backend, and a call is configured by chaining
//! [`ChatOptions`] builder methods before passing it to
//! [`Orchestrator::chat_with_state`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, ToolDefinition};
use crate::compaction::{CompactionRequest, Compactor};
use crate::error::OrchestratorError;
use crate::message::{FinishReason, Message, Role};
use crate::state::{ConversationState, StateCodec};
use crate::tool::{Tool, ToolActionLogger, ToolRunner};

/// Default bound on tool-calling iterations within a single call, used
/// whenever neither the per-call option nor the orchestrator field
/// overrides it.
pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 10;

/// One pending message-producing instruction for a call, in the order the
/// caller supplied it. Tool-related options ([`ChatOptions::tools`],
/// [`ChatOptions::max_tool_iterations`], [`ChatOptions::tool_action_logger`])
/// live on [`ChatOptions`] directly rather than in this list, since
/// [`Orchestrator::append_to_state`] only honors message-producing options.
enum PendingMessage {
    System(String),
    User(String),
}

/// Composable per-call configuration, built with the fluent methods below.
#[derive(Default)]
pub struct ChatOptions {
    pending: Vec<PendingMessage>,
    tools: Vec<Arc<dyn Tool>>,
    max_tool_iterations: Option<usize>,
    tool_action_logger: Option<Arc<dyn ToolActionLogger>>,
}

impl ChatOptions {
    pub fn new() -> Self {
        ChatOptions::default()
    }

    /// Append a system-role message to this call's pending message list.
    /// If this is part of the leading contiguous run of system messages, it
    /// becomes ephemeral preamble (never persisted); once any other option
    /// has contributed a message, subsequent system messages are persisted
    /// as ordinary inline history.
    pub fn system_message(mut self, text: impl Into<String>) -> Self {
        self.pending.push(PendingMessage::System(text.into()));
        self
    }

    /// Append a user-role message to this call's pending message list.
    pub fn user_message(mut self, text: impl Into<String>) -> Self {
        self.pending.push(PendingMessage::User(text.into()));
        self
    }

    /// Make `tools` available to the backend for this call.
    pub fn tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    /// Override [`DEFAULT_MAX_TOOL_ITERATIONS`]/the orchestrator's configured
    /// default for this call only.
    pub fn max_tool_iterations(mut self, n: usize) -> Self {
        self.max_tool_iterations = Some(n);
        self
    }

    /// Receive a [`crate::tool::ToolActionRecord`] for every tool dispatched
    /// during this call.
    pub fn tool_action_logger(mut self, logger: Arc<dyn ToolActionLogger>) -> Self {
        self.tool_action_logger = Some(logger);
        self
    }

    /// Split `pending` into `(preamble, remainder)`: the leading contiguous
    /// run of system messages, versus everything after the first
    /// non-system option. The preamble is ephemeral and never persisted;
    /// the remainder (including any system messages inside it) becomes
    /// part of persisted history.
    fn split_preamble(&self, backend: &dyn Backend) -> (Vec<Box<dyn Message>>, Vec<Box<dyn Message>>) {
        let mut preamble = Vec::new();
        let mut remainder = Vec::new();
        let mut in_preamble = true;

        for item in &self.pending {
            match item {
                PendingMessage::System(text) if in_preamble => {
                    preamble.push(backend.new_system_message(text));
                }
                PendingMessage::System(text) => {
                    remainder.push(backend.new_system_message(text));
                }
                PendingMessage::User(text) => {
                    in_preamble = false;
                    remainder.push(backend.new_user_message(text));
                }
            }
        }

        (preamble, remainder)
    }

    /// Materialize every pending option as a message, in call order, with no
    /// preamble split. Used by [`Orchestrator::append_to_state`], which has
    /// no model call and therefore no ephemeral preamble to strip — every
    /// message-producing option it's given is persisted.
    fn into_messages(&self, backend: &dyn Backend) -> Vec<Box<dyn Message>> {
        self.pending
            .iter()
            .map(|item| match item {
                PendingMessage::System(text) => backend.new_system_message(text),
                PendingMessage::User(text) => backend.new_user_message(text),
            })
            .collect()
    }
}

/// Drives the model ⇄ tools loop for a single backend.
///
/// Read-only after construction: concurrent calls on the same `Orchestrator`
/// are safe as long as the backend, tools, and loggers passed in are
/// themselves safe for concurrent use.
pub struct Orchestrator<B: Backend> {
    backend: Arc<B>,
    compactor: Option<Arc<dyn Compactor>>,
    default_max_tool_iterations: usize,
    verbose_tool_logging: bool,
}

impl<B: Backend> Orchestrator<B> {
    pub fn new(backend: B) -> Self {
        Orchestrator {
            backend: Arc::new(backend),
            compactor: None,
            default_max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            verbose_tool_logging: false,
        }
    }

    /// Attach a compactor invoked at the end of every successful call.
    pub fn with_compactor(mut self, compactor: Arc<dyn Compactor>) -> Self {
        self.compactor = Some(compactor);
        self
    }

    /// Override the default tool-iteration bound for calls that don't
    /// specify [`ChatOptions::max_tool_iterations`] themselves.
    pub fn with_default_max_tool_iterations(mut self, n: usize) -> Self {
        self.default_max_tool_iterations = n;
        self
    }

    /// When set, tool dispatch records forwarded to a
    /// [`ChatOptions::tool_action_logger`] include raw arguments/results. Off
    /// by default to avoid accidentally exposing sensitive tool data in logs.
    pub fn with_verbose_tool_logging(mut self, verbose: bool) -> Self {
        self.verbose_tool_logging = verbose;
        self
    }

    /// Stateless sugar over [`Orchestrator::chat_with_state`]: starts from
    /// empty state and discards the state returned.
    pub async fn chat(
        &self,
        ctx: &CancellationToken,
        options: ChatOptions,
    ) -> Result<String, OrchestratorError> {
        let (text, _state) = self.chat_with_state(ctx, None, options).await?;
        Ok(text)
    }

    /// The full operation: decode prior state, assemble messages, run the
    /// model/tool loop, compact on success, and re-encode.
    pub async fn chat_with_state(
        &self,
        ctx: &CancellationToken,
        state: Option<&ConversationState>,
        options: ChatOptions,
    ) -> Result<(String, ConversationState), OrchestratorError> {
        if ctx.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        let (stored_history, _processed_length) = match state {
            Some(s) => StateCodec::decode(self.backend.as_ref(), s.as_bytes()),
            None => (Vec::new(), 0),
        };

        let (preamble, remainder) = options.split_preamble(self.backend.as_ref());

        let mut messages: Vec<Box<dyn Message>> = Vec::new();
        messages.extend(preamble);
        messages.extend(stored_history);
        messages.extend(remainder);

        let tool_definitions: Vec<ToolDefinition> = options
            .tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters_schema: t.parameters().clone(),
            })
            .collect();

        let max_iter = options
            .max_tool_iterations
            .unwrap_or(self.default_max_tool_iterations);

        let mut last_usage = None;

        for _iteration in 0..max_iter {
            if ctx.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            let response = self
                .backend
                .chat_completion(ctx, &messages, &tool_definitions)
                .await
                .map_err(OrchestratorError::Backend)?;

            last_usage = response.usage;
            messages.push(response.message.clone_message());

            match response.finish_reason {
                FinishReason::Stop => {
                    return self
                        .finalize(&messages, last_usage)
                        .await;
                }
                FinishReason::ToolCalls => {
                    let calls = response.message.tool_calls().to_vec();
                    for call in &calls {
                        if ctx.is_cancelled() {
                            return Err(OrchestratorError::Cancelled);
                        }
                        let content = ToolRunner::dispatch(
                            ctx,
                            call,
                            &options.tools,
                            self.verbose_tool_logging,
                            options.tool_action_logger.as_deref(),
                        )
                        .await;
                        messages.push(self.backend.new_tool_message(&call.id, &content));
                    }
                }
                FinishReason::Length => {
                    return Err(OrchestratorError::ConversationExceededMaxTokens);
                }
                FinishReason::Unknown(raw) => {
                    return Err(OrchestratorError::UnknownFinishReason(raw));
                }
            }
        }

        Err(OrchestratorError::MaxToolIterationsExceeded(max_iter))
    }

    /// Runs compaction (if attached) on the post-loop history, then encodes
    /// final state. Only reachable on `FinishReason::Stop`.
    async fn finalize(
        &self,
        messages: &[Box<dyn Message>],
        last_usage: Option<crate::message::TokenUsage>,
    ) -> Result<(String, ConversationState), OrchestratorError> {
        let final_text = messages
            .last()
            .and_then(|m| m.content())
            .unwrap_or_default()
            .to_string();

        let (preamble, mut history) = split_leading_system(messages);

        if let Some(compactor) = &self.compactor {
            let request = CompactionRequest {
                history: &history,
                preamble: &preamble,
                last_usage,
                processed_length: history.len(),
                backend: self.backend.as_ref(),
            };
            let response = compactor
                .compact(&request)
                .await
                .map_err(OrchestratorError::Compaction)?;
            history = response.history;
        }

        let processed_length = history.len();
        let state = StateCodec::encode(self.backend.as_ref(), &history, processed_length)
            .map_err(|e| OrchestratorError::Encoding(e.to_string()))?;

        Ok((final_text, state))
    }

    /// Add messages to history without calling the provider. Only
    /// message-producing options are honored; `tools`/iteration/logger
    /// options on `options` are ignored. There is no model call in this
    /// operation, so there is no ephemeral preamble to strip — every
    /// `system_message`/`user_message` option given is appended to history
    /// in call order. `processed_length` is carried over unchanged — the
    /// appended messages are, by definition, unprocessed by any prior model
    /// call.
    pub async fn append_to_state(
        &self,
        _ctx: &CancellationToken,
        state: Option<&ConversationState>,
        options: ChatOptions,
    ) -> Result<ConversationState, OrchestratorError> {
        let (stored_history, processed_length) = match state {
            Some(s) => StateCodec::decode(self.backend.as_ref(), s.as_bytes()),
            None => (Vec::new(), 0),
        };

        let appended = options.into_messages(self.backend.as_ref());

        let mut history = stored_history;
        history.extend(appended.into_iter());

        StateCodec::encode(self.backend.as_ref(), &history, processed_length)
            .map_err(|e| OrchestratorError::Encoding(e.to_string()))
    }
}

/// Drop the leading contiguous run of system-role messages, returning
/// `(preamble, rest)`. Used to recover the persisted-history view from the
/// in-progress working message list at the end of a call.
fn split_leading_system(messages: &[Box<dyn Message>]) -> (Vec<Box<dyn Message>>, Vec<Box<dyn Message>>) {
    let split = messages
        .iter()
        .position(|m| m.role() != Role::System)
        .unwrap_or(messages.len());
    let preamble = messages[..split].iter().map(|m| m.clone_message()).collect();
    let rest = messages[split..].iter().map(|m| m.clone_message()).collect();
    (preamble, rest)
}
