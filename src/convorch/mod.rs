//! Orchestrates multi-turn, tool-augmented conversations with LLM providers.
//!
//! Five collaborating components, each in its own module:
//!
//! - [`message`] — the opaque, provider-fidelity-preserving message type.
//! - [`backend`] — the trait a provider client implements to plug in here.
//! - [`state`] — encode/decode conversation history to a persistable blob.
//! - [`compaction`] — pluggable trimming of unbounded history growth.
//! - [`tool`] — dispatching model-issued tool calls to local handlers.
//! - [`orchestrator`] — ties the above together into the chat loop.

pub mod backend;
pub mod compaction;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod state;
pub mod tool;

pub use backend::{Backend, ChatResponse, ToolDefinition};
pub use compaction::{
    advance_to_user_boundary, CompactionRequest, CompactionResponse, Compactor,
    CompositeCompactor, CompositeTrigger, MessageLimitCompactor, SplitCompactor, Strategy,
    TokenLimitCompactor, Trigger,
};
pub use error::OrchestratorError;
pub use message::{FinishReason, JsonMessage, Message, MessageError, Role, TokenUsage, ToolCall};
pub use orchestrator::{ChatOptions, Orchestrator, DEFAULT_MAX_TOOL_ITERATIONS};
pub use state::{ConversationState, EncodeError, StateCodec, STATE_VERSION};
pub use tool::{Tool, ToolActionLogger, ToolActionRecord, ToolRunner};
