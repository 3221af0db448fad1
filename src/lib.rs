// src/lib.rs

//! Orchestrates multi-turn, tool-augmented conversations with LLM providers:
//! an automatic tool-calling loop, opaque persistable conversation state, and
//! pluggable compaction.
//!
//! See [`Orchestrator`] for the main entry point.

pub mod convorch;

pub use convorch::{
    advance_to_user_boundary, Backend, ChatOptions, ChatResponse, CompactionRequest,
    CompactionResponse, Compactor, CompositeCompactor, CompositeTrigger, ConversationState,
    EncodeError, FinishReason, JsonMessage, Message, MessageError, MessageLimitCompactor,
    Orchestrator, OrchestratorError, Role, SplitCompactor, StateCodec, Strategy,
    TokenLimitCompactor, TokenUsage, Tool, ToolActionLogger, ToolActionRecord, ToolCall,
    ToolDefinition, ToolRunner, Trigger, DEFAULT_MAX_TOOL_ITERATIONS, STATE_VERSION,
};
