//! Crate-wide error type.
//!
//! Mirrors the hand-rolled `Display` + `std::error::Error` pattern used by
//! the tool implementations (e.g. `BashError`, `FileSystemError`) rather than
//! pulling in a derive-macro error crate.

use std::error::Error;
use std::fmt;

/// Errors that can abort an [`crate::Orchestrator`] call.
///
/// Tool infrastructure failures and "tool not found" never become this type —
/// those are converted to in-band tool-result messages by
/// [`crate::tool::ToolRunner`] and the loop continues.
#[derive(Debug)]
pub enum OrchestratorError {
    /// The backend's `chat_completion` call failed (HTTP, IO, provider error).
    Backend(Box<dyn Error + Send + Sync>),
    /// The provider reported `FinishReason::Length`: the conversation
    /// exceeded the model's token ceiling.
    ConversationExceededMaxTokens,
    /// The provider reported a finish reason the orchestrator doesn't
    /// recognize.
    UnknownFinishReason(String),
    /// The loop bound was reached without a terminal `Stop`/`Length` response.
    MaxToolIterationsExceeded(usize),
    /// Encoding the final conversation state failed.
    Encoding(String),
    /// A [`crate::compaction::Compactor`] returned an error.
    Compaction(Box<dyn Error + Send + Sync>),
    /// The call was cancelled via the caller-supplied cancellation token.
    Cancelled,
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::Backend(e) => write!(f, "backend call failed: {}", e),
            OrchestratorError::ConversationExceededMaxTokens => {
                write!(f, "conversation exceeded max tokens")
            }
            OrchestratorError::UnknownFinishReason(raw) => {
                write!(f, "unknown finish reason: {}", raw)
            }
            OrchestratorError::MaxToolIterationsExceeded(max) => {
                write!(f, "exceeded max tool iterations ({})", max)
            }
            OrchestratorError::Encoding(msg) => write!(f, "failed to encode state: {}", msg),
            OrchestratorError::Compaction(e) => write!(f, "compactor failed: {}", e),
            OrchestratorError::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OrchestratorError::Backend(e) => Some(e.as_ref()),
            OrchestratorError::Compaction(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}
