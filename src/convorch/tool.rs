//! Dispatch a provider-issued tool call to a registered handler.
//!
//! Mirrors the teacher's event-callback pattern (`event::EventHandler`) for
//! observability, but the dispatch logic itself is new: a flat,
//! linearly-searched tool list (expected cardinality under 20, per spec) and
//! a hard split between *domain* failures (conveyed as a normal tool result)
//! and *infrastructure* failures (converted to an in-band error message so
//! the loop can continue, with the model free to retry or apologize).

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::message::ToolCall;

/// A tool an agent can invoke, bound to its schema and handler.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to select this tool; must match [`ToolCall::name`].
    fn name(&self) -> &str;
    /// Human-readable description surfaced to the model to aid tool
    /// selection.
    fn description(&self) -> &str;
    /// JSON Schema describing the accepted parameters. Opaque to this
    /// crate — forwarded verbatim to the backend.
    fn parameters(&self) -> &serde_json::Value;
    /// Run the tool. `request` is the call's opaque JSON argument text.
    ///
    /// Returning `Err` is for *infrastructure* failures (I/O, timeouts) —
    /// the orchestrator converts these into an in-band tool-result message
    /// so the model can see and recover from them. Domain-level failures
    /// (invalid input, "not found" within the tool's own domain) should be
    /// returned as a normal `Ok` result describing the failure, not as an
    /// `Err`.
    async fn execute(
        &self,
        ctx: &CancellationToken,
        request: &str,
    ) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// One entry in the log produced by a tool dispatch, handed to an optional
/// [`ToolActionLogger`].
#[derive(Debug, Clone)]
pub struct ToolActionRecord {
    pub tool_name: String,
    pub call_id: String,
    pub succeeded: bool,
    /// Populated only when the orchestrator's verbose-logging flag is set,
    /// to avoid accidentally exposing sensitive tool input in ambient logs.
    pub arguments: Option<String>,
    /// Populated only when verbose logging is set; see `arguments`.
    pub result: Option<String>,
}

/// Receives a [`ToolActionRecord`] for every tool call this orchestrator
/// dispatches, regardless of the verbose-logging setting (the verbosity
/// knob only controls whether `arguments`/`result` are populated).
pub trait ToolActionLogger: Send + Sync {
    fn on_tool_action(&self, record: &ToolActionRecord);
}

/// Stateless dispatcher: given a [`ToolCall`], finds the matching [`Tool`]
/// by name and invokes it.
pub struct ToolRunner;

impl ToolRunner {
    /// Dispatch `call` against `tools`, returning the string that becomes
    /// the content of the `tool`-role message the orchestrator appends to
    /// history.
    ///
    /// Never returns an error: "tool not found" and infrastructure failures
    /// both become an in-band `"Error: ..."` result so the model can recover
    /// and the conversation loop continues.
    pub async fn dispatch(
        ctx: &CancellationToken,
        call: &ToolCall,
        tools: &[Arc<dyn Tool>],
        verbose: bool,
        logger: Option<&dyn ToolActionLogger>,
    ) -> String {
        let tool = tools.iter().find(|t| t.name() == call.name);

        let (succeeded, content) = match tool {
            None => (false, format!("Error: tool not found: {}", call.name)),
            Some(tool) => match tool.execute(ctx, &call.arguments).await {
                Ok(result) => (true, result),
                Err(e) => (false, format!("Error: {}", e)),
            },
        };

        if let Some(logger) = logger {
            let record = ToolActionRecord {
                tool_name: call.name.clone(),
                call_id: call.id.clone(),
                succeeded,
                arguments: verbose.then(|| call.arguments.clone()),
                result: verbose.then(|| content.clone()),
            };
            logger.on_tool_action(&record);
        }

        log::debug!(
            "convorch: dispatched tool \"{}\" (call_id={}) -> succeeded={}",
            call.name,
            call.id,
            succeeded
        );

        content
    }
}
