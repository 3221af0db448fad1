//! Opaque conversation state: encode/decode history to/from a persistable
//! byte blob, with versioning and provider locking.
//!
//! Decoding never fails to the caller. A corrupted store, a version bump, or
//! state minted by a different backend all collapse to "start fresh" — the
//! library trades strict error surfacing for resilience against schema
//! drift and operator mistakes. Every such event is still logged so
//! operators can observe silent resets (see [`StateCodec::decode`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::Backend;
use crate::message::Message;

/// Current (and only) supported state-blob version.
pub const STATE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StateEnvelope {
    version: u32,
    provider: String,
    processed_length: usize,
    messages: Vec<Value>,
}

/// An opaque byte sequence carrying encoded conversation history.
///
/// Clients persist this (e.g. in a database row) and pass it back into the
/// orchestrator on the next call. Its internal layout is documented in
/// `spec.md` §6.1 purely so other implementations can interoperate; callers
/// of *this* crate must treat it as a black box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState(pub Vec<u8>);

impl ConversationState {
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ConversationState {
    fn from(bytes: Vec<u8>) -> Self {
        ConversationState(bytes)
    }
}

/// Failure encoding a conversation into a [`ConversationState`]. Unlike
/// decode failures, these always propagate — a message that cannot
/// serialize itself, or an envelope that cannot be serialized, is a
/// structural bug the caller needs to know about.
#[derive(Debug)]
pub struct EncodeError(pub String);

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for EncodeError {}

/// Pure encode/decode functions for [`ConversationState`].
pub struct StateCodec;

impl StateCodec {
    /// Wrap `messages` and `processed_length` into an opaque state blob
    /// tagged with `backend`'s provider name and the current state version.
    pub fn encode(
        backend: &dyn Backend,
        messages: &[Box<dyn Message>],
        processed_length: usize,
    ) -> Result<ConversationState, EncodeError> {
        let mut raw_messages = Vec::with_capacity(messages.len());
        for m in messages {
            let bytes = m
                .to_bytes()
                .map_err(|e| EncodeError(format!("message serialization failed: {}", e)))?;
            let value: Value = serde_json::from_slice(&bytes)
                .map_err(|e| EncodeError(format!("message produced non-JSON bytes: {}", e)))?;
            raw_messages.push(value);
        }
        let envelope = StateEnvelope {
            version: STATE_VERSION,
            provider: backend.provider_name().to_string(),
            processed_length,
            messages: raw_messages,
        };
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| EncodeError(format!("envelope serialization failed: {}", e)))?;
        Ok(ConversationState(bytes))
    }

    /// Decode a state blob into `(messages, processed_length)`.
    ///
    /// Returns an empty result (no error) whenever the bytes are empty, the
    /// JSON doesn't parse, the version doesn't match [`STATE_VERSION`], the
    /// `provider` field doesn't match `backend`'s, or any individual message
    /// fails to reconstruct. Every such case is logged via the `log` facade
    /// before returning, so a silent reset is still observable by operators.
    pub fn decode(backend: &dyn Backend, bytes: &[u8]) -> (Vec<Box<dyn Message>>, usize) {
        if bytes.is_empty() {
            return (Vec::new(), 0);
        }

        let envelope: StateEnvelope = match serde_json::from_slice(bytes) {
            Ok(e) => e,
            Err(e) => {
                log::warn!("convorch: discarding state — failed to parse envelope: {}", e);
                return (Vec::new(), 0);
            }
        };

        if envelope.version != STATE_VERSION {
            log::warn!(
                "convorch: discarding state — version mismatch (got {}, want {})",
                envelope.version,
                STATE_VERSION
            );
            return (Vec::new(), 0);
        }

        if envelope.provider != backend.provider_name() {
            log::warn!(
                "convorch: discarding state — provider mismatch (state was minted by \"{}\", current backend is \"{}\")",
                envelope.provider,
                backend.provider_name()
            );
            return (Vec::new(), 0);
        }

        let mut messages = Vec::with_capacity(envelope.messages.len());
        for (idx, raw) in envelope.messages.into_iter().enumerate() {
            let bytes = match serde_json::to_vec(&raw) {
                Ok(b) => b,
                Err(e) => {
                    log::warn!("convorch: discarding state — message {} re-serialization failed: {}", idx, e);
                    return (Vec::new(), 0);
                }
            };
            match backend.unmarshal_message(&bytes) {
                Ok(m) => messages.push(m),
                Err(e) => {
                    log::warn!("convorch: discarding state — message {} failed to reconstruct: {}", idx, e);
                    return (Vec::new(), 0);
                }
            }
        }

        (messages, envelope.processed_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{JsonMessage, Role};
    use async_trait::async_trait;
    use std::error::Error;
    use tokio_util::sync::CancellationToken;

    struct StubBackend {
        provider: &'static str,
    }

    #[async_trait]
    impl Backend for StubBackend {
        async fn chat_completion(
            &self,
            _ctx: &CancellationToken,
            _messages: &[Box<dyn Message>],
            _tools: &[crate::backend::ToolDefinition],
        ) -> Result<crate::backend::ChatResponse, Box<dyn Error + Send + Sync>> {
            unreachable!("not exercised by codec tests")
        }

        fn provider_name(&self) -> &str {
            self.provider
        }

        fn new_system_message(&self, text: &str) -> Box<dyn Message> {
            Box::new(JsonMessage::new(Role::System, Some(text.to_string()), vec![], None))
        }

        fn new_user_message(&self, text: &str) -> Box<dyn Message> {
            Box::new(JsonMessage::new(Role::User, Some(text.to_string()), vec![], None))
        }

        fn new_tool_message(&self, tool_call_id: &str, content: &str) -> Box<dyn Message> {
            Box::new(JsonMessage::new(
                Role::Tool,
                Some(content.to_string()),
                vec![],
                Some(tool_call_id.to_string()),
            ))
        }

        fn unmarshal_message(&self, bytes: &[u8]) -> Result<Box<dyn Message>, Box<dyn Error + Send + Sync>> {
            JsonMessage::from_bytes(bytes)
                .map(|m| Box::new(m) as Box<dyn Message>)
                .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)
        }
    }

    #[test]
    fn round_trips_messages_and_processed_length() {
        let backend = StubBackend { provider: "stub" };
        let messages: Vec<Box<dyn Message>> = vec![
            backend.new_user_message("hi"),
            backend.new_system_message("ctx"),
        ];
        let state = StateCodec::encode(&backend, &messages, 1).unwrap();
        let (decoded, processed_length) = StateCodec::decode(&backend, state.as_bytes());
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].content(), Some("hi"));
        assert_eq!(processed_length, 1);
    }

    #[test]
    fn empty_bytes_decode_to_empty() {
        let backend = StubBackend { provider: "stub" };
        let (messages, processed_length) = StateCodec::decode(&backend, b"");
        assert!(messages.is_empty());
        assert_eq!(processed_length, 0);
    }

    #[test]
    fn malformed_bytes_decode_to_empty() {
        let backend = StubBackend { provider: "stub" };
        let (messages, _) = StateCodec::decode(&backend, b"{not json");
        assert!(messages.is_empty());
    }

    #[test]
    fn provider_mismatch_discards_state() {
        let writer = StubBackend { provider: "a" };
        let reader = StubBackend { provider: "b" };
        let messages: Vec<Box<dyn Message>> = vec![writer.new_user_message("hi")];
        let state = StateCodec::encode(&writer, &messages, 1).unwrap();
        let (decoded, processed_length) = StateCodec::decode(&reader, state.as_bytes());
        assert!(decoded.is_empty());
        assert_eq!(processed_length, 0);
    }

    #[test]
    fn version_mismatch_discards_state() {
        let backend = StubBackend { provider: "stub" };
        let bytes = serde_json::to_vec(&serde_json::json!({
            "version": 2,
            "provider": "stub",
            "processed_length": 0,
            "messages": [],
        }))
        .unwrap();
        let (decoded, _) = StateCodec::decode(&backend, &bytes);
        assert!(decoded.is_empty());
    }
}
