use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ConfirmationId, ImageId, MessageId, ServerMessageId, TaskId, UpdateId};

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A cited source attached to an assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Latest progress notification for one update id.
///
/// Later events for the same id replace earlier content wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveUpdate {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One entry of the assistant-maintained task list, upserted by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoTask {
    pub id: TaskId,
    pub label: String,
    #[serde(default)]
    pub done: bool,
}

/// A server-issued request for explicit user approval before a tool runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub confirmation_id: ConfirmationId,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_description: Option<String>,
    #[serde(default)]
    pub arguments: Value,
}

/// Approval lifecycle: `Pending` until the user (or server) settles it, then
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationState {
    Pending,
    Confirmed,
    Declined,
    Skipped,
}

impl ConfirmationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Token accounting reported by the server at the end of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// One turn's content.
///
/// Created only by the orchestrator (a user message plus an assistant
/// placeholder per send) and mutated only by event reducers. `content` grows
/// monotonically while streaming until a clear event resets the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerMessageId>,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<Reference>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<IndexMap<ImageId, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_updates: Option<IndexMap<UpdateId, LiveUpdate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<TodoTask>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_requests: Option<Vec<ConfirmationRequest>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_states: Option<IndexMap<ConfirmationId, ConfirmationState>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatMessage {
    /// Creates a bare message with explicit role and empty content.
    pub fn new(id: MessageId, role: Role) -> Self {
        Self {
            id,
            server_id: None,
            role,
            content: String::new(),
            references: None,
            images: None,
            live_updates: None,
            tasks: None,
            confirmation_requests: None,
            confirmation_states: None,
            usage: None,
            error: None,
        }
    }

    /// Creates a completed user message.
    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        let mut message = Self::new(id, Role::User);
        message.content = content.into();
        message
    }

    /// Creates the empty assistant placeholder the stream writes into.
    pub fn assistant_placeholder(id: MessageId) -> Self {
        Self::new(id, Role::Assistant)
    }

    /// Resets the message to `{id, role, content: ""}`, dropping every other
    /// field. Idempotent.
    pub fn reset(&mut self) {
        *self = Self::new(self.id, self.role);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_drops_everything_but_identity_and_role() {
        let id = MessageId::generate();
        let mut message = ChatMessage::assistant_placeholder(id);
        message.content.push_str("partial answer");
        message.server_id = Some(ServerMessageId::from("srv-1"));
        message.usage = Some(UsageStats {
            input_tokens: 10,
            output_tokens: 20,
            total_tokens: Some(30),
        });
        message.error = Some("boom".to_string());

        message.reset();
        assert_eq!(message, ChatMessage::new(id, Role::Assistant));

        // A second reset observes the same terminal shape.
        message.reset();
        assert_eq!(message, ChatMessage::new(id, Role::Assistant));
    }

    #[test]
    fn snapshot_serialization_omits_unset_fields() {
        let message = ChatMessage::user(MessageId::generate(), "hello");
        let value = serde_json::to_value(&message).unwrap();
        let object = value.as_object().unwrap();
        assert!(object.contains_key("id"));
        assert_eq!(object.get("role"), Some(&serde_json::json!("user")));
        assert!(!object.contains_key("server_id"));
        assert!(!object.contains_key("usage"));
    }
}
