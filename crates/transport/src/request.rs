use serde::{Deserialize, Serialize};
use serde_json::Value;

use murmur_core::{ChatMessage, ChatOptions, Role, ServerConversationId, ServerMessageId};

/// One prior turn as the server sees it: role and content, plus the server's
/// own message id when it has assigned one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ServerMessageId>,
}

impl From<&ChatMessage> for HistoryEntry {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            id: message.server_id.clone(),
        }
    }
}

/// Server context echoed with every request.
///
/// `conversation_id` is omitted while the conversation is still temporary;
/// the server assigns the permanent id on first persistence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ServerConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ChatOptions>,
}

/// Outgoing chat request: the new message, the mapped prior history
/// (excluding the just-added user/placeholder pair), and the merged context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub history: Vec<HistoryEntry>,
    pub context: RequestContext,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            history: Vec::new(),
            context: RequestContext::default(),
        }
    }

    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.history = history;
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}

/// `like`/`dislike` verdict on one assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Like,
    Dislike,
}

/// Body of `POST /api/feedback`; the payload shape is dictated by a
/// server-supplied form schema and travels through opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSubmission {
    pub message_id: ServerMessageId,
    pub feedback: FeedbackKind,
    #[serde(default)]
    pub payload: Value,
}
