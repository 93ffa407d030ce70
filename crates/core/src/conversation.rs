use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::ChatEvent;
use crate::ids::{ConversationKey, MessageId};
use crate::message::ChatMessage;
use crate::options::ChatOptions;

/// Conversation aggregate root: one chat thread's full state.
///
/// History preserves insertion order as turn order. Abort handles are
/// coordinator-level stream metadata and deliberately live outside this
/// value, which stays cheap to clone and snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub key: ConversationKey,
    pub history: IndexMap<MessageId, ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followup_messages: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_options: Option<ChatOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events_log: Vec<Vec<ChatEvent>>,
    #[serde(default)]
    pub is_loading: bool,
}

impl Conversation {
    /// Creates an empty conversation under the given key.
    pub fn new(key: ConversationKey) -> Self {
        Self {
            key,
            history: IndexMap::new(),
            last_message_id: None,
            followup_messages: None,
            server_state: None,
            chat_options: None,
            summary: None,
            events_log: Vec::new(),
            is_loading: false,
        }
    }

    /// Creates an empty conversation under a fresh temporary key.
    pub fn temporary() -> Self {
        Self::new(ConversationKey::temporary())
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn message(&self, id: MessageId) -> Option<&ChatMessage> {
        self.history.get(&id)
    }

    pub fn message_mut(&mut self, id: MessageId) -> Option<&mut ChatMessage> {
        self.history.get_mut(&id)
    }

    /// Appends a message, tracks it as the latest, and drops any follow-up
    /// suggestions (they describe a history that just changed).
    pub fn append_message(&mut self, message: ChatMessage) {
        self.last_message_id = Some(message.id);
        self.followup_messages = None;
        self.history.insert(message.id, message);
    }

    /// Removes and returns the most recently appended message. Used only for
    /// error rollback.
    pub fn remove_last_message(&mut self) -> Option<ChatMessage> {
        let removed = self.history.pop().map(|(_, message)| message);
        self.last_message_id = self.history.keys().last().copied();
        removed
    }

    /// Opens a fresh per-turn event log. Called once per send, before any
    /// event of that turn arrives.
    pub fn begin_turn(&mut self) {
        self.events_log.push(Vec::new());
    }

    /// Records one raw event into the current turn's log.
    pub fn log_event(&mut self, event: ChatEvent) {
        if self.events_log.is_empty() {
            self.events_log.push(Vec::new());
        }
        if let Some(turn) = self.events_log.last_mut() {
            turn.push(event);
        }
    }

    /// Raw events of the most recent turn, for the debug surface.
    pub fn current_turn_events(&self) -> &[ChatEvent] {
        self.events_log.last().map(Vec::as_slice).unwrap_or(&[])
    }
}
