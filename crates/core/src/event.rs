use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ConfirmationId, ImageId, ServerConversationId, ServerMessageId, UpdateId};
use crate::message::{ConfirmationRequest, ConfirmationState, LiveUpdate, Reference, TodoTask, UsageStats};

/// Phase marker on a live-update event.
///
/// `Start` opening an update id that already exists is a protocol anomaly:
/// it is logged and the newer content still wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveUpdateKind {
    Start,
    Progress,
    Finish,
}

/// `live_update` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveUpdateEvent {
    pub update_id: UpdateId,
    pub kind: LiveUpdateKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl LiveUpdateEvent {
    pub fn update(&self) -> LiveUpdate {
        LiveUpdate {
            label: self.label.clone(),
            description: self.description.clone(),
        }
    }
}

/// `image` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageEvent {
    pub id: ImageId,
    pub url: String,
}

/// `confirmation_status` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationStatusEvent {
    pub confirmation_id: ConfirmationId,
    pub status: ConfirmationState,
}

/// Every event the stream can deliver, as one closed sum type.
///
/// The wire shape is `{ "type": <tag>, "content": <payload> }`; exhaustive
/// matching in the reducer means an unknown tag is a deserialization error at
/// the transport boundary, not a dispatch failure here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ChatEvent {
    Text(String),
    Reference(Reference),
    MessageId(ServerMessageId),
    LiveUpdate(LiveUpdateEvent),
    Image(ImageEvent),
    ClearMessage,
    Usage(UsageStats),
    TodoItem(TodoTask),
    ConfirmationRequest(ConfirmationRequest),
    ConfirmationStatus(ConfirmationStatusEvent),
    StateUpdate(Value),
    ConversationId(ServerConversationId),
    FollowupMessages(Vec<String>),
    ConversationSummary(String),
    Error(String),
}

impl ChatEvent {
    /// Wire tag, for logs and anomaly reports.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Reference(_) => "reference",
            Self::MessageId(_) => "message_id",
            Self::LiveUpdate(_) => "live_update",
            Self::Image(_) => "image",
            Self::ClearMessage => "clear_message",
            Self::Usage(_) => "usage",
            Self::TodoItem(_) => "todo_item",
            Self::ConfirmationRequest(_) => "confirmation_request",
            Self::ConfirmationStatus(_) => "confirmation_status",
            Self::StateUpdate(_) => "state_update",
            Self::ConversationId(_) => "conversation_id",
            Self::FollowupMessages(_) => "followup_messages",
            Self::ConversationSummary(_) => "conversation_summary",
            Self::Error(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_event_uses_tagged_wire_shape() {
        let event: ChatEvent = serde_json::from_value(json!({
            "type": "text",
            "content": "Hi"
        }))
        .unwrap();
        assert_eq!(event, ChatEvent::Text("Hi".to_string()));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "text", "content": "Hi"})
        );
    }

    #[test]
    fn clear_message_needs_no_content() {
        let event: ChatEvent = serde_json::from_value(json!({"type": "clear_message"})).unwrap();
        assert_eq!(event, ChatEvent::ClearMessage);
    }

    #[test]
    fn every_tag_round_trips() {
        let events = vec![
            ChatEvent::Text("chunk".to_string()),
            ChatEvent::Reference(Reference {
                title: "Doc".to_string(),
                url: Some("https://example.test/doc".to_string()),
                snippet: None,
            }),
            ChatEvent::MessageId(ServerMessageId::from("srv-9")),
            ChatEvent::LiveUpdate(LiveUpdateEvent {
                update_id: UpdateId::from("u1"),
                kind: LiveUpdateKind::Start,
                label: "Searching".to_string(),
                description: None,
            }),
            ChatEvent::Image(ImageEvent {
                id: ImageId::from("img-1"),
                url: "https://example.test/img.png".to_string(),
            }),
            ChatEvent::ClearMessage,
            ChatEvent::Usage(UsageStats {
                input_tokens: 5,
                output_tokens: 6,
                total_tokens: None,
            }),
            ChatEvent::TodoItem(TodoTask {
                id: crate::ids::TaskId::from("t1"),
                label: "step one".to_string(),
                done: false,
            }),
            ChatEvent::ConfirmationRequest(ConfirmationRequest {
                confirmation_id: ConfirmationId::from("c1"),
                tool_name: "shell".to_string(),
                tool_description: None,
                arguments: json!({"cmd": "ls"}),
            }),
            ChatEvent::ConfirmationStatus(ConfirmationStatusEvent {
                confirmation_id: ConfirmationId::from("c1"),
                status: ConfirmationState::Confirmed,
            }),
            ChatEvent::StateUpdate(json!({"cursor": 3})),
            ChatEvent::ConversationId(ServerConversationId::from("conv-7")),
            ChatEvent::FollowupMessages(vec!["And then?".to_string()]),
            ChatEvent::ConversationSummary("A short chat".to_string()),
            ChatEvent::Error("upstream failed".to_string()),
        ];

        for event in events {
            let wire = serde_json::to_value(&event).unwrap();
            assert_eq!(wire["type"], json!(event.tag()), "tag mismatch for {wire}");
            let parsed: ChatEvent = serde_json::from_value(wire).unwrap();
            assert_eq!(parsed, event);
        }
    }

    #[test]
    fn unknown_tag_is_rejected_at_the_boundary() {
        let result: Result<ChatEvent, _> =
            serde_json::from_value(json!({"type": "telemetry", "content": {}}));
        assert!(result.is_err());
    }
}
