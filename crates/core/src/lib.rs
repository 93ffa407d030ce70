/// Conversation aggregate and per-turn event log.
pub mod conversation;
pub mod error;
/// Stream event contracts and their tagged wire shape.
pub mod event;
/// Typed identifiers and the temporary/persisted conversation identity.
pub mod ids;
pub mod message;
pub mod options;
/// The message mutation engine: pure event application over conversations.
pub mod reducer;
/// Conversation entity store: map, active pointer, lifecycle operations.
pub mod store;

pub use conversation::Conversation;
pub use error::{CoreError, CoreResult, StoreError, StoreResult};
pub use event::{
    ChatEvent, ConfirmationStatusEvent, ImageEvent, LiveUpdateEvent, LiveUpdateKind,
};
pub use ids::{
    ConfirmationId, ConversationKey, ImageId, LocalConversationId, MessageId,
    ServerConversationId, ServerMessageId, TaskId, UpdateId,
};
pub use message::{
    ChatMessage, ConfirmationRequest, ConfirmationState, LiveUpdate, Reference, Role, TodoTask,
    UsageStats,
};
pub use options::ChatOptions;
pub use reducer::{AfterEffect, apply_event};
pub use store::{ConversationStore, RemovalOutcome};
