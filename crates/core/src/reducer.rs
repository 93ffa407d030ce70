use indexmap::IndexMap;
use snafu::OptionExt;

use crate::conversation::Conversation;
use crate::error::{CoreResult, UnknownMessageSnafu};
use crate::event::{ChatEvent, LiveUpdateKind};
use crate::ids::{MessageId, ServerConversationId};
use crate::message::{ChatMessage, ConfirmationState};

/// Cross-map work a conversation-scoped mutation cannot perform itself.
///
/// The store-level phase consumes this after the conversation value has been
/// committed; re-keying the outer map from inside the conversation mutation
/// would race the commit.
#[derive(Debug, Clone, PartialEq)]
pub enum AfterEffect {
    PromoteIdentity { server_id: ServerConversationId },
}

/// Applies one event to a conversation, copy-on-write.
///
/// Returns the next conversation value plus an optional after-effect.
/// Message-scoped events fail fast when `target` is not in the history,
/// since continuing would corrupt the model. Protocol anomalies (duplicate ids,
/// unknown confirmation ids) are logged and resolved without failing.
pub fn apply_event(
    conversation: &Conversation,
    target: MessageId,
    event: &ChatEvent,
) -> CoreResult<(Conversation, Option<AfterEffect>)> {
    let mut next = conversation.clone();
    let mut after = None;

    match event {
        ChatEvent::Text(chunk) => {
            target_message(&mut next, target, event)?.content.push_str(chunk);
        }
        ChatEvent::Reference(reference) => {
            target_message(&mut next, target, event)?
                .references
                .get_or_insert_with(Vec::new)
                .push(reference.clone());
        }
        ChatEvent::MessageId(server_id) => {
            target_message(&mut next, target, event)?.server_id = Some(server_id.clone());
        }
        ChatEvent::LiveUpdate(update) => {
            let message = target_message(&mut next, target, event)?;
            let updates = message.live_updates.get_or_insert_with(IndexMap::new);
            if update.kind == LiveUpdateKind::Start && updates.contains_key(&update.update_id) {
                tracing::warn!(
                    update_id = %update.update_id,
                    "duplicate live_update start; overwriting the existing entry"
                );
            }
            updates.insert(update.update_id.clone(), update.update());
        }
        ChatEvent::Image(image) => {
            let message = target_message(&mut next, target, event)?;
            let images = message.images.get_or_insert_with(IndexMap::new);
            if images.contains_key(&image.id) {
                tracing::warn!(image_id = %image.id, "duplicate image id; overwriting the existing entry");
            }
            images.insert(image.id.clone(), image.url.clone());
        }
        ChatEvent::ClearMessage => {
            target_message(&mut next, target, event)?.reset();
        }
        ChatEvent::Usage(usage) => {
            target_message(&mut next, target, event)?.usage = Some(*usage);
        }
        ChatEvent::TodoItem(item) => {
            let message = target_message(&mut next, target, event)?;
            let tasks = message.tasks.get_or_insert_with(Vec::new);
            match tasks.iter_mut().find(|task| task.id == item.id) {
                Some(existing) => *existing = item.clone(),
                None => tasks.push(item.clone()),
            }
        }
        ChatEvent::ConfirmationRequest(request) => {
            let message = target_message(&mut next, target, event)?;
            let states = message.confirmation_states.get_or_insert_with(IndexMap::new);
            if states.contains_key(&request.confirmation_id) {
                tracing::warn!(
                    confirmation_id = %request.confirmation_id,
                    "duplicate confirmation_request; keeping the existing request and state"
                );
            } else {
                states.insert(request.confirmation_id.clone(), ConfirmationState::Pending);
                message
                    .confirmation_requests
                    .get_or_insert_with(Vec::new)
                    .push(request.clone());
            }
        }
        ChatEvent::ConfirmationStatus(status) => {
            apply_confirmation_status(&mut next, status);
        }
        ChatEvent::StateUpdate(state) => {
            next.server_state = Some(state.clone());
        }
        ChatEvent::ConversationId(server_id) => {
            after = assign_conversation_id(&mut next, server_id);
        }
        ChatEvent::FollowupMessages(messages) => {
            next.followup_messages = Some(messages.clone());
        }
        ChatEvent::ConversationSummary(summary) => {
            next.summary = Some(summary.clone());
        }
        ChatEvent::Error(message) => {
            target_message(&mut next, target, event)?.error = Some(message.clone());
        }
    }

    Ok((next, after))
}

fn target_message<'a>(
    conversation: &'a mut Conversation,
    target: MessageId,
    event: &ChatEvent,
) -> CoreResult<&'a mut ChatMessage> {
    let key = conversation.key.to_string();
    conversation.message_mut(target).context(UnknownMessageSnafu {
        stage: event.tag(),
        conversation: key,
        message_id: target,
    })
}

/// Scans every message for the confirmation id and settles it.
///
/// An unknown id is a protocol anomaly (no-op); a status for an already
/// terminal entry is ignored, since confirmation states never leave a
/// terminal state twice.
fn apply_confirmation_status(
    conversation: &mut Conversation,
    status: &crate::event::ConfirmationStatusEvent,
) {
    for message in conversation.history.values_mut() {
        let Some(states) = message.confirmation_states.as_mut() else {
            continue;
        };
        let Some(state) = states.get_mut(&status.confirmation_id) else {
            continue;
        };

        if state.is_terminal() {
            tracing::warn!(
                confirmation_id = %status.confirmation_id,
                "confirmation_status for an already settled confirmation; keeping the first outcome"
            );
        } else {
            *state = status.status;
        }
        return;
    }

    tracing::warn!(
        confirmation_id = %status.confirmation_id,
        "confirmation_status for an unknown confirmation id; ignoring"
    );
}

fn assign_conversation_id(
    conversation: &mut Conversation,
    server_id: &ServerConversationId,
) -> Option<AfterEffect> {
    match conversation.key.server_id() {
        Some(existing) if existing == server_id => None,
        Some(existing) => {
            tracing::warn!(
                existing = %existing,
                incoming = %server_id,
                "conversation_id for an already persisted conversation; keeping the original id"
            );
            None
        }
        None => {
            conversation.key = crate::ids::ConversationKey::Persisted(server_id.clone());
            Some(AfterEffect::PromoteIdentity {
                server_id: server_id.clone(),
            })
        }
    }
}
