use std::collections::HashMap;
use std::sync::Arc;

use snafu::ResultExt;
use tokio::sync::mpsc;

use murmur_core::{
    AfterEffect, ChatEvent, ChatMessage, ChatOptions, Conversation, ConversationKey,
    ConversationStore, MessageId, RemovalOutcome, apply_event,
};
use murmur_transport::{
    CancelHandle, ChatEventStream, ChatRequest, ChatTransport, FeedbackSubmission, HistoryEntry,
    RequestContext, StreamEvent,
};

use crate::error::{ReduceSnafu, SessionResult, StoreSnafu, TransportSnafu};
use crate::persist::{
    PersistedConversation, PersistedConversations, Snapshot, SnapshotMode, SnapshotPersister,
};

/// Identifier for one streaming turn.
///
/// Allocated per send and never reused, so late events from a replaced or
/// cancelled stream can be told apart from current ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TurnId(u64);

/// Coordinator-level stream metadata kept outside the domain model.
struct TurnRoute {
    conversation: ConversationKey,
    assistant_message: MessageId,
    cancel: Option<CancelHandle>,
}

struct TurnMessage {
    turn: TurnId,
    signal: TurnSignal,
}

enum TurnSignal {
    Event(ChatEvent),
    Failed(String),
    Closed,
}

impl From<StreamEvent> for TurnSignal {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Event(event) => Self::Event(event),
            StreamEvent::Failed(message) => Self::Failed(message),
        }
    }
}

/// The stream orchestrator: owns the conversation store, wires transport
/// streams into the mutation engine, and coalesces persistence.
///
/// All state mutation happens on the caller's task while draining one ordered
/// queue ([`ChatSession::pump_one`] / [`ChatSession::run_until_idle`]); the
/// spawned transport workers and stream forwarders never touch session state.
/// Per-conversation streams are independent: several conversations may be
/// loading at once, each with its own turn id and cancel handle.
pub struct ChatSession {
    store: ConversationStore,
    transport: Arc<dyn ChatTransport>,
    default_options: Option<ChatOptions>,
    persister: Option<SnapshotPersister>,
    turns: HashMap<TurnId, TurnRoute>,
    next_turn_id: u64,
    events_tx: mpsc::UnboundedSender<TurnMessage>,
    events_rx: mpsc::UnboundedReceiver<TurnMessage>,
}

impl ChatSession {
    /// Creates a session with no persistence, starting from one empty
    /// temporary conversation.
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            store: ConversationStore::new(),
            transport,
            default_options: None,
            persister: None,
            turns: HashMap::new(),
            next_turn_id: 1,
            events_tx,
            events_rx,
        }
    }

    /// Creates a session and restores the persisted snapshot, before any
    /// event can be dispatched.
    pub async fn initialize(
        transport: Arc<dyn ChatTransport>,
        persister: SnapshotPersister,
    ) -> SessionResult<Self> {
        let mut session = Self::new(transport);

        if let Some(snapshot) = persister.load().await? {
            match persister.mode() {
                SnapshotMode::OptionsOnly => {
                    session.default_options = snapshot.chat_options;
                }
                SnapshotMode::Conversations => {
                    if let Some(persisted) = snapshot.conversations {
                        let conversations = persisted
                            .conversations
                            .into_iter()
                            .map(PersistedConversation::into_conversation)
                            .collect();
                        session.store =
                            ConversationStore::from_parts(conversations, persisted.active);
                    }
                }
            }
            tracing::info!("restored persisted snapshot");
        }

        session.persister = Some(persister);
        Ok(session)
    }

    /// Session-wide default options, merged under per-conversation ones.
    pub fn set_default_options(&mut self, options: ChatOptions) {
        self.default_options = Some(options);
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn conversation(&self, key: &ConversationKey) -> Option<&Conversation> {
        self.store.get(key)
    }

    /// The active conversation, created lazily if its key has no entry.
    pub fn current(&mut self) -> &Conversation {
        self.store.current()
    }

    pub fn current_key(&self) -> &ConversationKey {
        self.store.active_key()
    }

    /// True while any conversation has a stream in flight.
    pub fn has_active_streams(&self) -> bool {
        !self.turns.is_empty()
    }

    pub fn select_conversation(&mut self, key: &ConversationKey) -> SessionResult<()> {
        self.store
            .select(key)
            .context(StoreSnafu { stage: "select-conversation" })
    }

    /// Starts a fresh conversation and makes it active; abandoned empty
    /// drafts are collected by the store.
    pub fn new_conversation(&mut self) -> ConversationKey {
        let key = self.store.new_conversation();
        self.touch_persistence();
        key
    }

    /// Deletes a conversation, cancelling its in-flight stream first. When
    /// the deleted conversation was active the store re-points to a fresh one
    /// before removal.
    pub fn delete_conversation(&mut self, key: &ConversationKey) -> SessionResult<RemovalOutcome> {
        self.cancel_streams_for(key);
        let outcome = self
            .store
            .remove(key)
            .context(StoreSnafu { stage: "delete-conversation" })?;
        self.touch_persistence();
        Ok(outcome)
    }

    /// Sets the active conversation's options and persists them.
    pub fn set_chat_options(&mut self, options: ChatOptions) {
        let key = self.current().key.clone();
        let mut next = self.current().clone();
        next.chat_options = Some(options);
        self.store.commit(&key, next);
        self.touch_persistence();
    }

    /// Removes the most recent message from the active conversation.
    ///
    /// This is the error-rollback path; streaming mutations never delete
    /// messages.
    pub fn remove_last_message(&mut self) -> Option<ChatMessage> {
        let key = self.current().key.clone();
        let mut next = self.current().clone();
        let removed = next.remove_last_message();
        if removed.is_some() {
            self.store.commit(&key, next);
            self.touch_persistence();
        }
        removed
    }

    /// Sends a user message on the active conversation and starts streaming
    /// the reply into a fresh assistant placeholder.
    ///
    /// A send while the same conversation is already loading is a no-op;
    /// other conversations may stream concurrently.
    pub fn send_message(&mut self, text: impl Into<String>) -> SessionResult<()> {
        let text = text.into();
        let conversation = self.current().clone();
        let key = conversation.key.clone();

        if conversation.is_loading {
            tracing::debug!(conversation = %key, "send ignored: a stream is already in flight");
            return Ok(());
        }

        // The outgoing history excludes the pair appended below.
        let history: Vec<HistoryEntry> =
            conversation.history.values().map(HistoryEntry::from).collect();
        let context = RequestContext {
            server_state: conversation.server_state.clone(),
            conversation_id: conversation.key.server_id().cloned(),
            options: self.effective_options(&conversation),
        };
        let request = ChatRequest::new(text.clone())
            .with_history(history)
            .with_context(context);

        let assistant_message = MessageId::generate();
        let mut next = conversation;
        next.append_message(ChatMessage::user(MessageId::generate(), text));
        next.append_message(ChatMessage::assistant_placeholder(assistant_message));
        next.begin_turn();
        next.is_loading = true;
        self.store.commit(&key, next);

        let turn = self.alloc_turn_id();
        match self.transport.open_stream(request) {
            Ok(handle) => {
                self.turns.insert(
                    turn,
                    TurnRoute {
                        conversation: key,
                        assistant_message,
                        cancel: Some(handle.cancel),
                    },
                );
                tokio::spawn(handle.worker);
                self.spawn_forwarder(turn, handle.events);
            }
            Err(error) => {
                // Route the failure through the queue so it lands on the
                // placeholder exactly like a mid-stream transport error.
                self.turns.insert(
                    turn,
                    TurnRoute {
                        conversation: key,
                        assistant_message,
                        cancel: None,
                    },
                );
                let _ = self.events_tx.send(TurnMessage {
                    turn,
                    signal: TurnSignal::Failed(error.to_string()),
                });
                let _ = self.events_tx.send(TurnMessage {
                    turn,
                    signal: TurnSignal::Closed,
                });
            }
        }

        self.touch_persistence();
        Ok(())
    }

    /// Cancels the active conversation's in-flight stream, if any, and
    /// synchronously clears its loading state. Events already in flight still
    /// drain gracefully; cancellation is not an error.
    pub fn stop_answering(&mut self) {
        let key = self.current().key.clone();
        self.cancel_streams_for(&key);
    }

    /// Applies one queued stream event, waiting for it while any stream is
    /// active. Returns false once no stream is active and the queue is empty.
    pub async fn pump_one(&mut self) -> SessionResult<bool> {
        if self.turns.is_empty() {
            match self.events_rx.try_recv() {
                Ok(message) => {
                    self.apply(message)?;
                    Ok(true)
                }
                Err(_) => Ok(false),
            }
        } else {
            match self.events_rx.recv().await {
                Some(message) => {
                    self.apply(message)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    /// Drains stream events until every in-flight turn has closed.
    pub async fn run_until_idle(&mut self) -> SessionResult<()> {
        while self.pump_one().await? {}
        Ok(())
    }

    /// Forwards a like/dislike verdict to the transport.
    pub async fn submit_feedback(&self, submission: FeedbackSubmission) -> SessionResult<()> {
        self.transport
            .submit_feedback(submission)
            .await
            .context(TransportSnafu { stage: "submit-feedback" })
    }

    /// Writes any buffered snapshot immediately. Call during teardown.
    pub async fn flush_persistence(&self) -> SessionResult<()> {
        match &self.persister {
            Some(persister) => persister.flush().await,
            None => Ok(()),
        }
    }

    fn alloc_turn_id(&mut self) -> TurnId {
        let id = TurnId(self.next_turn_id);
        self.next_turn_id = self.next_turn_id.saturating_add(1);
        id
    }

    fn spawn_forwarder(&self, turn: TurnId, mut events: ChatEventStream) {
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if events_tx
                    .send(TurnMessage { turn, signal: event.into() })
                    .is_err()
                {
                    return;
                }
            }
            let _ = events_tx.send(TurnMessage {
                turn,
                signal: TurnSignal::Closed,
            });
        });
    }

    fn effective_options(&self, conversation: &Conversation) -> Option<ChatOptions> {
        match (&conversation.chat_options, &self.default_options) {
            (Some(own), Some(default)) => Some(own.merged_over(default)),
            (Some(own), None) => Some(own.clone()),
            (None, Some(default)) => Some(default.clone()),
            (None, None) => None,
        }
    }

    fn cancel_streams_for(&mut self, key: &ConversationKey) {
        for route in self.turns.values_mut() {
            if route.conversation == *key
                && let Some(mut cancel) = route.cancel.take()
            {
                cancel.cancel();
            }
        }

        if let Some(conversation) = self.store.get(key)
            && conversation.is_loading
        {
            let mut next = conversation.clone();
            next.is_loading = false;
            self.store.commit(key, next);
            self.touch_persistence();
        }
    }

    fn apply(&mut self, message: TurnMessage) -> SessionResult<()> {
        if !self.turns.contains_key(&message.turn) {
            tracing::debug!("dropping event for an already closed turn");
            return Ok(());
        }

        match message.signal {
            TurnSignal::Event(event) => self.apply_turn_event(message.turn, event),
            // A transport failure becomes one synthetic error event on the
            // placeholder; close follows on the queue.
            TurnSignal::Failed(reason) => {
                self.apply_turn_event(message.turn, ChatEvent::Error(reason))
            }
            TurnSignal::Closed => {
                self.close_turn(message.turn);
                Ok(())
            }
        }
    }

    fn apply_turn_event(&mut self, turn: TurnId, event: ChatEvent) -> SessionResult<()> {
        let Some(route) = self.turns.get(&turn) else {
            return Ok(());
        };
        let key = route.conversation.clone();
        let target = route.assistant_message;

        let Some(conversation) = self.store.get(&key) else {
            tracing::warn!(
                conversation = %key,
                tag = event.tag(),
                "dropping event for a deleted conversation"
            );
            return Ok(());
        };

        let (mut next, after) =
            apply_event(conversation, target, &event).context(ReduceSnafu { stage: "apply-event" })?;
        next.log_event(event);
        self.store.commit(&key, next);

        if let Some(AfterEffect::PromoteIdentity { server_id }) = after {
            let promoted = self
                .store
                .promote_identity(&key, &server_id)
                .context(StoreSnafu { stage: "promote-identity" })?;
            for route in self.turns.values_mut() {
                if route.conversation == key {
                    route.conversation = promoted.clone();
                }
            }
            tracing::info!(temp = %key, persisted = %promoted, "conversation identity promoted");
        }

        self.touch_persistence();
        Ok(())
    }

    fn close_turn(&mut self, turn: TurnId) {
        let Some(route) = self.turns.remove(&turn) else {
            return;
        };

        let Some(conversation) = self.store.get(&route.conversation) else {
            return;
        };
        if conversation.is_loading {
            let mut next = conversation.clone();
            next.is_loading = false;
            self.store.commit(&route.conversation, next);
        }
        self.touch_persistence();
    }

    #[cfg(test)]
    fn active_turn_count(&self) -> usize {
        self.turns.len()
    }

    fn touch_persistence(&mut self) {
        let Some(persister) = &self.persister else {
            return;
        };

        let snapshot = match persister.mode() {
            SnapshotMode::OptionsOnly => Snapshot {
                chat_options: self
                    .store
                    .get(self.store.active_key())
                    .and_then(|conversation| conversation.chat_options.clone())
                    .or_else(|| self.default_options.clone()),
                conversations: None,
            },
            SnapshotMode::Conversations => Snapshot {
                chat_options: None,
                conversations: Some(PersistedConversations {
                    conversations: self
                        .store
                        .conversations()
                        .map(PersistedConversation::from)
                        .collect(),
                    active: self.store.active_key().clone(),
                }),
            },
        };

        persister.schedule(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use murmur_core::{Role, ServerConversationId};
    use murmur_storage::{KeyValueStore, MemoryStore};
    use murmur_transport::{ChannelTransport, FeedbackKind, ScriptedStream};
    use serde_json::json;

    fn session_over_channel() -> (ChatSession, ChannelTransport) {
        let transport = ChannelTransport::new();
        let session = ChatSession::new(Arc::new(transport.clone()));
        (session, transport)
    }

    fn assistant_content(session: &ChatSession, key: &ConversationKey) -> String {
        let conversation = session.conversation(key).unwrap();
        conversation
            .history
            .values()
            .rev()
            .find(|message| message.role == Role::Assistant)
            .map(|message| message.content.clone())
            .unwrap_or_default()
    }

    async fn wait_for_cancel(stream: &ScriptedStream) {
        for _ in 0..100 {
            if stream.cancelled() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("stream was never cancelled");
    }

    #[tokio::test]
    async fn hello_scenario_streams_into_the_placeholder() {
        let (mut session, transport) = session_over_channel();
        session.send_message("Hello").unwrap();

        let key = session.current_key().clone();
        let conversation = session.conversation(&key).unwrap();
        assert_eq!(conversation.history.len(), 2);
        assert!(conversation.is_loading);
        let roles: Vec<Role> = conversation.history.values().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);

        let stream = transport.last_stream().unwrap();
        assert_eq!(stream.request().message, "Hello");
        assert!(stream.request().history.is_empty(), "fresh sends carry no history");
        assert_eq!(stream.request().context.conversation_id, None);

        stream.send(ChatEvent::Text("Hi".to_string()));
        stream.send(ChatEvent::Text(" there".to_string()));
        stream.close();
        session.run_until_idle().await.unwrap();

        assert_eq!(assistant_content(&session, &key), "Hi there");
        let conversation = session.conversation(&key).unwrap();
        assert!(!conversation.is_loading);
        assert!(conversation.history.values().all(|m| m.error.is_none()));
        assert_eq!(conversation.events_log.len(), 1);
        assert_eq!(conversation.events_log[0].len(), 2);
    }

    #[tokio::test]
    async fn sending_while_loading_is_a_no_op() {
        let (mut session, transport) = session_over_channel();
        session.send_message("first").unwrap();
        session.send_message("second").unwrap();

        assert_eq!(transport.open_count(), 1, "the overlapping send opened nothing");
        let key = session.current_key().clone();
        assert_eq!(session.conversation(&key).unwrap().history.len(), 2);
    }

    #[tokio::test]
    async fn conversations_stream_in_isolation() {
        let (mut session, transport) = session_over_channel();

        let key_a = session.current_key().clone();
        session.send_message("on A").unwrap();

        let key_b = session.new_conversation();
        session.send_message("on B").unwrap();
        assert_eq!(session.active_turn_count(), 2);

        let streams = transport.streams();
        assert_eq!(streams.len(), 2);
        streams[1].send(ChatEvent::Text("B's answer".to_string()));
        streams[1].close();
        streams[0].send(ChatEvent::Text("A's answer".to_string()));
        streams[0].close();
        session.run_until_idle().await.unwrap();

        assert_eq!(assistant_content(&session, &key_a), "A's answer");
        assert_eq!(assistant_content(&session, &key_b), "B's answer");
        assert!(!session.conversation(&key_a).unwrap().is_loading);
        assert!(!session.conversation(&key_b).unwrap().is_loading);
    }

    #[tokio::test]
    async fn mid_stream_identity_promotion_re_keys_the_store() {
        let (mut session, transport) = session_over_channel();
        let temp_key = session.current_key().clone();
        assert!(temp_key.is_temporary());

        session.send_message("persist me").unwrap();
        let stream = transport.last_stream().unwrap();
        stream.send(ChatEvent::ConversationId(ServerConversationId::from("conv-main")));
        stream.send(ChatEvent::Text("saved".to_string()));
        stream.close();
        session.run_until_idle().await.unwrap();

        let promoted = ConversationKey::Persisted(ServerConversationId::from("conv-main"));
        assert!(session.conversation(&temp_key).is_none());
        assert_eq!(session.current_key(), &promoted);
        assert_eq!(assistant_content(&session, &promoted), "saved");

        // The next request now carries the permanent id in its context.
        session.send_message("follow up").unwrap();
        let stream = transport.last_stream().unwrap();
        assert_eq!(
            stream.request().context.conversation_id,
            Some(ServerConversationId::from("conv-main"))
        );
        assert_eq!(stream.request().history.len(), 2);
    }

    #[tokio::test]
    async fn stop_answering_clears_loading_and_keeps_partial_content() {
        let (mut session, transport) = session_over_channel();
        session.send_message("long question").unwrap();
        let key = session.current_key().clone();

        let stream = transport.last_stream().unwrap();
        stream.send(ChatEvent::Text("partial ".to_string()));
        assert!(session.pump_one().await.unwrap());

        session.stop_answering();
        assert!(!session.conversation(&key).unwrap().is_loading, "cleared synchronously");
        wait_for_cancel(&stream).await;

        // An event already in flight at cancel time still applies gracefully.
        stream.send(ChatEvent::Text("answer".to_string()));
        stream.close();
        session.run_until_idle().await.unwrap();

        let conversation = session.conversation(&key).unwrap();
        assert_eq!(assistant_content(&session, &key), "partial answer");
        assert!(
            conversation.history.values().all(|m| m.error.is_none()),
            "cancellation is not an error"
        );
        assert!(!conversation.is_loading);
    }

    #[tokio::test]
    async fn transport_failure_becomes_an_error_on_the_placeholder() {
        let (mut session, transport) = session_over_channel();
        session.send_message("doomed").unwrap();
        let key = session.current_key().clone();

        let stream = transport.last_stream().unwrap();
        stream.send(ChatEvent::Text("half an ans".to_string()));
        stream.fail("connection reset");
        session.run_until_idle().await.unwrap();

        let conversation = session.conversation(&key).unwrap();
        let placeholder = conversation
            .history
            .values()
            .find(|m| m.role == Role::Assistant)
            .unwrap();
        assert_eq!(placeholder.content, "half an ans");
        assert_eq!(placeholder.error.as_deref(), Some("connection reset"));
        assert!(!conversation.is_loading);
    }

    #[tokio::test]
    async fn deleting_the_active_conversation_cancels_and_re_points() {
        let (mut session, transport) = session_over_channel();
        session.send_message("about to vanish").unwrap();
        let doomed = session.current_key().clone();

        let stream = transport.last_stream().unwrap();
        let outcome = session.delete_conversation(&doomed).unwrap();
        let replacement = outcome.replacement.unwrap();

        assert!(session.conversation(&doomed).is_none());
        assert_eq!(session.current_key(), &replacement);
        wait_for_cancel(&stream).await;

        // Whatever was still in flight lands on a deleted conversation and is
        // dropped without failing the session.
        stream.send(ChatEvent::Text("ghost".to_string()));
        stream.close();
        session.run_until_idle().await.unwrap();
        assert!(session.conversation(&doomed).is_none());
    }

    #[tokio::test]
    async fn new_conversation_twice_leaves_a_single_empty_draft() {
        let (mut session, _transport) = session_over_channel();
        session.new_conversation();
        let second = session.new_conversation();

        assert_eq!(session.store().len(), 1);
        assert_eq!(session.current_key(), &second);
    }

    #[tokio::test]
    async fn options_merge_into_the_request_context() {
        let (mut session, transport) = session_over_channel();

        let mut defaults = ChatOptions::default();
        defaults.model = Some("default-model".to_string());
        defaults.temperature = Some(0.3);
        session.set_default_options(defaults);

        let mut own = ChatOptions::default();
        own.model = Some("picked-model".to_string());
        session.set_chat_options(own);

        session.send_message("with options").unwrap();
        let stream = transport.last_stream().unwrap();
        let options = stream.request().context.options.clone().unwrap();
        assert_eq!(options.model.as_deref(), Some("picked-model"));
        assert_eq!(options.temperature, Some(0.3));
    }

    #[tokio::test]
    async fn server_state_echoes_back_on_the_next_request() {
        let (mut session, transport) = session_over_channel();
        session.send_message("turn one").unwrap();

        let stream = transport.last_stream().unwrap();
        stream.send(ChatEvent::StateUpdate(json!({"cursor": 11})));
        stream.close();
        session.run_until_idle().await.unwrap();

        session.send_message("turn two").unwrap();
        let stream = transport.last_stream().unwrap();
        assert_eq!(
            stream.request().context.server_state,
            Some(json!({"cursor": 11}))
        );
    }

    #[tokio::test]
    async fn snapshot_restores_before_any_dispatch() {
        let store = Arc::new(MemoryStore::new());
        let transport = ChannelTransport::new();

        let mut session = ChatSession::initialize(
            Arc::new(transport.clone()),
            SnapshotPersister::new(store.clone(), SnapshotMode::Conversations),
        )
        .await
        .unwrap();

        session.send_message("remember this").unwrap();
        let key = session.current_key().clone();
        let stream = transport.last_stream().unwrap();
        stream.send(ChatEvent::Text("stored answer".to_string()));
        stream.close();
        session.run_until_idle().await.unwrap();
        session.flush_persistence().await.unwrap();
        drop(session);

        let mut restored = ChatSession::initialize(
            Arc::new(transport.clone()),
            SnapshotPersister::new(store, SnapshotMode::Conversations),
        )
        .await
        .unwrap();

        assert_eq!(restored.current_key(), &key);
        let conversation = restored.current().clone();
        assert_eq!(conversation.history.len(), 2);
        assert!(!conversation.is_loading);
        assert!(conversation.events_log.is_empty());
        assert_eq!(assistant_content(&restored, &key), "stored answer");
    }

    #[tokio::test]
    async fn options_only_snapshots_persist_just_the_options() {
        let store = Arc::new(MemoryStore::new());
        let transport = ChannelTransport::new();

        let mut session = ChatSession::initialize(
            Arc::new(transport.clone()),
            SnapshotPersister::new(store.clone(), SnapshotMode::OptionsOnly),
        )
        .await
        .unwrap();

        let mut options = ChatOptions::default();
        options.model = Some("kept-model".to_string());
        session.set_chat_options(options);
        session.flush_persistence().await.unwrap();
        drop(session);

        let restored = ChatSession::initialize(
            Arc::new(transport),
            SnapshotPersister::new(store, SnapshotMode::OptionsOnly),
        )
        .await
        .unwrap();

        assert_eq!(
            restored.default_options.as_ref().unwrap().model.as_deref(),
            Some("kept-model")
        );
        assert_eq!(restored.store().len(), 1, "no conversations were persisted");
    }

    #[tokio::test]
    async fn failure_before_any_content_still_lands_on_the_placeholder() {
        let (mut session, transport) = session_over_channel();
        session.send_message("unlucky").unwrap();
        let stream = transport.last_stream().unwrap();
        stream.fail("could not connect");
        session.run_until_idle().await.unwrap();

        let key = session.current_key().clone();
        let conversation = session.conversation(&key).unwrap();
        assert_eq!(
            conversation
                .history
                .values()
                .find(|m| m.role == Role::Assistant)
                .unwrap()
                .error
                .as_deref(),
            Some("could not connect")
        );
        assert!(!conversation.is_loading);
    }

    #[tokio::test]
    async fn feedback_reaches_the_transport() {
        let (session, transport) = session_over_channel();
        session
            .submit_feedback(FeedbackSubmission {
                message_id: murmur_core::ServerMessageId::from("srv-3"),
                feedback: FeedbackKind::Like,
                payload: json!({"comment": "helpful"}),
            })
            .await
            .unwrap();

        let submissions = transport.feedback_submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].feedback, FeedbackKind::Like);
    }

    #[tokio::test]
    async fn streaming_writes_coalesce_into_few_snapshot_writes() {
        let store = Arc::new(MemoryStore::new());
        let transport = ChannelTransport::new();

        let mut session = ChatSession::initialize(
            Arc::new(transport.clone()),
            SnapshotPersister::with_delay(
                store.clone(),
                SnapshotMode::Conversations,
                Duration::from_millis(30),
            ),
        )
        .await
        .unwrap();

        session.send_message("spam").unwrap();
        let stream = transport.last_stream().unwrap();
        for index in 0..200 {
            stream.send(ChatEvent::Text(format!("{index} ")));
        }
        stream.close();
        session.run_until_idle().await.unwrap();
        session.flush_persistence().await.unwrap();

        let raw = store
            .get(crate::persist::HISTORY_STORE_KEY)
            .await
            .unwrap()
            .unwrap();
        assert!(raw.contains("199 "), "the final append made it to disk");
    }
}
