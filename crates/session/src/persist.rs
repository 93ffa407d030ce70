use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use murmur_core::{ChatMessage, ChatOptions, Conversation, ConversationKey};
use murmur_storage::KeyValueStore;

use crate::error::{SessionResult, SnapshotSerializeSnafu, StorageSnafu};

/// Single namespaced key the whole snapshot lives under.
pub const HISTORY_STORE_KEY: &str = "history-store";

/// How long the coalescing buffer waits before flushing.
///
/// Streaming appends mutate state per token; the trailing edge turns those
/// bursts into one write.
pub const WRITE_COALESCE_MS: u64 = 200;

/// What the deployment persists: just the options, or the conversation map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotMode {
    OptionsOnly,
    Conversations,
}

/// Durable subset of one conversation. Loading flags and per-turn event logs
/// are session-local and deliberately absent: a restart cannot resume a dead
/// stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedConversation {
    pub key: ConversationKey,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followup_messages: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_state: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_options: Option<ChatOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl From<&Conversation> for PersistedConversation {
    fn from(conversation: &Conversation) -> Self {
        Self {
            key: conversation.key.clone(),
            messages: conversation.history.values().cloned().collect(),
            followup_messages: conversation.followup_messages.clone(),
            server_state: conversation.server_state.clone(),
            chat_options: conversation.chat_options.clone(),
            summary: conversation.summary.clone(),
        }
    }
}

impl PersistedConversation {
    pub fn into_conversation(self) -> Conversation {
        let mut conversation = Conversation::new(self.key);
        for message in self.messages {
            conversation.append_message(message);
        }
        // `append_message` clears follow-ups; restore them after the history.
        conversation.followup_messages = self.followup_messages;
        conversation.server_state = self.server_state;
        conversation.chat_options = self.chat_options;
        conversation.summary = self.summary;
        conversation
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedConversations {
    pub conversations: Vec<PersistedConversation>,
    pub active: ConversationKey,
}

/// The value written under [`HISTORY_STORE_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_options: Option<ChatOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversations: Option<PersistedConversations>,
}

struct PersisterState {
    pending: Option<Snapshot>,
    flusher_running: bool,
}

/// Write-coalescing queue in front of the key/value store.
///
/// `schedule` buffers the latest snapshot (later snapshots replace earlier
/// ones) and makes sure one flusher task is running; `flush` writes whatever
/// is buffered right now, for teardown.
pub struct SnapshotPersister {
    store: Arc<dyn KeyValueStore>,
    mode: SnapshotMode,
    delay: Duration,
    state: Arc<Mutex<PersisterState>>,
}

impl SnapshotPersister {
    pub fn new(store: Arc<dyn KeyValueStore>, mode: SnapshotMode) -> Self {
        Self::with_delay(store, mode, Duration::from_millis(WRITE_COALESCE_MS))
    }

    pub fn with_delay(store: Arc<dyn KeyValueStore>, mode: SnapshotMode, delay: Duration) -> Self {
        Self {
            store,
            mode,
            delay,
            state: Arc::new(Mutex::new(PersisterState {
                pending: None,
                flusher_running: false,
            })),
        }
    }

    pub fn mode(&self) -> SnapshotMode {
        self.mode
    }

    /// Reads the snapshot written by a previous run, once, at startup.
    ///
    /// An undecodable payload is treated like an absent one; a stale or
    /// corrupt snapshot must not block startup.
    pub async fn load(&self) -> SessionResult<Option<Snapshot>> {
        let raw = self
            .store
            .get(HISTORY_STORE_KEY)
            .await
            .context(StorageSnafu { stage: "snapshot-load" })?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<Snapshot>(&raw) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(error) => {
                tracing::warn!(%error, "stored snapshot is undecodable; starting fresh");
                Ok(None)
            }
        }
    }

    /// Buffers `snapshot` as the next write; later snapshots replace it.
    pub fn schedule(&self, snapshot: Snapshot) {
        let spawn_flusher = {
            let mut state = lock_unpoisoned(&self.state);
            state.pending = Some(snapshot);
            if state.flusher_running {
                false
            } else {
                state.flusher_running = true;
                true
            }
        };

        if spawn_flusher {
            let store = Arc::clone(&self.store);
            let state = Arc::clone(&self.state);
            let delay = self.delay;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(delay).await;
                    let snapshot = {
                        let mut state = lock_unpoisoned(&state);
                        match state.pending.take() {
                            Some(snapshot) => snapshot,
                            None => {
                                state.flusher_running = false;
                                return;
                            }
                        }
                    };
                    write_snapshot(store.as_ref(), &snapshot).await;
                }
            });
        }
    }

    /// Writes any buffered snapshot immediately. Call during teardown.
    pub async fn flush(&self) -> SessionResult<()> {
        let snapshot = lock_unpoisoned(&self.state).pending.take();
        let Some(snapshot) = snapshot else {
            return Ok(());
        };

        let payload = serde_json::to_string(&snapshot).context(SnapshotSerializeSnafu {
            stage: "snapshot-flush",
        })?;
        self.store
            .set(HISTORY_STORE_KEY, payload)
            .await
            .context(StorageSnafu { stage: "snapshot-flush" })
    }
}

async fn write_snapshot(store: &dyn KeyValueStore, snapshot: &Snapshot) {
    let payload = match serde_json::to_string(snapshot) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::error!(%error, "failed to serialize the persistence snapshot");
            return;
        }
    };

    if let Err(error) = store.set(HISTORY_STORE_KEY, payload).await {
        tracing::error!(%error, "failed to write the persistence snapshot");
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
