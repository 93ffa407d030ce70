use indexmap::IndexMap;
use snafu::ensure;

use crate::conversation::Conversation;
use crate::error::{
    ConversationNotFoundSnafu, PromotionSourceMissingSnafu, PromotionTargetExistsSnafu,
    StoreResult,
};
use crate::ids::{ConversationKey, ServerConversationId};

/// Outcome of removing a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalOutcome {
    /// Key of the fresh conversation created when the removed one was active.
    pub replacement: Option<ConversationKey>,
}

/// Owns the conversation map and the active-conversation pointer.
///
/// All mutation goes through these operations, and committed conversation
/// values are swapped in whole: a reader holding a clone observes either the
/// complete prior state or the complete next state, never a partial one.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationStore {
    conversations: IndexMap<ConversationKey, Conversation>,
    active: ConversationKey,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    /// Creates a store holding one empty temporary conversation, active.
    pub fn new() -> Self {
        let conversation = Conversation::temporary();
        let active = conversation.key.clone();
        let mut conversations = IndexMap::new();
        conversations.insert(active.clone(), conversation);
        Self { conversations, active }
    }

    /// Rebuilds a store from restored conversations and an active pointer.
    ///
    /// A dangling pointer falls back to a fresh temporary conversation rather
    /// than failing startup over a stale snapshot.
    pub fn from_parts(conversations: Vec<Conversation>, active: ConversationKey) -> Self {
        let mut map = IndexMap::new();
        for conversation in conversations {
            map.insert(conversation.key.clone(), conversation);
        }

        let mut store = Self {
            conversations: map,
            active,
        };
        if !store.conversations.contains_key(&store.active) {
            tracing::warn!(
                active = %store.active,
                "restored active conversation is missing; starting a fresh one"
            );
            let conversation = Conversation::temporary();
            store.active = conversation.key.clone();
            store.conversations.insert(store.active.clone(), conversation);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn active_key(&self) -> &ConversationKey {
        &self.active
    }

    pub fn contains(&self, key: &ConversationKey) -> bool {
        self.conversations.contains_key(key)
    }

    pub fn get(&self, key: &ConversationKey) -> Option<&Conversation> {
        self.conversations.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ConversationKey> {
        self.conversations.keys()
    }

    pub fn conversations(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.values()
    }

    /// Returns the active conversation, creating one if the pointer has no
    /// entry yet. Never fails on a missing current key.
    pub fn current(&mut self) -> &Conversation {
        let active = self.active.clone();
        self.conversations
            .entry(active.clone())
            .or_insert_with(|| Conversation::new(active))
    }

    /// Commits a new conversation value under `key`, replacing the previous
    /// snapshot whole.
    pub fn commit(&mut self, key: &ConversationKey, conversation: Conversation) {
        self.conversations.insert(key.clone(), conversation);
    }

    /// Makes `key` the active conversation.
    pub fn select(&mut self, key: &ConversationKey) -> StoreResult<()> {
        ensure!(
            self.conversations.contains_key(key),
            ConversationNotFoundSnafu {
                stage: "select",
                key: key.to_string(),
            }
        );
        self.active = key.clone();
        Ok(())
    }

    /// Removes a conversation. When the removed entry was active, the store
    /// re-points to a freshly created conversation *before* dropping the
    /// entry, so the active pointer never references a removed key.
    pub fn remove(&mut self, key: &ConversationKey) -> StoreResult<RemovalOutcome> {
        ensure!(
            self.conversations.contains_key(key),
            ConversationNotFoundSnafu {
                stage: "remove",
                key: key.to_string(),
            }
        );

        let replacement = if self.active == *key {
            let conversation = Conversation::temporary();
            let fresh = conversation.key.clone();
            self.conversations.insert(fresh.clone(), conversation);
            self.active = fresh.clone();
            Some(fresh)
        } else {
            None
        };

        self.conversations.shift_remove(key);
        Ok(RemovalOutcome { replacement })
    }

    /// Creates a fresh temporary conversation and makes it active.
    ///
    /// Other temporary, inactive, message-less conversations are garbage
    /// collected here so abandoned never-sent drafts do not accumulate.
    pub fn new_conversation(&mut self) -> ConversationKey {
        let conversation = Conversation::temporary();
        let fresh = conversation.key.clone();
        self.conversations.insert(fresh.clone(), conversation);
        self.active = fresh.clone();

        self.conversations.retain(|key, conversation| {
            let collectable =
                key.is_temporary() && *key != fresh && conversation.is_empty() && !conversation.is_loading;
            if collectable {
                tracing::debug!(key = %key, "collecting abandoned empty draft conversation");
            }
            !collectable
        });

        fresh
    }

    /// Re-keys a conversation from its temporary id to the server-assigned
    /// permanent id and updates the active pointer iff it referenced `temp`.
    ///
    /// A missing source entry means the transport delivered events for a
    /// conversation this store never created; that error is non-recoverable
    /// and callers must treat it as fatal.
    pub fn promote_identity(
        &mut self,
        temp: &ConversationKey,
        server_id: &ServerConversationId,
    ) -> StoreResult<ConversationKey> {
        let promoted = ConversationKey::Persisted(server_id.clone());
        if *temp == promoted {
            return Ok(promoted);
        }

        ensure!(
            !self.conversations.contains_key(&promoted),
            PromotionTargetExistsSnafu {
                stage: "promote-identity",
                temp: temp.to_string(),
                server_id: server_id.to_string(),
            }
        );

        let Some(mut conversation) = self.conversations.shift_remove(temp) else {
            return PromotionSourceMissingSnafu {
                stage: "promote-identity",
                temp: temp.to_string(),
                server_id: server_id.to_string(),
            }
            .fail();
        };

        conversation.key = promoted.clone();
        self.conversations.insert(promoted.clone(), conversation);
        if self.active == *temp {
            self.active = promoted.clone();
        }
        Ok(promoted)
    }
}
