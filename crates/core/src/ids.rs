use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult, InvalidIdSnafu};

// Macro keeps client-minted ID wrappers structurally identical, so snapshot
// migrations stay predictable.
macro_rules! define_local_id {
    ($name:ident, $id_type:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(raw: Uuid) -> Self {
                Self(raw)
            }

            pub fn generate() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn parse(raw: &str) -> CoreResult<Self> {
                let parsed = Uuid::parse_str(raw).context(InvalidIdSnafu {
                    stage: "parse-local-id",
                    id_type: $id_type,
                    raw: raw.to_string(),
                })?;
                Ok(Self(parsed))
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self::new(value)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(raw: &str) -> CoreResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

// Server-issued identifiers are opaque strings; no parsing beyond non-emptiness
// is assumed on this side of the wire.
macro_rules! define_server_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

define_local_id!(LocalConversationId, "local-conversation-id");
define_local_id!(MessageId, "message-id");

define_server_id!(ServerConversationId);
define_server_id!(ServerMessageId);
define_server_id!(UpdateId);
define_server_id!(ImageId);
define_server_id!(ConfirmationId);
define_server_id!(TaskId);

/// Conversation identity as the store keys it.
///
/// A conversation starts under a client-minted temporary id and is re-keyed
/// exactly once when the server assigns its permanent id. A persisted id is
/// immutable for the rest of the conversation's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKey {
    Temporary(LocalConversationId),
    Persisted(ServerConversationId),
}

impl ConversationKey {
    /// Mints a fresh temporary key.
    pub fn temporary() -> Self {
        Self::Temporary(LocalConversationId::generate())
    }

    /// Returns true while the server has not yet assigned a permanent id.
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns the server id if and only if the identity has been promoted.
    pub fn server_id(&self) -> Option<&ServerConversationId> {
        match self {
            Self::Temporary(_) => None,
            Self::Persisted(server_id) => Some(server_id),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temporary(local_id) => write!(formatter, "temp:{local_id}"),
            Self::Persisted(server_id) => formatter.write_str(server_id.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_temporary_keys_are_unique() {
        let first = ConversationKey::temporary();
        let second = ConversationKey::temporary();
        assert_ne!(first, second);
        assert!(first.is_temporary());
        assert!(first.server_id().is_none());
    }

    #[test]
    fn persisted_key_exposes_server_id() {
        let key = ConversationKey::Persisted(ServerConversationId::from("conv-42"));
        assert!(!key.is_temporary());
        assert_eq!(key.server_id().map(ServerConversationId::as_str), Some("conv-42"));
        assert_eq!(key.to_string(), "conv-42");
    }

    #[test]
    fn local_id_round_trips_through_parse() {
        let id = MessageId::generate();
        let reparsed = MessageId::parse(&id.to_string()).unwrap();
        assert_eq!(id, reparsed);
        assert!(MessageId::parse("not-a-uuid").is_err());
    }
}
