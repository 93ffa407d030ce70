pub mod error;
/// Persistent chat options (figment-loaded, atomically rewritten).
pub mod options;
/// Snapshot shapes and the write-coalescing persister.
pub mod persist;
/// The stream orchestrator.
pub mod session;

pub use error::{SessionError, SessionResult};
pub use options::{OptionsError, OptionsStore};
pub use persist::{
    HISTORY_STORE_KEY, PersistedConversation, PersistedConversations, Snapshot, SnapshotMode,
    SnapshotPersister, WRITE_COALESCE_MS,
};
pub use session::ChatSession;
