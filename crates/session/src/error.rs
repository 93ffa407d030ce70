use snafu::Snafu;

use murmur_core::{CoreError, StoreError};
use murmur_storage::StorageError;
use murmur_transport::TransportError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("transport failed on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("snapshot storage failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("failed to serialize the persistence snapshot"))]
    SnapshotSerialize {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("event application failed on `{stage}`: {source}"))]
    Reduce {
        stage: &'static str,
        source: CoreError,
    },
    #[snafu(display("conversation store rejected `{stage}`: {source}"))]
    Store {
        stage: &'static str,
        source: StoreError,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;
