use snafu::Snafu;

use crate::ids::MessageId;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CoreError {
    #[snafu(display("id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display(
        "event targets message '{message_id}' which conversation '{conversation}' does not contain"
    ))]
    UnknownMessage {
        stage: &'static str,
        conversation: String,
        message_id: MessageId,
    },
}

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("conversation '{key}' is not present in the store"))]
    ConversationNotFound {
        stage: &'static str,
        key: String,
    },
    #[snafu(display(
        "cannot promote conversation '{temp}' to '{server_id}': the temporary entry is absent"
    ))]
    PromotionSourceMissing {
        stage: &'static str,
        temp: String,
        server_id: String,
    },
    #[snafu(display(
        "cannot promote conversation '{temp}' to '{server_id}': the target key already exists"
    ))]
    PromotionTargetExists {
        stage: &'static str,
        temp: String,
        server_id: String,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;
