use crate::config::Backend;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Failed to send message: {0:#}")]
    SendFailure(#[source] anyhow::Error),

    #[error("Subscription failed: {0:#}")]
    SubscriptionError(#[source] anyhow::Error),

    #[error("Failed to read: {0:#}")]
    ReadFailure(#[source] anyhow::Error),

    #[error("Failed to update conversation: {0:#}")]
    UpdateFailure(#[source] anyhow::Error),

    #[error("Message body is empty")]
    EmptyMessage,

    #[error("Invalid participant: {0}")]
    InvalidParticipant(String),

    #[error("Operation not supported by the {0} backend")]
    Unsupported(Backend),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),
}
