use thiserror::Error;

use crate::types::Channel;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("recipient is required")]
    EmptyRecipient,

    #[error("content is required")]
    EmptyContent,

    #[error("content exceeds {limit} byte limit for {channel}")]
    ContentTooLong { channel: Channel, limit: usize },

    #[error("invalid priority: {0}")]
    InvalidPriority(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid status transition: current status is {0}")]
    InvalidStatusTransition(String),

    #[error("notification not found")]
    NotificationNotFound,

    #[error("batch not found")]
    BatchNotFound,

    #[error("batch exceeds maximum size of 1000")]
    BatchTooLarge,

    #[error("batch must contain at least one notification")]
    BatchEmpty,

    #[error("duplicate idempotency key")]
    DuplicateIdempotencyKey,

    #[error("template name is required")]
    EmptyTemplateName,

    #[error("template body is required")]
    EmptyTemplateBody,

    #[error("invalid template body syntax: {0}")]
    InvalidTemplateBody(String),

    #[error("template not found")]
    TemplateNotFound,

    #[error("template name already exists")]
    DuplicateTemplateName,

    #[error("template render failed: {0}")]
    TemplateRenderFailed(String),

    #[error("delivery provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("permanent provider error: {0}")]
    ProviderRejected(String),

    #[error("storage error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Transient errors are expected to succeed on retry and are absorbed
    /// into the retry schedule instead of failing the row.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ProviderUnavailable(_) | Error::CircuitOpen)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
