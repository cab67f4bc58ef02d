use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Envelope decode failure: {0}")]
    EnvelopeDecode(String),

    /// The log append did not complete; the message is fan-out only
    #[error("Log unavailable: {0:#}")]
    LogUnavailable(anyhow::Error),

    #[error("Store write failure: {0:#}")]
    StoreWriteFailure(anyhow::Error),

    #[error("Broadcast failure: {0:#}")]
    BroadcastFailure(anyhow::Error),

    #[error("Repository error: {0:#}")]
    RepositoryError(#[from] anyhow::Error),
}
