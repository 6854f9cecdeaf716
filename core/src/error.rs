use crate::types::SourceId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // The field cannot be called `source`: thiserror reserves that name
    // for the error chain.
    #[error("Source '{source_id}' unavailable for this wave")]
    SourceUnavailable { source_id: SourceId },

    #[error("Writes are frozen; unfreeze required before refresh")]
    Frozen,

    #[error("Job '{job}' exceeded its execution deadline")]
    DeadlineExceeded { job: String },

    #[error("Job graph cycle involving '{job}'")]
    CycleDetected { job: String },

    #[error("Job '{job}' depends on unknown upstream '{upstream}'")]
    UnknownUpstream { job: String, upstream: String },

    #[error("Job '{name}' not found")]
    JobNotFound { name: String },

    #[error("k-anonymity violation: {undersized} published segment(s) below k={k}")]
    KAnonymityViolation { undersized: i64, k: i64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
