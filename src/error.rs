use thiserror::Error;

pub use anyhow::Context;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// The computed fetch window starts after it ends. Raised before any
    /// network call is made.
    #[error("invalid date window: start {start} is after end {end}")]
    InvalidRange { start: String, end: String },
    /// Malformed parameters handed to a fetch. Programming-error class, not
    /// user input.
    #[error("invalid request parameter: {0}")]
    InvalidRequest(String),
    /// The listing source has no record for the security.
    #[error("security {0} is unknown to the listing source")]
    NotFound(String),
    /// Transport failure while talking to the remote source.
    #[error("remote source unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),
    /// The fetch succeeded but the payload does not decode as the expected
    /// tabular shape. Never retried, never skipped.
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn message<T: Into<String>>(msg: T) -> Self {
        AppError::Message(msg.into())
    }
}
