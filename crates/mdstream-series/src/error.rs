//! Series error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("Invalid cached series {key}: {reason}")]
    InvalidCache { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SeriesResult<T> = Result<T, SeriesError>;
