use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RestError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type RestResult<T> = Result<T, RestError>;
