use mdstream_indicators::IndicatorError;
use mdstream_rest::RestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("Indicator configuration: {0}")]
    Indicator(#[from] IndicatorError),

    #[error("History fetch failed: {0}")]
    Rest(#[from] RestError),

    #[error("Invalid stream configuration: {0}")]
    InvalidConfig(String),

    #[error("Stream is closed")]
    Closed,
}

pub type FacadeResult<T> = Result<T, FacadeError>;
