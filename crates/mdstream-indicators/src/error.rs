use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IndicatorError {
    #[error("Invalid {indicator} period: {reason}")]
    InvalidPeriod {
        indicator: &'static str,
        reason: String,
    },

    #[error("Invalid {indicator} parameter: {reason}")]
    InvalidParameter {
        indicator: &'static str,
        reason: String,
    },
}

pub type IndicatorResult<T> = Result<T, IndicatorError>;
