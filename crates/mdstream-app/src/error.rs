//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Stream error: {0}")]
    Facade(#[from] mdstream_facade::FacadeError),

    #[error("REST client error: {0}")]
    Rest(#[from] mdstream_rest::RestError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] mdstream_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
