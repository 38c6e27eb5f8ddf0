//! mdstream application.
//!
//! Loads configuration, opens every configured candle and depth stream on
//! one shared multiplexer, logs summaries and shuts everything down on
//! Ctrl-C.

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
