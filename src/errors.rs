use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Config(String),
    #[error("analysis failed: {0}")]
    Analysis(String),
    #[error("geocoding failed: {0}")]
    Geocoding(String),
    #[error("{0} not found")]
    NotFound(String),
}

impl AppError {
    /// Transport-level failures that are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Http(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err
                        .status()
                        .map(|status| status.is_server_error() || status.as_u16() == 429)
                        .unwrap_or(false)
            }
            _ => false,
        }
    }
}
