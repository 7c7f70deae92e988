use thiserror::Error;

use crate::notifier::NotifierError;

#[derive(Error, Debug)]
pub enum TelefeedError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Fetch failed with status {status} for @{username}")]
    Fetch { username: String, status: u16 },

    #[error("No posts extracted for @{0}")]
    EmptyExtraction(String),

    #[error("Notifier error: {0}")]
    Notifier(#[from] NotifierError),

    #[error("Invalid channel username: {0}")]
    InvalidUsername(String),

    #[error("No verified destination for user {0}")]
    NoDestination(i64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<crate::config::ConfigError> for TelefeedError {
    fn from(e: crate::config::ConfigError) -> Self {
        TelefeedError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TelefeedError>;
