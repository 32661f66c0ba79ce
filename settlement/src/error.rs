//! Error types for the settlement engine

use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Rejected by the crowdfund state machine
    #[error("Crowdfund error: {0}")]
    Crowdfund(#[from] crowdfund_core::Error),

    /// Actor mailbox or response channel closed
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The state machine error, if this is one
    pub fn crowdfund(&self) -> Option<&crowdfund_core::Error> {
        match self {
            Error::Crowdfund(err) => Some(err),
            _ => None,
        }
    }
}
