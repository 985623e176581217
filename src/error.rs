//! Error types for phone-linker

use std::time::Duration;
use thiserror::Error;

/// Startup step that produced an [`Error::Initialization`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    /// Mapping store
    Store,
    /// Chat connector and registration flow
    Chat,
    /// Relay gateway listener
    Gateway,
}

impl std::fmt::Display for InitStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitStep::Store => write!(f, "store"),
            InitStep::Chat => write!(f, "chat"),
            InitStep::Gateway => write!(f, "gateway"),
        }
    }
}

/// Errors that can occur while relaying or registering
#[derive(Debug, Error)]
pub enum Error {
    /// Lookup miss. Expected; callers map it to a domain outcome.
    #[error("Mapping not found")]
    NotFound,

    /// Store connectivity or I/O failure
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Missing or wrong shared secret
    #[error("{0}")]
    AuthRejected(&'static str),

    /// Chat platform send/receive failure
    #[error("Connector error: {0}")]
    Connector(String),

    /// A startup step failed
    #[error("Initialization of {step} failed: {source}")]
    Initialization {
        step: InitStep,
        #[source]
        source: Box<Error>,
    },

    /// Stop delegates did not finish before the deadline
    #[error("Shutdown sequence timeout after {0:?}")]
    ShutdownTimeout(Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The call context was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// The call context deadline elapsed
    #[error("Operation timed out")]
    Timeout,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Wrap an error as the failure of a startup step.
    pub fn initialization(step: InitStep, source: Error) -> Self {
        Error::Initialization {
            step,
            source: Box::new(source),
        }
    }

    /// True for a lookup miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            other => Error::StoreUnavailable(other.to_string()),
        }
    }
}

/// Result type alias for phone-linker operations
pub type Result<T> = std::result::Result<T, Error>;
