//! Error types for blobq-core
//!
//! One error type covers configuration mistakes raised at submission time,
//! transfer failures handed to result listeners, and connection failures
//! raised by the registry.

use thiserror::Error;

/// Result type alias for blobq-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause carried by [`Error::Connection`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Broad classes of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller misuse, reported synchronously and never retried
    Configuration,
    /// Failure while obtaining or using a stream, delivered to the result listener
    Transfer,
    /// The shared client could not be built
    Connection,
}

/// Error types for blobq-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// A transaction was submitted without a result listener
    #[error("Result listener missing: {0}")]
    ListenerMissing(String),

    /// The target queue has no worker threads yet
    #[error("Queue not initialized: {0}")]
    NotInitialized(String),

    /// Worker threads were already created for this queue
    #[error("Queue already started: {0}")]
    AlreadyStarted(String),

    /// A queue needs at least one worker
    #[error("Invalid thread count: {0}")]
    InvalidThreadCount(usize),

    /// The queue no longer accepts work
    #[error("Queue is shutting down: {0}")]
    ShuttingDown(String),

    /// `connect` was called before credentials were supplied
    #[error("No credentials supplied")]
    MissingCredentials,

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid path format
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Alias not found
    #[error("Alias not found: {0}")]
    AliasNotFound(String),

    /// No client has been established yet
    #[error("Storage client not connected")]
    NotConnected,

    /// Blob or bucket not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A write precondition did not hold
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Authentication or permission failure
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Network or service error
    #[error("Network error: {0}")]
    Network(String),

    /// The transaction was removed from its queue before it ran
    #[error("Transaction cancelled: {0}")]
    Cancelled(String),

    /// Building the shared client failed
    #[error("Unable to start storage client: {source}")]
    Connection {
        #[source]
        source: BoxError,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Wrap the cause of a failed client construction
    pub fn connection(source: impl Into<BoxError>) -> Self {
        Error::Connection {
            source: source.into(),
        }
    }

    /// Classify this error
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Error::ListenerMissing(_)
            | Error::NotInitialized(_)
            | Error::AlreadyStarted(_)
            | Error::InvalidThreadCount(_)
            | Error::ShuttingDown(_)
            | Error::MissingCredentials
            | Error::Config(_)
            | Error::InvalidPath(_)
            | Error::AliasNotFound(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::InvalidUrl(_) => ErrorCategory::Configuration,
            Error::Connection { .. } => ErrorCategory::Connection,
            _ => ErrorCategory::Transfer,
        }
    }

    /// Get the appropriate exit code for this error
    pub const fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidPath(_) | Error::Config(_) | Error::MissingCredentials => 2,
            Error::Network(_) | Error::Connection { .. } | Error::NotConnected => 3,
            Error::Auth(_) => 4,
            Error::NotFound(_) | Error::AliasNotFound(_) => 5,
            Error::PreconditionFailed(_) => 6,
            Error::Cancelled(_) => 130,
            _ => 1,
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(io_err) => io_err,
            Error::NotFound(_) => std::io::Error::new(std::io::ErrorKind::NotFound, err),
            other => std::io::Error::other(other),
        }
    }
}
