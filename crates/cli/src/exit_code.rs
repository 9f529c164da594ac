//! Exit codes for the blobq CLI
//!
//! Scripts rely on these values; changing one is a breaking change.

use blobq_core::Error;

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Operation completed successfully
    Success = 0,

    /// General/unspecified error
    GeneralError = 1,

    /// User input error: invalid arguments, malformed path, etc.
    UsageError = 2,

    /// Retryable network error: timeout, connection reset, 503, etc.
    NetworkError = 3,

    /// Authentication or permission failure
    AuthError = 4,

    /// Resource not found: bucket or blob does not exist
    NotFound = 5,

    /// Conflict or precondition failure
    Conflict = 6,

    /// Operation was interrupted or cancelled
    Interrupted = 130,
}

impl ExitCode {
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Returns None if the value doesn't correspond to a known exit code
    pub const fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::GeneralError),
            2 => Some(Self::UsageError),
            3 => Some(Self::NetworkError),
            4 => Some(Self::AuthError),
            5 => Some(Self::NotFound),
            6 => Some(Self::Conflict),
            130 => Some(Self::Interrupted),
            _ => None,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Success => "Operation completed successfully",
            Self::GeneralError => "General error",
            Self::UsageError => "Invalid arguments or path format",
            Self::NetworkError => "Network error (retryable)",
            Self::AuthError => "Authentication or permission failure",
            Self::NotFound => "Resource not found",
            Self::Conflict => "Conflict or precondition failure",
            Self::Interrupted => "Operation interrupted",
        }
    }

    /// Exit code for a listener failure
    ///
    /// Looks through `anyhow` context and through `io::Error`s raised by
    /// blob streams, which carry the store error as their payload.
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        error
            .chain()
            .find_map(|cause| {
                cause.downcast_ref::<Error>().or_else(|| {
                    cause
                        .downcast_ref::<std::io::Error>()
                        .and_then(std::io::Error::get_ref)
                        .and_then(|inner| inner.downcast_ref::<Error>())
                })
            })
            .map_or(Self::GeneralError, Self::from)
    }
}

impl From<&Error> for ExitCode {
    fn from(error: &Error) -> Self {
        Self::from_i32(error.exit_code()).unwrap_or(Self::GeneralError)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.as_i32()
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_i32())
    }
}
