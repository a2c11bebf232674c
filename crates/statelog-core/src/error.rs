//! Error types for statelog.

use std::fmt;

/// The main error type for statelog operations.
///
/// The public `HistoryStore` surface is fail-soft and converts these into
/// `false` / empty results; the `try_*` methods hand them out unchanged.
#[derive(Debug)]
pub enum Error {
    /// A lock was poisoned (internal error)
    LockPoisoned,

    /// I/O error
    Io(std::io::Error),

    /// Serialization/deserialization error
    Serialization(String),

    /// Backend data is unreadable or corrupt
    Storage(String),

    /// The backend could not be reached, opened, or prepared
    Connection(String),

    /// A batch submission to the backend failed
    Write(String),

    /// A range query against the backend failed
    Query(String),

    /// Operation attempted while the store is not connected
    NotConnected,

    /// A record was rejected before buffering
    InvalidRecord(String),

    /// History query options are inconsistent
    InvalidOptions(String),

    /// Invalid configuration value
    Config(String),
}

impl Error {
    /// Returns true for failures caused by the backend being unavailable,
    /// as opposed to bad input.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Connection(_) | Error::Write(_) | Error::Query(_) | Error::NotConnected
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LockPoisoned => write!(f, "Lock poisoned"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Connection(msg) => write!(f, "Connection error: {}", msg),
            Error::Write(msg) => write!(f, "Write error: {}", msg),
            Error::Query(msg) => write!(f, "Query error: {}", msg),
            Error::NotConnected => write!(f, "Not connected"),
            Error::InvalidRecord(msg) => write!(f, "Invalid record: {}", msg),
            Error::InvalidOptions(msg) => write!(f, "Invalid options: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// A specialized `Result` type for statelog operations.
pub type Result<T> = std::result::Result<T, Error>;
