//! Error types for coio driver operations.
//!
//! The taxonomy mirrors what callers need to decide next:
//!
//! - [`Error::Connection`] with [`ConnectionErrorKind::Lost`] means the
//!   transport is gone and the caller should reconnect.
//! - [`Error::Query`] is a statement-level failure reported by the server;
//!   the connection is still usable and the statement may be retried after
//!   it has been corrected.
//! - [`Error::Allocation`] and [`Error::Usage`] are immediate aborts of the
//!   current call and travel on the host's native error channel.
//!
//! Cancellation is not an error: it is carried by `Outcome::Cancelled`.

use std::collections::TryReserveError;
use std::fmt;

/// The primary error type for all coio operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, handshake, lost transport)
    Connection(ConnectionError),
    /// Statement-level errors reported by the server
    Query(QueryError),
    /// The client library misbehaved (unexpected state or shape)
    Protocol(ProtocolError),
    /// A bind buffer or handle could not be allocated
    Allocation(AllocationError),
    /// The API was used incorrectly (closed connection, bad handle)
    Usage(UsageError),
    /// Configuration errors
    Config(ConfigError),
    /// I/O errors while waiting for socket readiness
    Io(std::io::Error),
    /// A task panicked while running the operation
    Internal(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    /// Library error number, when the library reported one
    pub code: Option<u32>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish the connection
    Connect,
    /// Authentication (or re-authentication) failed
    Authentication,
    /// Connection lost or closed by the server during an operation
    Lost,
}

#[derive(Debug)]
pub struct QueryError {
    /// Server (or client library) error number
    pub code: u32,
    pub sqlstate: Option<String>,
    pub message: String,
    pub sql: Option<String>,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
}

#[derive(Debug)]
pub struct AllocationError {
    /// What was being allocated
    pub what: &'static str,
    /// Number of bytes requested, when known
    pub requested: Option<usize>,
    pub source: Option<TryReserveError>,
}

#[derive(Debug)]
pub struct UsageError {
    pub message: String,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Result type alias for coio operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a [`Error::Usage`] from a message.
    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage(UsageError {
            message: message.into(),
        })
    }

    /// Build a [`Error::Config`] from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    /// Build a [`Error::Protocol`] from a message.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError {
            message: message.into(),
        })
    }

    /// Build a [`Error::Allocation`] for a failed reservation.
    pub fn allocation(what: &'static str, requested: usize, source: TryReserveError) -> Self {
        Error::Allocation(AllocationError {
            what,
            requested: Some(requested),
            source: Some(source),
        })
    }

    /// Is the transport gone, so that the caller should reconnect?
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Error::Connection(c) => c.kind == ConnectionErrorKind::Lost,
            Error::Io(_) => true,
            _ => false,
        }
    }

    /// Is this a failure the server reported for an otherwise healthy
    /// connection?
    pub fn is_server_error(&self) -> bool {
        match self {
            Error::Query(_) => true,
            Error::Connection(c) => matches!(
                c.kind,
                ConnectionErrorKind::Connect | ConnectionErrorKind::Authentication
            ),
            _ => false,
        }
    }

    /// Does this error belong on the host's native error channel rather
    /// than in a `(status, message)` pair?
    pub fn is_fatal_for_call(&self) -> bool {
        matches!(
            self,
            Error::Allocation(_)
                | Error::Usage(_)
                | Error::Config(_)
                | Error::Protocol(_)
                | Error::Internal(_)
        )
    }

    /// Library error number, if any.
    pub fn code(&self) -> Option<u32> {
        match self {
            Error::Connection(c) => c.code,
            Error::Query(q) => Some(q.code),
            _ => None,
        }
    }

    /// Get SQLSTATE if available (e.g., "42000" for a syntax error)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// The message without the category prefix added by `Display`.
    pub fn message(&self) -> String {
        match self {
            Error::Connection(e) => e.message.clone(),
            Error::Query(e) => e.message.clone(),
            Error::Protocol(e) => e.message.clone(),
            Error::Allocation(e) => e.to_string(),
            Error::Usage(e) => e.message.clone(),
            Error::Config(e) => e.message.clone(),
            Error::Io(e) => e.to_string(),
            Error::Internal(msg) => msg.clone(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e),
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Allocation(e) => write!(f, "Allocation error: {}", e),
            Error::Usage(e) => write!(f, "Usage error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Allocation(e) => e
                .source
                .as_ref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} ({}, SQLSTATE {})", self.message, self.code, sqlstate)
        } else {
            write!(f, "{} ({})", self.message, self.code)
        }
    }
}

impl fmt::Display for AllocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.requested {
            Some(bytes) => write!(f, "can not allocate {} ({} bytes)", self.what, bytes),
            None => write!(f, "can not allocate {}", self.what),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<AllocationError> for Error {
    fn from(err: AllocationError) -> Self {
        Error::Allocation(err)
    }
}

impl From<UsageError> for Error {
    fn from(err: UsageError) -> Self {
        Error::Usage(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}
