//! Status codes at the host boundary.
//!
//! A host binding reports each call as a status code plus either the value
//! or a message. Lost connections, server errors and cancellation are
//! ordinary replies; allocation, usage, configuration and internal failures
//! stay on the host's native error channel as `Err`.

use asupersync::Outcome;
use coio_core::Error;
use std::fmt;

/// Message reported for a cancelled operation.
pub const CANCELLED_MESSAGE: &str = "operation was cancelled";

/// Call status as reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    /// The transport is gone; reconnect.
    ConnectionLost = -1,
    /// The server rejected the statement; the connection is still usable.
    ServerError = 1,
    Cancelled = -2,
}

impl Status {
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ok => "ok",
            Status::ConnectionLost => "connection lost",
            Status::ServerError => "server error",
            Status::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A call result in boundary form.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    Ok(T),
    Failed { status: Status, message: String },
}

impl<T> Reply<T> {
    pub fn status(&self) -> Status {
        match self {
            Reply::Ok(_) => Status::Ok,
            Reply::Failed { status, .. } => *status,
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Reply::Ok(v) => Some(v),
            Reply::Failed { .. } => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Reply::Ok(_) => None,
            Reply::Failed { message, .. } => Some(message),
        }
    }
}

/// Map an operation outcome to its boundary reply.
pub fn reply<T>(outcome: Outcome<T, Error>) -> Result<Reply<T>, Error> {
    match outcome {
        Outcome::Ok(v) => Ok(Reply::Ok(v)),
        Outcome::Err(e) if e.is_connection_lost() => Ok(Reply::Failed {
            status: Status::ConnectionLost,
            message: e.message(),
        }),
        Outcome::Err(e) if e.is_server_error() => Ok(Reply::Failed {
            status: Status::ServerError,
            message: e.message(),
        }),
        Outcome::Err(e) => Err(e),
        Outcome::Cancelled(_) => Ok(Reply::Failed {
            status: Status::Cancelled,
            message: CANCELLED_MESSAGE.to_string(),
        }),
        Outcome::Panicked(p) => Err(Error::Internal(format!("Panicked: {p:?}"))),
    }
}
