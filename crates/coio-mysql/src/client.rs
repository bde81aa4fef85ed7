//! The phased client-library contract the bridge drives.
//!
//! A non-blocking MySQL client library (the MariaDB Connector/C
//! `*_start`/`*_cont` family is the reference shape) exposes every
//! potentially blocking call as two phases: a *start* call that begins the
//! operation and a *continue* call that resumes it once the socket is ready.
//! Each phase either finishes with a value or reports which readiness it is
//! waiting for. [`Step`] models that report.
//!
//! The bridge never touches the wire itself. It only sequences these phases,
//! suspends the calling task between them, and owns the buffers and handles
//! around them. Any library fulfilling the traits below can be plugged in.

use crate::bind::ResultSlot;
use crate::types::FieldType;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::path::Path;
use std::time::Duration;

/// OS-level socket descriptor the library performs I/O on.
pub type RawSocket = std::os::fd::RawFd;

/// Readiness mask, in the bit layout of the library's wait status.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interest(u8);

impl Interest {
    pub const READABLE: Interest = Interest(1);
    pub const WRITABLE: Interest = Interest(2);
    pub const EXCEPTIONAL: Interest = Interest(4);
    pub const TIMEOUT: Interest = Interest(8);

    pub const fn empty() -> Self {
        Interest(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Interest(bits & 0x0f)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Interest) -> bool {
        self.0 & other.0 != 0
    }

    /// The socket readiness part of the mask, without the timeout bit.
    pub const fn io(self) -> Interest {
        Interest(self.0 & 0x07)
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Interest {
    type Output = Interest;

    fn bitand(self, rhs: Interest) -> Interest {
        Interest(self.0 & rhs.0)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(Interest::READABLE) {
            parts.push("READABLE");
        }
        if self.contains(Interest::WRITABLE) {
            parts.push("WRITABLE");
        }
        if self.contains(Interest::EXCEPTIONAL) {
            parts.push("EXCEPTIONAL");
        }
        if self.contains(Interest::TIMEOUT) {
            parts.push("TIMEOUT");
        }
        if parts.is_empty() {
            write!(f, "Interest(empty)")
        } else {
            write!(f, "Interest({})", parts.join(" | "))
        }
    }
}

/// What a pending phase is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wait {
    pub interest: Interest,
    /// Timeout the library asked for alongside [`Interest::TIMEOUT`].
    pub timeout: Option<Duration>,
}

impl Wait {
    pub const fn on(interest: Interest) -> Self {
        Self {
            interest,
            timeout: None,
        }
    }
}

/// Status reported by one phase of a library operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// The operation needs the socket to become ready before it can go on.
    Pending(Wait),
    /// The operation finished.
    Done(T),
}

impl<T> Step<T> {
    pub const fn pending(interest: Interest) -> Self {
        Step::Pending(Wait::on(interest))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Step::Pending(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Step<U> {
        match self {
            Step::Pending(wait) => Step::Pending(wait),
            Step::Done(v) => Step::Done(f(v)),
        }
    }
}

/// Anything the bridge can wait on.
pub trait Pollable {
    fn socket(&self) -> RawSocket;
}

/// Where a connection goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectTarget<'a> {
    /// TCP endpoint; port `0` means the library's default port.
    Tcp { host: &'a str, port: u16 },
    /// Local socket path.
    Unix(&'a Path),
}

/// Everything the library needs for a handshake.
#[derive(Debug, Clone, Copy)]
pub struct ConnectParams<'a> {
    pub target: ConnectTarget<'a>,
    pub user: &'a str,
    pub password: Option<&'a str>,
    pub database: Option<&'a str>,
    /// Client capability flags, see [`capabilities`].
    pub flags: u32,
}

/// Column metadata as reported by the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMetadata {
    pub name: String,
    pub field_type: FieldType,
    /// Column flags, see [`crate::types::column_flags`].
    pub flags: u16,
    /// Maximum byte width of a value in this column.
    pub max_length: usize,
}

impl FieldMetadata {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            flags: 0,
            max_length: 0,
        }
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Check if the column carries the unsigned flag.
    pub const fn is_unsigned(&self) -> bool {
        self.flags & crate::types::column_flags::UNSIGNED != 0
    }
}

/// One fetched text-protocol row: a payload per column, `None` for NULL.
pub type RawRow = Vec<Option<Vec<u8>>>;

/// One statement parameter as handed to the library.
///
/// The library copies the bytes while binding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamBind<'a> {
    pub buffer_type: FieldType,
    pub buffer: &'a [u8],
    pub is_null: bool,
}

impl ParamBind<'_> {
    pub const fn null() -> Self {
        Self {
            buffer_type: FieldType::Null,
            buffer: &[],
            is_null: true,
        }
    }
}

/// Result of a statement fetch phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// A row was written into the bound result slots.
    Row,
    /// No more rows.
    NoData,
    /// A row was written, but at least one value did not fit its slot.
    Truncated,
    /// The fetch failed; see the statement's errno.
    Error,
}

/// Result of an advance-to-next-result phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextResult {
    /// Another result follows.
    More,
    /// No further results.
    Done,
    /// Advancing failed; see the connection's errno.
    Error,
}

/// Entry point of a client library: allocates transport handles.
pub trait ClientLibrary {
    type Handle: ClientHandle;

    /// Allocate a transport handle set up for the non-blocking API.
    /// `None` when the library cannot allocate one.
    fn init(&self) -> Option<Self::Handle>;
}

/// A transport handle. Dropping it releases library memory without a
/// goodbye to the server; [`ClientHandle::close`] does both.
pub trait ClientHandle: Pollable {
    type Result: ResultHandle;
    type Statement: StatementHandle;

    fn connect_start(&mut self, params: &ConnectParams<'_>) -> Step<bool>;
    fn connect_cont(&mut self, ready: Interest) -> Step<bool>;

    fn change_user_start(
        &mut self,
        user: &str,
        password: Option<&str>,
        database: Option<&str>,
    ) -> Step<bool>;
    fn change_user_cont(&mut self, ready: Interest) -> Step<bool>;

    /// Send a (possibly multi-statement) query.
    fn query_start(&mut self, sql: &str) -> Step<bool>;
    fn query_cont(&mut self, ready: Interest) -> Step<bool>;

    /// Start streaming the current result. `None` when the current
    /// statement produced no result set, or on error (check [`errno`]).
    ///
    /// [`errno`]: ClientHandle::errno
    fn use_result(&mut self) -> Option<Self::Result>;

    /// Columns in the current result; `0` for statements without one.
    fn field_count(&self) -> usize;

    /// Rows affected by the current statement.
    fn affected_rows(&self) -> u64;

    fn next_result_start(&mut self) -> Step<NextResult>;
    fn next_result_cont(&mut self, ready: Interest) -> Step<NextResult>;

    /// Allocate a statement handle. `None` when out of memory.
    fn stmt_init(&mut self) -> Option<Self::Statement>;

    /// Server thread id for this connection.
    fn thread_id(&self) -> u64;

    /// Escape `from` for use inside a quoted SQL string literal, writing into
    /// `to` which has room for at least `2 * from.len() + 1` bytes. Returns
    /// the number of bytes written.
    fn escape(&self, to: &mut [u8], from: &[u8]) -> usize;

    fn errno(&self) -> u32;
    fn error(&self) -> String;
    fn sqlstate(&self) -> Option<String> {
        None
    }

    /// Say goodbye to the server and release the handle.
    fn close(self);
}

/// A streamed (unbuffered) result set.
pub trait ResultHandle: Pollable {
    fn fields(&self) -> &[FieldMetadata];

    /// `Done(None)` when the result is exhausted or the fetch failed.
    fn fetch_row_start(&mut self) -> Step<Option<RawRow>>;
    fn fetch_row_cont(&mut self, ready: Interest) -> Step<Option<RawRow>>;
}

/// A prepared statement handle. Dropping it releases library memory; the
/// server-side statement is only deallocated by the close phases.
pub trait StatementHandle: Pollable {
    fn prepare_start(&mut self, sql: &str) -> Step<bool>;
    fn prepare_cont(&mut self, ready: Interest) -> Step<bool>;

    fn param_count(&self) -> usize;

    /// Bind one entry per placeholder. Returns `false` on failure.
    fn bind_params(&mut self, binds: &[ParamBind<'_>]) -> bool;

    fn execute_start(&mut self) -> Step<bool>;
    fn execute_cont(&mut self, ready: Interest) -> Step<bool>;

    /// Metadata of the result, or `None` for statements without one.
    fn result_metadata(&mut self) -> Option<Vec<FieldMetadata>>;

    /// Hand the result slots to the statement; fetches write into them.
    /// Returns `false` on failure, in which case the slots stay bound and
    /// can be reclaimed with [`take_result_binds`].
    ///
    /// [`take_result_binds`]: StatementHandle::take_result_binds
    fn bind_result(&mut self, slots: Vec<ResultSlot>) -> bool;
    fn result_slots(&self) -> &[ResultSlot];
    /// Reclaim the bound result slots.
    fn take_result_binds(&mut self) -> Vec<ResultSlot>;

    fn fetch_start(&mut self) -> Step<FetchStatus>;
    fn fetch_cont(&mut self, ready: Interest) -> Step<FetchStatus>;

    /// Release the result metadata and any buffered rows.
    fn free_result(&mut self) -> bool;

    fn close_start(&mut self) -> Step<bool>;
    fn close_cont(&mut self, ready: Interest) -> Step<bool>;

    fn affected_rows(&self) -> u64;

    fn errno(&self) -> u32;
    fn error(&self) -> String;
    fn sqlstate(&self) -> Option<String> {
        None
    }
}

/// Client capability flags.
pub mod capabilities {
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
}

/// Client library error numbers the bridge classifies.
pub mod error_codes {
    /// Can't connect to local server through socket
    pub const CR_CONNECTION_ERROR: u32 = 2002;
    /// Can't connect to server on host
    pub const CR_CONN_HOST_ERROR: u32 = 2003;
    /// Unknown server host
    pub const CR_UNKNOWN_HOST: u32 = 2005;
    /// Server has gone away
    pub const CR_SERVER_GONE_ERROR: u32 = 2006;
    /// Lost connection to server during query
    pub const CR_SERVER_LOST: u32 = 2013;
    /// Commands out of sync
    pub const CR_COMMANDS_OUT_OF_SYNC: u32 = 2014;
    /// Lost connection to server, with system error detail
    pub const CR_SERVER_LOST_EXTENDED: u32 = 2055;

    /// Does this error number mean the transport is gone?
    pub const fn is_connection_lost(code: u32) -> bool {
        matches!(
            code,
            CR_CONNECTION_ERROR
                | CR_CONN_HOST_ERROR
                | CR_UNKNOWN_HOST
                | CR_SERVER_GONE_ERROR
                | CR_SERVER_LOST
                | CR_SERVER_LOST_EXTENDED
        )
    }
}
