//! Connection lifecycle: connect, reset, close and finalization.
//!
//! A [`Connection`] owns its transport handle exclusively through a single
//! `Option` slot. [`Connection::close`] and `Drop` both take the handle out
//! of the slot, so the release happens exactly once whichever runs first.

use crate::bind::{BindLedger, zeroed};
use crate::client::{ClientHandle, ClientLibrary, ConnectParams, StatementHandle, error_codes};
use crate::config::ConnectOptions;
use crate::driver::Driver;
use crate::wait::{PollWaiter, Waiter, cancel_requested};
use asupersync::{Cx, Outcome};
use coio_core::{
    AllocationError, ConnectionError, ConnectionErrorKind, Error, NullMode, QueryError, RowShape,
};
use std::fmt;

/// Server error numbers reported for bad credentials.
const ER_DBACCESS_DENIED_ERROR: u32 = 1044;
const ER_ACCESS_DENIED_ERROR: u32 = 1045;

/// A connection to a MySQL server, driven through a phased client library.
///
/// Operations on one connection take `&mut self` and must not overlap; the
/// borrow checker enforces that within a task, and callers sharing a
/// connection across tasks serialize access themselves.
pub struct Connection<H: ClientHandle, W = PollWaiter> {
    /// `None` once released
    handle: Option<H>,
    waiter: W,
    options: ConnectOptions,
    ledger: BindLedger,
    thread_id: u64,
}

/// Borrowed view of an open connection used by the executors.
pub(crate) struct Session<'a, H, W> {
    pub(crate) handle: &'a mut H,
    pub(crate) driver: Driver<'a, W>,
    pub(crate) ledger: &'a BindLedger,
    pub(crate) row_shape: RowShape,
    pub(crate) null_mode: NullMode,
}

impl<H: ClientHandle, W: Waiter + Default> Connection<H, W> {
    /// Connect with a default-constructed waiter.
    pub async fn connect<L>(cx: &Cx, library: &L, options: ConnectOptions) -> Outcome<Self, Error>
    where
        L: ClientLibrary<Handle = H>,
    {
        Self::connect_with(cx, library, options, W::default()).await
    }
}

impl<H: ClientHandle, W: Waiter> Connection<H, W> {
    /// Establish a connection.
    ///
    /// Multi-statement and multi-result support are always requested. On
    /// failure or cancellation the half-initialized handle is released
    /// before returning, so a handle is never leaked and never paired with
    /// an error.
    pub async fn connect_with<L>(
        cx: &Cx,
        library: &L,
        options: ConnectOptions,
        waiter: W,
    ) -> Outcome<Self, Error>
    where
        L: ClientLibrary<Handle = H>,
    {
        if let Some(reason) = cancel_requested(cx) {
            return Outcome::Cancelled(reason);
        }
        let Some(mut handle) = library.init() else {
            return Outcome::Err(Error::Allocation(AllocationError {
                what: "connection handle",
                requested: None,
                source: None,
            }));
        };

        let outcome = {
            let params = ConnectParams {
                target: options.target(),
                user: &options.user,
                password: options.password.as_deref(),
                database: options.database.as_deref(),
                flags: options.client_flags(),
            };
            Driver::new(&waiter, options.io_timeout)
                .run(
                    cx,
                    "connect",
                    &mut handle,
                    |h| h.connect_start(&params),
                    |h, ready| h.connect_cont(ready),
                )
                .await
        };

        match outcome {
            Outcome::Ok(true) => {
                let thread_id = handle.thread_id();
                tracing::debug!(thread_id, endpoint = ?options.endpoint, "connected");
                Outcome::Ok(Self {
                    handle: Some(handle),
                    waiter,
                    options,
                    ledger: BindLedger::new(),
                    thread_id,
                })
            }
            Outcome::Ok(false) => {
                let err = connect_error(handle.errno(), handle.error());
                tracing::debug!(error = %err, "connect failed");
                // The handshake never finished, so there is no session to say
                // goodbye to.
                drop(handle);
                Outcome::Err(err)
            }
            Outcome::Err(e) => {
                tracing::debug!(error = %e, "connect failed");
                drop(handle);
                Outcome::Err(e)
            }
            Outcome::Cancelled(reason) => {
                tracing::debug!("connect cancelled, releasing handle");
                drop(handle);
                Outcome::Cancelled(reason)
            }
            Outcome::Panicked(p) => {
                drop(handle);
                Outcome::Panicked(p)
            }
        }
    }

    /// Re-authenticate over the existing transport and switch to `database`.
    ///
    /// Returns `false` when the server rejects the change; the failure is
    /// not raised. Any statement outstanding on this connection is
    /// invalidated, which the `&mut self` receiver makes a precondition.
    pub async fn reset(
        &mut self,
        cx: &Cx,
        user: &str,
        password: Option<&str>,
        database: Option<&str>,
    ) -> Outcome<bool, Error> {
        let session = match self.session("reset") {
            Ok(s) => s,
            Err(e) => return Outcome::Err(e),
        };
        if let Some(reason) = cancel_requested(cx) {
            return Outcome::Cancelled(reason);
        }
        let outcome = session
            .driver
            .run(
                cx,
                "change_user",
                &mut *session.handle,
                |h| h.change_user_start(user, password, database),
                |h, ready| h.change_user_cont(ready),
            )
            .await;

        match outcome {
            Outcome::Ok(true) => {
                tracing::debug!(thread_id = self.thread_id, user, "connection reset");
                Outcome::Ok(true)
            }
            Outcome::Ok(false) => {
                if let Some(handle) = &self.handle {
                    tracing::debug!(
                        errno = handle.errno(),
                        error = %handle.error(),
                        "connection reset failed"
                    );
                }
                Outcome::Ok(false)
            }
            Outcome::Err(e) => {
                tracing::debug!(error = %e, "connection reset failed");
                Outcome::Ok(false)
            }
            Outcome::Cancelled(reason) => Outcome::Cancelled(reason),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Release the connection. Returns `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                tracing::debug!(thread_id = self.thread_id, "closing connection");
                handle.close();
                true
            }
            None => false,
        }
    }

    /// Check if the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    /// Server thread id of this connection.
    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Bind buffers currently allocated by statements on this connection.
    ///
    /// Zero whenever no `execute_prepared` call is in progress.
    pub fn outstanding_binds(&self) -> usize {
        self.ledger.outstanding()
    }

    /// Escape `s` for use inside a quoted SQL string literal.
    pub fn quote(&self, s: &[u8]) -> Result<Vec<u8>, Error> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| Error::usage("quote on a closed connection"))?;
        let capacity = s.len().saturating_mul(2).saturating_add(1);
        let mut out = zeroed("quote buffer", capacity)?;
        let written = handle.escape(&mut out, s);
        out.truncate(written);
        Ok(out)
    }

    /// [`quote`](Self::quote) for text.
    pub fn quote_str(&self, s: &str) -> Result<String, Error> {
        let bytes = self.quote(s.as_bytes())?;
        String::from_utf8(bytes)
            .map_err(|_| Error::protocol("escaped text is not valid UTF-8"))
    }

    pub(crate) fn session(&mut self, op: &str) -> Result<Session<'_, H, W>, Error> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| Error::usage(format!("{op} on a closed connection")))?;
        Ok(Session {
            handle,
            driver: Driver::new(&self.waiter, self.options.io_timeout),
            ledger: &self.ledger,
            row_shape: self.options.row_shape,
            null_mode: self.options.null_mode,
        })
    }
}

impl<H: ClientHandle, W> Drop for Connection<H, W> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!(thread_id = self.thread_id, "finalizing connection");
            handle.close();
        }
    }
}

impl<H: ClientHandle, W> fmt::Display for Connection<H, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.handle.is_some() {
            write!(f, "mysql connection #{}", self.thread_id)
        } else {
            write!(f, "mysql connection (closed)")
        }
    }
}

impl<H: ClientHandle, W> fmt::Debug for Connection<H, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("thread_id", &self.thread_id)
            .field("closed", &self.handle.is_none())
            .field("endpoint", &self.options.endpoint)
            .field("row_shape", &self.options.row_shape)
            .field("null_mode", &self.options.null_mode)
            .finish_non_exhaustive()
    }
}

fn connect_error(code: u32, message: String) -> Error {
    let kind = if error_codes::is_connection_lost(code) {
        ConnectionErrorKind::Lost
    } else if matches!(code, ER_ACCESS_DENIED_ERROR | ER_DBACCESS_DENIED_ERROR) {
        ConnectionErrorKind::Authentication
    } else {
        ConnectionErrorKind::Connect
    };
    Error::Connection(ConnectionError {
        kind,
        code: Some(code),
        message,
        source: None,
    })
}

/// Classify a library error number: transport failures become a lost
/// connection, everything else is a server error.
fn classify(code: u32, message: String, sqlstate: Option<String>, sql: Option<&str>) -> Error {
    if error_codes::is_connection_lost(code) {
        Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Lost,
            code: Some(code),
            message,
            source: None,
        })
    } else {
        Error::Query(QueryError {
            code,
            sqlstate,
            message,
            sql: sql.map(str::to_string),
        })
    }
}

/// The error currently reported by a connection handle.
pub(crate) fn handle_error<H: ClientHandle>(handle: &H, sql: Option<&str>) -> Error {
    classify(handle.errno(), handle.error(), handle.sqlstate(), sql)
}

/// The error currently reported by a statement handle.
pub(crate) fn statement_error<S: StatementHandle>(stmt: &S, sql: Option<&str>) -> Error {
    classify(stmt.errno(), stmt.error(), stmt.sqlstate(), sql)
}
