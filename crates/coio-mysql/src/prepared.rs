//! Prepared statement execution.
//!
//! Each call prepares, binds, executes and fetches one server-side
//! statement, then tears it down; nothing is cached between calls. The
//! statement and its bind buffers live in a [`StatementRun`] whose cleanup
//! runs on every exit path: explicitly (with a driven close) when the call
//! finishes, and from `Drop` when the call's future is dropped mid-flight.

use crate::bind::{BindLedger, ParamScratch, ResultSlot};
use crate::client::{ClientHandle, FetchStatus, StatementHandle};
use crate::connection::{Connection, statement_error};
use crate::driver::Driver;
use crate::types::RowBuilder;
use crate::wait::{Waiter, cancel_requested};
use asupersync::{Cx, Outcome};
use coio_core::{AllocationError, Error, NullMode, Param, ResultSet, RowShape};

impl<H: ClientHandle, W: Waiter> Connection<H, W> {
    /// Prepare and execute `sql` with `params` bound to its placeholders.
    ///
    /// Placeholders beyond the supplied parameters are bound as NULL, and
    /// parameters beyond the placeholders are ignored. A statement without
    /// result metadata returns an empty result carrying its affected row
    /// count.
    ///
    /// The statement handle and every bind buffer are released before this
    /// returns, whatever the outcome.
    pub async fn execute_prepared(
        &mut self,
        cx: &Cx,
        sql: &str,
        params: &[Param],
    ) -> Outcome<ResultSet, Error> {
        let session = match self.session("execute_prepared") {
            Ok(s) => s,
            Err(e) => return Outcome::Err(e),
        };
        if let Some(reason) = cancel_requested(cx) {
            return Outcome::Cancelled(reason);
        }
        let Some(stmt) = session.handle.stmt_init() else {
            return Outcome::Err(Error::Allocation(AllocationError {
                what: "statement handle",
                requested: None,
                source: None,
            }));
        };

        let mut run = StatementRun::new(stmt, session.ledger);
        let outcome = run
            .execute(
                cx,
                &session.driver,
                sql,
                params,
                session.row_shape,
                session.null_mode,
            )
            .await;
        run.finish(cx, &session.driver).await;
        outcome
    }
}

/// One statement and the buffers bound to it.
struct StatementRun<'a, S: StatementHandle> {
    stmt: S,
    ledger: &'a BindLedger,
    scratch: Option<ParamScratch>,
    /// The statement holds a result that `free_result` must release
    executed: bool,
    closed: bool,
}

impl<'a, S: StatementHandle> StatementRun<'a, S> {
    fn new(stmt: S, ledger: &'a BindLedger) -> Self {
        Self {
            stmt,
            ledger,
            scratch: None,
            executed: false,
            closed: false,
        }
    }

    async fn execute<W: Waiter>(
        &mut self,
        cx: &Cx,
        driver: &Driver<'_, W>,
        sql: &str,
        params: &[Param],
        row_shape: RowShape,
        null_mode: NullMode,
    ) -> Outcome<ResultSet, Error> {
        let prepared = match driver
            .run(
                cx,
                "stmt_prepare",
                &mut self.stmt,
                |s| s.prepare_start(sql),
                |s, ready| s.prepare_cont(ready),
            )
            .await
        {
            Outcome::Ok(ok) => ok,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        if !prepared {
            return Outcome::Err(statement_error(&self.stmt, Some(sql)));
        }

        let count = self.stmt.param_count();
        if count > 0 {
            let scratch = match ParamScratch::allocate(self.ledger, count) {
                Ok(s) => self.scratch.insert(s),
                Err(e) => return Outcome::Err(e),
            };
            let binds = scratch.bind(params);
            if !self.stmt.bind_params(&binds) {
                return Outcome::Err(statement_error(&self.stmt, Some(sql)));
            }
        }

        let executed = match driver
            .run(
                cx,
                "stmt_execute",
                &mut self.stmt,
                |s| s.execute_start(),
                |s, ready| s.execute_cont(ready),
            )
            .await
        {
            Outcome::Ok(ok) => ok,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        if !executed {
            return Outcome::Err(statement_error(&self.stmt, Some(sql)));
        }
        self.executed = true;

        let Some(fields) = self.stmt.result_metadata() else {
            if self.stmt.errno() != 0 {
                return Outcome::Err(statement_error(&self.stmt, Some(sql)));
            }
            return Outcome::Ok(ResultSet::empty(self.stmt.affected_rows()));
        };

        let mut slots = Vec::new();
        if let Err(e) = slots.try_reserve_exact(fields.len()) {
            return Outcome::Err(Error::allocation(
                "result binds",
                fields.len().saturating_mul(size_of::<ResultSlot>()),
                e,
            ));
        }
        for field in &fields {
            match ResultSlot::allocate(self.ledger, field.max_length) {
                Ok(slot) => slots.push(slot),
                Err(e) => return Outcome::Err(e),
            }
        }
        if !self.stmt.bind_result(slots) {
            return Outcome::Err(statement_error(&self.stmt, Some(sql)));
        }

        let builder = RowBuilder::new(fields, row_shape, null_mode);
        let mut rows = Vec::new();
        loop {
            let status = match driver
                .run(
                    cx,
                    "stmt_fetch",
                    &mut self.stmt,
                    |s| s.fetch_start(),
                    |s, ready| s.fetch_cont(ready),
                )
                .await
            {
                Outcome::Ok(status) => status,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => {
                    tracing::debug!(rows = rows.len(), "fetch cancelled, discarding rows");
                    return Outcome::Cancelled(r);
                }
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            match status {
                FetchStatus::Row => {}
                FetchStatus::Truncated => {
                    let columns: Vec<&str> = self
                        .stmt
                        .result_slots()
                        .iter()
                        .zip(builder.fields())
                        .filter(|(slot, _)| slot.is_truncated())
                        .map(|(_, field)| field.name.as_str())
                        .collect();
                    tracing::warn!(?columns, "fetched value truncated to column width");
                }
                FetchStatus::NoData => break,
                FetchStatus::Error => {
                    return Outcome::Err(statement_error(&self.stmt, Some(sql)));
                }
            }
            let slots = self.stmt.result_slots();
            rows.push(builder.build(slots.iter().map(ResultSlot::payload)));
        }

        let count = rows.len() as u64;
        Outcome::Ok(ResultSet::new(builder.columns(), rows, count))
    }

    /// Free parameter scratch, result slots and the statement's result.
    fn release_buffers(&mut self) {
        self.scratch = None;
        drop(self.stmt.take_result_binds());
        if self.executed {
            self.executed = false;
            if !self.stmt.free_result() {
                tracing::debug!(errno = self.stmt.errno(), "free_result failed");
            }
        }
    }

    /// Release every buffer, then close the statement on the server.
    ///
    /// Buffers go first so a failing close cannot keep them alive. The close
    /// is always issued, even on a cancelled context; it is driven further
    /// only while the context stays live.
    async fn finish<W: Waiter>(&mut self, cx: &Cx, driver: &Driver<'_, W>) {
        self.release_buffers();
        let outcome = driver
            .run(
                cx,
                "stmt_close",
                &mut self.stmt,
                |s| s.close_start(),
                |s, ready| s.close_cont(ready),
            )
            .await;
        match outcome {
            Outcome::Ok(true) => tracing::trace!("statement closed"),
            Outcome::Ok(false) => tracing::warn!(
                errno = self.stmt.errno(),
                error = %self.stmt.error(),
                "statement close failed"
            ),
            Outcome::Err(e) => tracing::warn!(error = %e, "statement close failed"),
            Outcome::Cancelled(_) => {
                tracing::debug!("statement close abandoned after cancellation");
            }
            Outcome::Panicked(_) => tracing::warn!("statement close panicked"),
        }
        self.closed = true;
    }
}

impl<S: StatementHandle> Drop for StatementRun<'_, S> {
    fn drop(&mut self) {
        if !self.closed {
            tracing::debug!("statement dropped before close, releasing buffers");
            self.release_buffers();
        }
    }
}
