//! Plain (possibly multi-statement) query execution.

use crate::client::{ClientHandle, NextResult, ResultHandle};
use crate::connection::{Connection, handle_error};
use crate::types::RowBuilder;
use crate::wait::{Waiter, cancel_requested};
use asupersync::{Cx, Outcome};
use coio_core::{Error, ResultSet};

impl<H: ClientHandle, W: Waiter> Connection<H, W> {
    /// Execute `sql`, which may hold several `;`-separated statements.
    ///
    /// Returns one [`ResultSet`] per statement that produced a result set,
    /// in statement order; statements without one (inserts, updates, DDL)
    /// contribute nothing. Rows are streamed from the server one at a time.
    ///
    /// If a later statement fails the whole call fails. If the call is
    /// cancelled, every row fetched so far is discarded.
    pub async fn execute(&mut self, cx: &Cx, sql: &str) -> Outcome<Vec<ResultSet>, Error> {
        let session = match self.session("execute") {
            Ok(s) => s,
            Err(e) => return Outcome::Err(e),
        };
        if let Some(reason) = cancel_requested(cx) {
            return Outcome::Cancelled(reason);
        }
        let handle = session.handle;
        let driver = session.driver;

        let sent = match driver
            .run(
                cx,
                "query",
                &mut *handle,
                |h| h.query_start(sql),
                |h, ready| h.query_cont(ready),
            )
            .await
        {
            Outcome::Ok(sent) => sent,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        if !sent {
            return Outcome::Err(handle_error(&*handle, Some(sql)));
        }

        let mut sets = Vec::new();
        loop {
            if let Some(mut result) = handle.use_result() {
                let builder =
                    RowBuilder::new(result.fields().to_vec(), session.row_shape, session.null_mode);
                let mut rows = Vec::new();
                loop {
                    let fetched = match driver
                        .run(
                            cx,
                            "fetch_row",
                            &mut result,
                            |r| r.fetch_row_start(),
                            |r, ready| r.fetch_row_cont(ready),
                        )
                        .await
                    {
                        Outcome::Ok(fetched) => fetched,
                        Outcome::Err(e) => return Outcome::Err(e),
                        Outcome::Cancelled(r) => {
                            tracing::debug!(
                                sets = sets.len(),
                                rows = rows.len(),
                                "query cancelled, discarding fetched rows"
                            );
                            return Outcome::Cancelled(r);
                        }
                        Outcome::Panicked(p) => return Outcome::Panicked(p),
                    };
                    match fetched {
                        Some(raw) => rows.push(builder.build(raw.iter().map(|c| c.as_deref()))),
                        None => break,
                    }
                }
                drop(result);

                // An exhausted fetch and a failed fetch look the same.
                if handle.errno() != 0 {
                    return Outcome::Err(handle_error(&*handle, Some(sql)));
                }
                let count = rows.len() as u64;
                sets.push(ResultSet::new(builder.columns(), rows, count));
            } else if handle.errno() != 0 {
                return Outcome::Err(handle_error(&*handle, Some(sql)));
            }

            let next = match driver
                .run(
                    cx,
                    "next_result",
                    &mut *handle,
                    |h| h.next_result_start(),
                    |h, ready| h.next_result_cont(ready),
                )
                .await
            {
                Outcome::Ok(next) => next,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => {
                    tracing::debug!(sets = sets.len(), "query cancelled, discarding results");
                    return Outcome::Cancelled(r);
                }
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            match next {
                NextResult::More => {}
                NextResult::Done => break,
                NextResult::Error => return Outcome::Err(handle_error(&*handle, Some(sql))),
            }
        }

        tracing::trace!(sets = sets.len(), "query complete");
        Outcome::Ok(sets)
    }
}
