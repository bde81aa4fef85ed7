//! Drive a phased library operation to completion.
//!
//! [`Driver::run`] pairs a start phase and a continue phase with a
//! [`Waiter`]: it calls the start phase, and as long as the library reports
//! `Pending` it suspends on the reported interest and resumes with the
//! observed readiness. The start phase always runs; cancellation is checked
//! after every wait, before the library is resumed. A cancelled operation is
//! abandoned where it stands: the library is not resumed and the handle is
//! left open for the caller to close or reuse.
//!
//! Callers that must not begin work on a cancelled context check
//! [`cancel_requested`] themselves; cleanup phases rely on the start phase
//! being issued regardless.

use crate::client::{Interest, Pollable, Step};
use crate::wait::{NO_TIMEOUT, Waiter, cancel_requested};
use asupersync::{Cx, Outcome};
use coio_core::Error;
use std::time::Duration;

/// The Waiter and timeout policy every phased operation of a connection
/// runs under.
#[derive(Debug)]
pub struct Driver<'a, W> {
    waiter: &'a W,
    io_timeout: Option<Duration>,
}

impl<'a, W: Waiter> Driver<'a, W> {
    /// `io_timeout` applies when the library does not ask for a timeout of
    /// its own; `None` means [`NO_TIMEOUT`].
    pub fn new(waiter: &'a W, io_timeout: Option<Duration>) -> Self {
        Self { waiter, io_timeout }
    }

    /// Run `start` and then `resume` until the operation finishes.
    ///
    /// `op` names the operation in trace events.
    pub async fn run<P, T, S, R>(
        &self,
        cx: &Cx,
        op: &'static str,
        target: &mut P,
        start: S,
        mut resume: R,
    ) -> Outcome<T, Error>
    where
        P: Pollable + ?Sized,
        S: FnOnce(&mut P) -> Step<T>,
        R: FnMut(&mut P, Interest) -> Step<T>,
    {
        let mut step = start(target);
        let mut rounds: u32 = 0;
        loop {
            let wait = match step {
                Step::Done(value) => {
                    tracing::trace!(op, rounds, "completed");
                    return Outcome::Ok(value);
                }
                Step::Pending(wait) => wait,
            };

            let timeout = wait.timeout.or(self.io_timeout).unwrap_or(NO_TIMEOUT);
            tracing::trace!(op, interest = ?wait.interest, "suspending");
            let ready = match self
                .waiter
                .wait_ready(cx, target.socket(), wait.interest, timeout)
                .await
            {
                Outcome::Ok(ready) => ready,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(reason) => {
                    tracing::trace!(op, "cancelled while suspended");
                    return Outcome::Cancelled(reason);
                }
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };

            if let Some(reason) = cancel_requested(cx) {
                tracing::trace!(op, "cancelled before resume");
                return Outcome::Cancelled(reason);
            }

            tracing::trace!(op, ready = ?ready, "resuming");
            step = resume(target, ready);
            rounds = rounds.saturating_add(1);
        }
    }
}
