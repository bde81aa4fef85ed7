//! Socket readiness waiting.
//!
//! A [`Waiter`] suspends the calling task until a socket is ready for the
//! requested interest, the timeout elapses, or the task is cancelled. It is
//! the only place the bridge yields to the scheduler.

use crate::client::{Interest, RawSocket};
use asupersync::runtime::yield_now;
use asupersync::{CancelReason, Cx, Outcome};
use coio_core::Error;
use std::future::Future;
use std::io;
use std::time::{Duration, Instant};

/// Timeout used when neither the library nor the configuration sets one.
/// Large enough to never fire in practice.
pub const NO_TIMEOUT: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// The reason `cx` was cancelled, if cancellation has been requested.
///
/// A request made without attribution still counts; it reports as a user
/// cancellation.
pub fn cancel_requested(cx: &Cx) -> Option<CancelReason> {
    if !cx.is_cancel_requested() {
        return None;
    }
    Some(
        cx.cancel_reason()
            .unwrap_or_else(|| CancelReason::user("cancelled")),
    )
}

/// Suspends a task until its socket is ready.
pub trait Waiter {
    /// Wait until `socket` satisfies at least one interest in `interest`.
    ///
    /// Returns the satisfied interests, which may contain more than one bit.
    /// When `timeout` elapses first the result is [`Interest::TIMEOUT`].
    /// Cancellation of `cx` ends the wait with `Outcome::Cancelled`.
    fn wait_ready(
        &self,
        cx: &Cx,
        socket: RawSocket,
        interest: Interest,
        timeout: Duration,
    ) -> impl Future<Output = Outcome<Interest, Error>>;
}

/// Waits by probing the socket with a zero-timeout `poll(2)` and yielding to
/// the scheduler between probes.
///
/// The thread is never blocked: every unsuccessful probe hands control back
/// to the runtime, which runs other tasks before polling again. The socket
/// belongs to the client library, so it cannot be handed to the runtime's
/// reactor as an owned source; a host with a reactor-backed descriptor
/// wrapper can supply its own [`Waiter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PollWaiter;

impl Waiter for PollWaiter {
    fn wait_ready(
        &self,
        cx: &Cx,
        socket: RawSocket,
        interest: Interest,
        timeout: Duration,
    ) -> impl Future<Output = Outcome<Interest, Error>> {
        async move {
            let deadline = Instant::now().checked_add(timeout);
            loop {
                if let Some(reason) = cancel_requested(cx) {
                    return Outcome::Cancelled(reason);
                }
                match probe(socket, interest) {
                    Ok(ready) if !ready.is_empty() => return Outcome::Ok(ready),
                    Ok(_) => {}
                    Err(e) => return Outcome::Err(Error::Io(e)),
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    return Outcome::Ok(Interest::TIMEOUT);
                }
                yield_now().await;
            }
        }
    }
}

/// Non-blocking readiness probe.
///
/// Hang-up and error conditions count as ready for every requested
/// interest so the library gets to observe them on its next call.
#[allow(unsafe_code)]
fn probe(socket: RawSocket, interest: Interest) -> io::Result<Interest> {
    let mut events: libc::c_short = 0;
    if interest.contains(Interest::READABLE) {
        events |= libc::POLLIN;
    }
    if interest.contains(Interest::WRITABLE) {
        events |= libc::POLLOUT;
    }
    if interest.contains(Interest::EXCEPTIONAL) {
        events |= libc::POLLPRI;
    }

    let mut pfd = libc::pollfd {
        fd: socket,
        events,
        revents: 0,
    };
    // SAFETY: `pfd` is a valid, exclusively borrowed pollfd and the count
    // passed is 1. A zero timeout makes the call return immediately.
    let rc = unsafe { libc::poll(&raw mut pfd, 1, 0) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(Interest::empty());
        }
        return Err(err);
    }
    if rc == 0 {
        return Ok(Interest::empty());
    }
    if pfd.revents & libc::POLLNVAL != 0 {
        return Err(io::Error::from_raw_os_error(libc::EBADF));
    }

    let mut ready = Interest::empty();
    if pfd.revents & (libc::POLLHUP | libc::POLLERR) != 0 {
        return Ok(interest.io());
    }
    if pfd.revents & libc::POLLIN != 0 {
        ready |= Interest::READABLE;
    }
    if pfd.revents & libc::POLLOUT != 0 {
        ready |= Interest::WRITABLE;
    }
    if pfd.revents & libc::POLLPRI != 0 {
        ready |= Interest::EXCEPTIONAL;
    }
    Ok(ready & interest)
}
