#![cfg_attr(docsrs, feature(doc_cfg))]

//! A level-triggered, pollable event primitive.
//!
//! An event is a binary flag that one thread sets and another thread observes. Once set, it
//! stays set until it is explicitly reset: waiting on or testing the event never clears it, and
//! setting an already-set event has no further effect.
//!
//! Unlike a condition variable, the event is backed by a kernel object that can be handed to a
//! readiness-multiplexing call (`poll`, `select`, an async reactor) next to socket descriptors.
//! An I/O loop can therefore sleep on its sockets and still be woken by a manual signal such as
//! "shutdown requested" or "outgoing data queued".
//!
//! An event can also wrap a caller-owned source, for example a socket, in which case it is
//! read-only: it reports the readiness of that source and can never be set or reset by hand.
//!
//! This crate is implemented using a non-blocking pipe and `poll` on Unix, and a Win32
//! manual-reset event on Windows. The Unix implementation exposes the read end of the pipe as a
//! [`BorrowedFd`](std::os::fd::BorrowedFd), the Win32 implementation exposes a
//! [`BorrowedHandle`](std::os::windows::io::BorrowedHandle).
//!
//! Failures are returned as [`Error`] and also reported through the [`log`] facade, so the
//! boolean convenience methods ([`Event::test`], [`Event::wait`]) can degrade to `false` without
//! losing the diagnostic.

mod error;

pub use error::{Error, Result};

#[cfg(unix)]
mod pipe;
#[cfg(unix)]
pub use pipe::Event;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::Event;

/// The role of an [`Event`], fixed when the event is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventKind {
    /// A placeholder that is never valid.
    #[default]
    Dummy,
    /// A manually signaled event, owning its channel.
    Signal,
    /// Wraps an external source and becomes ready when the source is readable.
    Read,
    /// Wraps an external source and becomes ready when the source is writable.
    Write,
}

impl EventKind {
    /// Returns `true` for the kinds that observe an external source.
    pub fn is_read_only(self) -> bool {
        matches!(self, EventKind::Read | EventKind::Write)
    }
}
