use std::io;
use std::os::fd::{AsFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use libc::c_void;
use log::{error, trace};

use crate::{Error, EventKind, Result};

// The value of a signal unit. Only its presence in the pipe matters.
const SIGNAL_UNIT: u8 = 1;

// How many pending units a single read removes while draining.
const DRAIN_CHUNK: usize = 64;

#[derive(Debug)]
enum Ends {
    Null,
    Channel { read: OwnedFd, write: OwnedFd },
    // Caller-owned, never closed by us.
    Source(RawFd),
}

/// A level-triggered, pollable event.
///
/// See the [module-level documentation](..) for more information.
#[derive(Debug)]
pub struct Event {
    ends: Ends,
    kind: EventKind,
}

/// Runs f() until it stops failing with EINTR.
fn while_eintr<F, R>(mut f: F) -> io::Result<R>
where
    F: FnMut() -> io::Result<R>,
{
    loop {
        match f() {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            r => break r,
        }
    }
}

fn syscall_result<T: PartialOrd + Default>(result: T) -> io::Result<T> {
    if result >= T::default() {
        Ok(result)
    } else {
        Err(io::Error::last_os_error())
    }
}

fn read_units(fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: fd is open for the duration of the borrow and buf is valid for buf.len() bytes.
    let n = while_eintr(|| unsafe {
        syscall_result(libc::read(
            fd.as_raw_fd(),
            buf.as_mut_ptr() as *mut c_void,
            buf.len(),
        ))
    })?;
    Ok(n as usize)
}

fn write_unit(fd: BorrowedFd<'_>) -> io::Result<()> {
    let buf = [SIGNAL_UNIT];
    // SAFETY: fd is open for the duration of the borrow and buf is one valid byte.
    while_eintr(|| unsafe {
        syscall_result(libc::write(fd.as_raw_fd(), buf.as_ptr() as *const c_void, 1))
    })?;
    Ok(())
}

fn set_nonblocking_cloexec(fd: BorrowedFd<'_>) -> Result<()> {
    let raw = fd.as_raw_fd();

    // SAFETY: raw is an open descriptor, F_GETFL/F_SETFL take no pointer arguments.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags == -1 {
        return Err(Error::last_os_error("fcntl(F_GETFL)"));
    }
    // SAFETY: F_SETFL takes an int argument, no memory is passed.
    if unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(Error::last_os_error("fcntl(F_SETFL, O_NONBLOCK)"));
    }

    // SAFETY: as above, for F_GETFD/F_SETFD.
    let fd_flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
    if fd_flags == -1 {
        return Err(Error::last_os_error("fcntl(F_GETFD)"));
    }
    // SAFETY: F_SETFD takes an int argument, no memory is passed.
    if unsafe { libc::fcntl(raw, libc::F_SETFD, fd_flags | libc::FD_CLOEXEC) } == -1 {
        return Err(Error::last_os_error("fcntl(F_SETFD, FD_CLOEXEC)"));
    }
    Ok(())
}

/// Allocates a pipe with both ends non-blocking. On error both ends are closed again.
fn open_channel() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds_raw = [0; 2];
    // SAFETY: fds_raw is a writable array of the two ints pipe() fills in.
    if unsafe { libc::pipe(fds_raw.as_mut_ptr()) } == -1 {
        return Err(Error::last_os_error("pipe"));
    }

    // SAFETY: pipe() succeeded, so both descriptors are open and owned by nobody else.
    let (read, write) = unsafe {
        (
            OwnedFd::from_raw_fd(fds_raw[0]),
            OwnedFd::from_raw_fd(fds_raw[1]),
        )
    };

    set_nonblocking_cloexec(read.as_fd())?;
    set_nonblocking_cloexec(write.as_fd())?;
    Ok((read, write))
}

/// Converts a timeout to poll(2) milliseconds, rounding up partial milliseconds.
fn timeout_millis(timeout: Duration) -> libc::c_int {
    let mut millis = timeout.as_millis();
    if timeout.subsec_nanos() % 1_000_000 != 0 {
        millis += 1;
    }
    millis.min(libc::c_int::MAX as u128) as libc::c_int
}

impl Event {
    /// Returns a null event. It is not valid until [`create`](Self::create) succeeds.
    pub const fn null() -> Self {
        Self {
            ends: Ends::Null,
            kind: EventKind::Dummy,
        }
    }

    /// Creates a new, unsignaled event of the given kind.
    ///
    /// Only [`EventKind::Signal`] can be created; see [`create`](Self::create).
    pub fn new(kind: EventKind) -> Result<Self> {
        let mut event = Self::null();
        event.create(kind)?;
        Ok(event)
    }

    /// Wraps a caller-owned descriptor as a read-only event.
    ///
    /// The event is ready while `fd` is readable ([`EventKind::Read`]) or writable
    /// ([`EventKind::Write`]). It cannot be set or reset, and closing or dropping it leaves `fd`
    /// open. A negative `fd` yields a null event, and so does any kind other than `Read` or
    /// `Write`.
    ///
    /// # Safety
    ///
    /// `fd` must stay open until the event is closed or dropped.
    pub unsafe fn from_raw_source(fd: RawFd, kind: EventKind) -> Self {
        if !kind.is_read_only() {
            error!("Event::from_raw_source: kind {:?} cannot wrap a source", kind);
            return Self::null();
        }
        let ends = if fd < 0 { Ends::Null } else { Ends::Source(fd) };
        Self { ends, kind }
    }

    /// Allocates the channel of a manually signaled event.
    ///
    /// Any channel the event already owns is released first. On error the failure is logged, the
    /// event is left null and no descriptor is leaked.
    pub fn create(&mut self, kind: EventKind) -> Result<()> {
        self.close();

        if kind != EventKind::Signal {
            error!("Event::create: cannot create an event of kind {:?}", kind);
            return Err(Error::UnsupportedKind(kind));
        }

        let (read, write) = open_channel().inspect_err(|err| error!("Event::create: {}", err))?;
        trace!(
            "Event::create: pipe read end {}, write end {}",
            read.as_raw_fd(),
            write.as_raw_fd()
        );
        self.ends = Ends::Channel { read, write };
        self.kind = kind;
        Ok(())
    }

    /// Releases the channel and returns the event to the null state.
    ///
    /// Closing a null event does nothing.
    pub fn close(&mut self) {
        if !self.is_null() {
            trace!("Event::close: releasing {:?}", self.ends);
        }
        self.ends = Ends::Null;
    }

    /// Returns `true` if the event has no readable end.
    pub fn is_null(&self) -> bool {
        matches!(self.ends, Ends::Null)
    }

    /// Returns `true` if the event has a readable end to wait on.
    pub fn is_valid(&self) -> bool {
        !self.is_null()
    }

    /// Returns the role the event was constructed or last created with.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Clears the signaled state by draining every pending unit.
    ///
    /// Fails with [`Error::Null`] on a null event. An event wrapping an external source is valid
    /// but still cannot be reset: draining would consume the source's own data, so this fails
    /// with [`Error::ReadOnly`] instead and leaves the source untouched.
    pub fn reset(&self) -> Result<()> {
        let read = match &self.ends {
            Ends::Channel { read, .. } => read,
            Ends::Null => {
                error!("Event::reset: tried to reset a null event");
                return Err(Error::Null);
            }
            Ends::Source(_) => {
                error!("Event::reset: tried to reset a read-only event");
                return Err(Error::ReadOnly);
            }
        };

        // Normally at most one unit is pending, but concurrent set() calls can leave more.
        let mut buf = [0u8; DRAIN_CHUNK];
        loop {
            match read_units(read.as_fd(), &mut buf) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(source) => {
                    let err = Error::Os { op: "read", source };
                    error!("Event::reset: {}", err);
                    return Err(err);
                }
            }
        }
    }

    /// Signals the event.
    ///
    /// Setting an already signaled event leaves exactly one pending unit, so the state stays
    /// signaled until the next [`reset`](Self::reset). Fails with [`Error::Null`] on a null event
    /// and [`Error::ReadOnly`] on an event wrapping an external source.
    pub fn set(&self) -> Result<()> {
        let (read, write) = match &self.ends {
            Ends::Channel { read, write } => (read, write),
            Ends::Null => {
                error!("Event::set: tried to set a null event");
                return Err(Error::Null);
            }
            Ends::Source(_) => {
                error!("Event::set: tried to set a read-only event");
                return Err(Error::ReadOnly);
            }
        };

        // Take one unit off before adding one, so repeated signals do not accumulate. Whether
        // there was anything to take does not matter.
        let mut buf = [0u8; 1];
        let _ = read_units(read.as_fd(), &mut buf);

        match write_unit(write.as_fd()) {
            Ok(()) => Ok(()),
            // A full pipe is as signaled as it gets.
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(source) => {
                let err = Error::Os { op: "write", source };
                error!("Event::set: {}", err);
                Err(err)
            }
        }
    }

    /// Returns `true` if the event is currently signaled, without blocking.
    pub fn test(&self) -> bool {
        self.wait(Duration::ZERO)
    }

    /// Waits up to `timeout` for the event to become signaled.
    ///
    /// Returns `false` on timeout, on a null event and on a poll failure (which is logged). The
    /// signaled state is not consumed.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.wait_for(timeout).unwrap_or(false)
    }

    /// Same as [`wait`](Self::wait), with the timeout in milliseconds.
    pub fn wait_ms(&self, msecs: u64) -> bool {
        self.wait(Duration::from_millis(msecs))
    }

    /// Waits up to `timeout` for the event to become signaled, telling a timeout (`Ok(false)`)
    /// apart from a failure.
    ///
    /// A zero timeout polls once without blocking. The signaled state is not consumed.
    pub fn wait_for(&self, timeout: Duration) -> Result<bool> {
        let fd = match &self.ends {
            Ends::Null => return Err(Error::Null),
            Ends::Channel { read, .. } => read.as_raw_fd(),
            Ends::Source(fd) => *fd,
        };
        let events = match self.kind {
            EventKind::Write => libc::POLLOUT,
            _ => libc::POLLIN,
        };
        let mut pollfd = libc::pollfd {
            fd,
            events,
            revents: 0,
        };

        let deadline = Instant::now().checked_add(timeout);
        let mut remaining = timeout;
        let ret = loop {
            // SAFETY: pollfd is a valid array of one element.
            let ret = unsafe { libc::poll(&mut pollfd, 1, timeout_millis(remaining)) };
            if ret != -1 {
                break ret;
            }
            let source = io::Error::last_os_error();
            if source.kind() != io::ErrorKind::Interrupted {
                let err = Error::Os { op: "poll", source };
                error!("Event::wait: {}", err);
                return Err(err);
            }
            if let Some(deadline) = deadline {
                remaining = deadline.saturating_duration_since(Instant::now());
            }
        };

        if ret == 0 {
            return Ok(false);
        }
        if pollfd.revents & libc::POLLNVAL != 0 {
            let err = Error::Os {
                op: "poll",
                source: io::Error::from_raw_os_error(libc::EBADF),
            };
            error!("Event::wait: {}", err);
            return Err(err);
        }
        Ok(pollfd.revents & (events | libc::POLLHUP | libc::POLLERR) != 0)
    }

    /// Returns the descriptor to hand to an external `poll`/`select` or reactor.
    ///
    /// It is readable exactly while the event is signaled (for manual events). Returns `None` on
    /// a null event.
    pub fn pollable(&self) -> Option<BorrowedFd<'_>> {
        match &self.ends {
            Ends::Null => None,
            Ends::Channel { read, .. } => Some(read.as_fd()),
            // SAFETY: from_raw_source requires the descriptor to outlive the event.
            Ends::Source(fd) => Some(unsafe { BorrowedFd::borrow_raw(*fd) }),
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::null()
    }
}
