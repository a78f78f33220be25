#![cfg(windows)]

use std::io;
use std::os::windows::io::{
    AsHandle, AsRawHandle, BorrowedHandle, FromRawHandle, OwnedHandle, RawHandle,
};
use std::ptr;
use std::time::Duration;

use log::{error, trace};
use winapi::shared::minwindef::{FALSE, TRUE};
use winapi::shared::winerror::WAIT_TIMEOUT;
use winapi::um::handleapi::INVALID_HANDLE_VALUE;
use winapi::um::synchapi::{CreateEventW, ResetEvent, SetEvent, WaitForSingleObject};
use winapi::um::winbase::{WAIT_FAILED, WAIT_OBJECT_0};
use winapi::um::winnt::HANDLE;

use crate::{Error, EventKind, Result};

#[derive(Debug)]
enum Ends {
    Null,
    Owned(OwnedHandle),
    // Caller-owned, never closed by us.
    Source(RawHandle),
}

/// A level-triggered, pollable event.
///
/// See the [module-level documentation](..) for more information.
#[derive(Debug)]
pub struct Event {
    ends: Ends,
    kind: EventKind,
}

fn timeout_millis(timeout: Duration) -> u32 {
    let mut millis = timeout.as_millis();
    if timeout.subsec_nanos() % 1_000_000 != 0 {
        millis += 1;
    }
    millis.min(u32::MAX as u128) as u32
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
    pub fn new(kind: EventKind) -> Result<Self> {
        let mut event = Self::null();
        event.create(kind)?;
        Ok(event)
    }

    /// Wraps a caller-owned waitable handle (for example a `WSAEVENT`) as a read-only event.
    ///
    /// A null or invalid handle yields a null event, and so does any kind other than `Read` or
    /// `Write`.
    ///
    /// # Safety
    ///
    /// `handle` must stay open until the event is closed or dropped.
    pub unsafe fn from_raw_source(handle: RawHandle, kind: EventKind) -> Self {
        if !kind.is_read_only() {
            error!("Event::from_raw_source: kind {:?} cannot wrap a source", kind);
            return Self::null();
        }
        let ends = if handle.is_null() || handle as HANDLE == INVALID_HANDLE_VALUE {
            Ends::Null
        } else {
            Ends::Source(handle)
        };
        Self { ends, kind }
    }

    /// Allocates a manual-reset kernel event. On error the event is left null.
    pub fn create(&mut self, kind: EventKind) -> Result<()> {
        self.close();

        if kind != EventKind::Signal {
            error!("Event::create: cannot create an event of kind {:?}", kind);
            return Err(Error::UnsupportedKind(kind));
        }

        // Manual reset, initially unsignaled.
        let handle = unsafe { CreateEventW(ptr::null_mut(), TRUE, FALSE, ptr::null()) };
        if handle.is_null() || handle == INVALID_HANDLE_VALUE {
            let err = Error::last_os_error("CreateEventW");
            error!("Event::create: {}", err);
            return Err(err);
        }

        trace!("Event::create: handle {:?}", handle);
        self.ends = Ends::Owned(unsafe { OwnedHandle::from_raw_handle(handle as RawHandle) });
        self.kind = kind;
        Ok(())
    }

    /// Releases the kernel event and returns to the null state.
    pub fn close(&mut self) {
        if !self.is_null() {
            trace!("Event::close: releasing {:?}", self.ends);
        }
        self.ends = Ends::Null;
    }

    /// Returns `true` if the event has no handle to wait on.
    pub fn is_null(&self) -> bool {
        matches!(self.ends, Ends::Null)
    }

    /// Returns `true` if the event has a handle to wait on.
    pub fn is_valid(&self) -> bool {
        !self.is_null()
    }

    /// Returns the role the event was constructed or last created with.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    fn owned_handle(&self, op: &str) -> Result<HANDLE> {
        match &self.ends {
            Ends::Owned(handle) => Ok(handle.as_raw_handle() as HANDLE),
            Ends::Null => {
                error!("Event::{}: tried to {} a null event", op, op);
                Err(Error::Null)
            }
            Ends::Source(_) => {
                error!("Event::{}: tried to {} a read-only event", op, op);
                Err(Error::ReadOnly)
            }
        }
    }

    /// Clears the signaled state.
    ///
    /// Fails with [`Error::Null`] on a null event. An event wrapping an external handle is valid
    /// but still cannot be reset, since resetting belongs to whoever signals that handle; this
    /// fails with [`Error::ReadOnly`] and leaves the handle untouched.
    pub fn reset(&self) -> Result<()> {
        let handle = self.owned_handle("reset")?;
        if unsafe { ResetEvent(handle) } != TRUE {
            let err = Error::last_os_error("ResetEvent");
            error!("Event::reset: {}", err);
            return Err(err);
        }
        Ok(())
    }

    /// Signals the event. Setting a signaled event has no further effect.
    pub fn set(&self) -> Result<()> {
        let handle = self.owned_handle("set")?;
        if unsafe { SetEvent(handle) } != TRUE {
            let err = Error::last_os_error("SetEvent");
            error!("Event::set: {}", err);
            return Err(err);
        }
        Ok(())
    }

    /// Returns `true` if the event is currently signaled, without blocking.
    pub fn test(&self) -> bool {
        self.wait(Duration::ZERO)
    }

    /// Waits up to `timeout` for the event to become signaled. Errors collapse to `false`.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.wait_for(timeout).unwrap_or(false)
    }

    /// Same as [`wait`](Self::wait), with the timeout in milliseconds.
    pub fn wait_ms(&self, msecs: u64) -> bool {
        self.wait(Duration::from_millis(msecs))
    }

    /// Waits up to `timeout` for the event to become signaled, telling a timeout (`Ok(false)`)
    /// apart from a failure. The signaled state is not consumed.
    pub fn wait_for(&self, timeout: Duration) -> Result<bool> {
        let handle = match &self.ends {
            Ends::Null => return Err(Error::Null),
            Ends::Owned(handle) => handle.as_raw_handle() as HANDLE,
            Ends::Source(handle) => *handle as HANDLE,
        };

        let res = unsafe { WaitForSingleObject(handle, timeout_millis(timeout)) };
        if res == WAIT_OBJECT_0 {
            Ok(true)
        } else if res == WAIT_TIMEOUT {
            Ok(false)
        } else {
            let err = if res == WAIT_FAILED {
                Error::last_os_error("WaitForSingleObject")
            } else {
                Error::Os {
                    op: "WaitForSingleObject",
                    source: io::Error::other(format!("unexpected wait result {:#x}", res)),
                }
            };
            error!("Event::wait: {}", err);
            Err(err)
        }
    }

    /// Returns the handle to hand to an external wait or reactor, or `None` on a null event.
    pub fn pollable(&self) -> Option<BorrowedHandle<'_>> {
        match &self.ends {
            Ends::Null => None,
            Ends::Owned(handle) => Some(handle.as_handle()),
            // SAFETY: from_raw_source requires the handle to outlive the event.
            Ends::Source(handle) => Some(unsafe { BorrowedHandle::borrow_raw(*handle) }),
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::null()
    }
}

// It is safe to send an event to another thread. The underlying handle is a kernel object that
// can be used from any thread.
unsafe impl Send for Event {}

// It is safe to share an event between threads. The underlying handle is a kernel object that is
// thread-safe.
unsafe impl Sync for Event {}
