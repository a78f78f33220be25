use std::io;

use thiserror::Error;

use crate::EventKind;

/// Errors reported by [`Event`](crate::Event) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The event has not been created, or has been closed.
    #[error("the event is null")]
    Null,
    /// The event observes an external source and cannot be set or reset.
    #[error("the event is read-only")]
    ReadOnly,
    /// Only [`EventKind::Signal`] events own a channel that can be created.
    #[error("cannot create an event of kind {0:?}")]
    UnsupportedKind(EventKind),
    /// An underlying system call failed.
    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn last_os_error(op: &'static str) -> Self {
        Error::Os {
            op,
            source: io::Error::last_os_error(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
