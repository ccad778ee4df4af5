use std::fmt;
use std::io;

/// Errors returned by the event dispatcher.
#[derive(Debug)]
pub enum Error {
    /// The dispatcher is disabled: the io_uring availability probe failed at
    /// construction time, or ring/pipe setup did not complete.
    NotInitialized,
    /// The submission queue stayed full after flushing pending entries.
    SubmissionQueueFull,
    /// `start` was called while a worker task is already running.
    AlreadyStarted,
    /// Ring setup or worker spawn failed.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotInitialized => write!(f, "event dispatcher not initialized"),
            Error::SubmissionQueueFull => {
                write!(f, "submission queue full after flush")
            }
            Error::AlreadyStarted => write!(f, "dispatcher already started"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
