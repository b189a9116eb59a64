use std::error;
use std::fmt;
use std::io;

/// Broad category of a driver failure. Callers branch on this rather than on the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid parameter, rejected negotiation or illegal state transition.
    /// The session stays usable.
    Config,
    /// Transport failure or unrecoverable framing corruption.
    /// The session is faulted and must be uninitialized.
    Io,
    /// No response or scan arrived in time. The call may be retried.
    Timeout,
}

/// Represents errors that can occur during Sick LMS operations.
#[derive(Debug)]
pub enum Error {
    /// A configuration request was invalid, rejected by the device, or not allowed in the current state.
    Config { description: String },

    /// Communication with the device failed.
    Io { description: String },

    /// The device did not answer within the allowed time.
    Timeout { description: String },
}

impl Error {
    pub(crate) fn config(description: impl Into<String>) -> Error {
        Error::Config {
            description: description.into(),
        }
    }

    pub(crate) fn io(description: impl Into<String>) -> Error {
        Error::Io {
            description: description.into(),
        }
    }

    pub(crate) fn timeout(description: impl Into<String>) -> Error {
        Error::Timeout {
            description: description.into(),
        }
    }

    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config { .. } => ErrorKind::Config,
            Error::Io { .. } => ErrorKind::Io,
            Error::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Returns the human-readable description carried by the error.
    pub fn description(&self) -> &str {
        match self {
            Error::Config { description }
            | Error::Io { description }
            | Error::Timeout { description } => description,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config { description } => write!(f, "config error: {}", description),
            Error::Io { description } => write!(f, "io error: {}", description),
            Error::Timeout { description } => write!(f, "timeout: {}", description),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::timeout(err.to_string()),
            _ => Error::io(err.to_string()),
        }
    }
}

impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::InvalidInput => Error::config(err.to_string()),
            _ => Error::io(err.to_string()),
        }
    }
}

/// A specialized `Result` type for Sick LMS operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_timeouts_map_to_timeout_kind() {
        let err: Error = io::Error::new(io::ErrorKind::TimedOut, "late").into();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().starts_with("io error"));
    }

    #[test]
    fn description_is_preserved() {
        let err = Error::config("bad averaging count");
        assert_eq!(err.description(), "bad averaging count");
        assert_eq!(err.to_string(), "config error: bad averaging count");
    }
}
