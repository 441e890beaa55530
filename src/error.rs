//! Typed error kinds for mini-ipc.
//!
//! The abstract error kinds named in the design (`INVALID`, `TIMEDOUT`,
//! `PROTOCOL`, `REMOTE`, `REFUSED`, `RESOURCE`, `NOTFOUND`, `UNSUPPORTED`)
//! map directly onto variants here so callers can match on failure kind
//! instead of parsing a message string.

use std::fmt;

/// Failure reported by a channel operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad descriptor, bad parameter, or wrong handle.
    #[error("invalid argument or handle")]
    Invalid,

    /// No reply arrived within the caller's timeout.
    #[error("call timed out")]
    TimedOut,

    /// Short reply, size mismatch, kind mismatch, or a packet that would
    /// exceed a wire limit.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server reported an `ERROR` reply; the remote errno is attached.
    #[error("remote error: {0}")]
    Remote(RemoteError),

    /// The server has no free client slot.
    #[error("server refused connection: no free client slot")]
    Refused,

    /// Allocation failed.
    #[error("resource allocation failed")]
    Resource,

    /// `unexport` of an unknown descriptor, or `close` of an unknown handle.
    #[error("not found")]
    NotFound,

    /// The server could not find the requested procedure. Reported to a
    /// remote peer as `REMOTE`/`EOPNOTSUPP`; kept as a distinct local kind
    /// so a server-internal caller of `lookup` can tell them apart.
    #[error("procedure not found")]
    Unsupported,

    /// Error surfaced directly from the OS.
    #[error("system error: {0}")]
    Os(#[from] std::io::Error),
}

/// A remote errno, as reported in an `ERROR`-kind reply.
///
/// Wraps a raw `errno` value the way `*out_return` is populated in the
/// original C API; `libc::strerror`-style text is produced on `Display`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteError(pub i32);

impl RemoteError {
    pub const EOPNOTSUPP: RemoteError = RemoteError(libc::EOPNOTSUPP);

    pub fn code(self) -> i32 {
        self.0
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = nix::errno::Errno::from_raw(self.0);
        write!(f, "{} ({})", text, self.0)
    }
}

impl From<i32> for RemoteError {
    fn from(code: i32) -> Self {
        RemoteError(code)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a [`Error::Protocol`] from a formatted message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_roundtrips_code() {
        let e = RemoteError::from(libc::ETIMEDOUT);
        assert_eq!(e.code(), libc::ETIMEDOUT);
    }

    #[test]
    fn error_kinds_are_distinguishable() {
        let e = Error::Remote(RemoteError::EOPNOTSUPP);
        assert!(matches!(e, Error::Remote(_)));
        assert!(!matches!(e, Error::TimedOut));
    }
}
