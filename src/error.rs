//! Crate-wide error taxonomy.
//!
//! Every fallible operation in this crate returns a value drawn from this
//! enum rather than a bare `io::Error`; host OS errors are mapped to the
//! nearest category by [`Error::from_io`].

use std::io;

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy shared by the proactor, the simulation machine, and
/// the codec.
///
/// Fatal invariants (handle map corruption, lock inversion) are not
/// represented here — those are `debug_assert!`/`unreachable!` failures, not
/// recoverable errors, per the design notes.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad argument or state (e.g. a malformed DER stream, an operation
    /// attempted from the wrong session state).
    #[error("invalid argument or state: {0}")]
    Invalid(String),

    /// A non-blocking operation could not proceed without blocking.
    #[error("operation would block")]
    WouldBlock,

    /// The peer has closed the read side; no further bytes will arrive.
    #[error("end of file")]
    Eof,

    /// The peer has closed both sides, or never existed.
    #[error("connection is dead")]
    ConnectionDead,

    /// A connect was attempted against an endpoint that isn't listening.
    #[error("connection refused")]
    ConnectionRefused,

    /// The requested port or endpoint is already bound.
    #[error("address in use")]
    AddressInUse,

    /// A conversion overflowed the destination's range.
    #[error("value exceeds destination range")]
    Limit,

    /// The requested feature is compiled out or otherwise disabled.
    #[error("not implemented")]
    NotImplemented,

    /// The operation was aborted before it completed. Per the concurrency
    /// model, cancellation is silent to the application; this variant exists
    /// for the internal dispatcher, not for user-visible announcements.
    #[error("operation cancelled")]
    Cancelled,

    /// A host OS error that didn't map cleanly onto the categories above.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Maps a host OS error onto the nearest taxonomy category, per §7.
    pub fn from_io(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::WouldBlock => Error::WouldBlock,
            io::ErrorKind::UnexpectedEof => Error::Eof,
            io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => Error::ConnectionDead,
            io::ErrorKind::ConnectionRefused => Error::ConnectionRefused,
            io::ErrorKind::AddrInUse => Error::AddressInUse,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
                Error::Invalid(err.to_string())
            }
            _ => Error::Io(err),
        }
    }

    /// True for the handful of variants that are expected, steady-state
    /// outcomes rather than genuine failures.
    pub fn is_routine(&self) -> bool {
        matches!(self, Error::WouldBlock | Error::Eof | Error::Cancelled)
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(_: std::num::TryFromIntError) -> Error {
        Error::Limit
    }
}

/// Builds an [`Error::Invalid`] from a format string at the call site.
#[macro_export]
macro_rules! invalid {
    ($($arg:tt)*) => {
        $crate::error::Error::Invalid(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_would_block() {
        let e = Error::from_io(io::Error::from(io::ErrorKind::WouldBlock));
        assert!(matches!(e, Error::WouldBlock));
    }

    #[test]
    fn maps_connection_reset_to_dead() {
        let e = Error::from_io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(matches!(e, Error::ConnectionDead));
    }

    #[test]
    fn routine_classification() {
        assert!(Error::WouldBlock.is_routine());
        assert!(Error::Eof.is_routine());
        assert!(!Error::AddressInUse.is_routine());
    }
}
