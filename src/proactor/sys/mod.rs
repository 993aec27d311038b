//! Platform completion backend, selected at compile time.
//!
//! Every backend exposes the same inherent API on a type named `Selector`:
//! `new`, `register`, `reregister`, `deregister`, `select`, and `wake`. The
//! engine only ever sees this module's re-export, never a platform type
//! directly, the same split the teacher draws between `os_linux.rs` and its
//! `reactor`/`poll` layer above it.

use std::time::Duration;

use crate::error::Result;
use crate::proactor::event::RawHandle;

/// Readiness a registration is interested in (or reports).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest { readable: true, writable: false };
    pub const WRITABLE: Interest = Interest { readable: false, writable: true };
    pub const BOTH: Interest = Interest { readable: true, writable: true };
}

/// One readiness report handed back by [`select`], keyed by the token
/// supplied at registration (the event pool's slot/generation pair, packed).
#[derive(Copy, Clone, Debug)]
pub struct SelectorEvent {
    pub token: u64,
    pub interest: Interest,
    pub error: bool,
}

#[cfg(all(unix, feature = "os-poll", not(nexio_force_shell_poller)))]
mod unix;
#[cfg(all(unix, feature = "os-poll", not(nexio_force_shell_poller)))]
pub use unix::Selector;

#[cfg(all(windows, feature = "os-poll", not(nexio_force_shell_poller)))]
mod windows;
#[cfg(all(windows, feature = "os-poll", not(nexio_force_shell_poller)))]
pub use windows::Selector;

#[cfg(any(
    not(feature = "os-poll"),
    not(any(unix, windows)),
    nexio_force_shell_poller
))]
mod shell;
#[cfg(any(
    not(feature = "os-poll"),
    not(any(unix, windows)),
    nexio_force_shell_poller
))]
pub use shell::Selector;

/// Common surface every platform `Selector` implements. Not used as a trait
/// object anywhere (the engine is generic over a single concrete backend
/// selected by `cfg`), but kept here so a new backend can be checked against
/// it before wiring in.
#[allow(dead_code)]
pub trait SelectorApi: Sized {
    fn new() -> Result<Self>;
    fn register(&self, handle: RawHandle, token: u64, interest: Interest) -> Result<()>;
    fn reregister(&self, handle: RawHandle, token: u64, interest: Interest) -> Result<()>;
    fn deregister(&self, handle: RawHandle) -> Result<()>;
    fn select(&self, events: &mut Vec<SelectorEvent>, timeout: Option<Duration>) -> Result<usize>;
    fn wake(&self) -> Result<()>;
}
