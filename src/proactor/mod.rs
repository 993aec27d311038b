//! Completion-based I/O engine, per §4.7/§4.8.
//!
//! A proactor: callers submit an operation (accept/connect/send/receive, or
//! a bare callback) along with an `attempt` closure that tries it
//! non-blockingly, and the engine drives retries against the platform
//! selector until it resolves, then dispatches the outcome. The engine
//! never issues a socket syscall itself — that stays with whatever owns the
//! raw handle — so it has no opinion on what a handle actually is beyond an
//! integer the platform selector can register.

mod chronology;
mod event;
mod sys;

pub mod engine;

pub use chronology::{Chronology, TimerId};
pub use event::{EventHandle, EventKind, EventPool, RawHandle};
pub use engine::{Engine, Outcome};
pub use sys::Interest;
