//! Real I/O completion port backend — the reference model §4.7 is written
//! against. A handle is associated with the port once via
//! `CreateIoCompletionPort`; completions (including ones posted manually for
//! [`super::super::event::EventKind::Callback`] and for the synchronous
//! accept/connect/send/receive emulation the engine performs) are drained
//! with `GetQueuedCompletionStatusEx`.

use std::io;
use std::time::Duration;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatusEx, PostQueuedCompletionStatus, OVERLAPPED,
    OVERLAPPED_ENTRY,
};

use crate::error::{Error, Result};
use crate::proactor::event::RawHandle;

use super::{Interest, SelectorEvent};

/// `CreateIoCompletionPort` associates a handle with the port but does not
/// track interest the way epoll/kqueue do; readiness here is really "has a
/// completion been posted", so `register`/`reregister` only need to run
/// once per handle and the `Interest` argument is informational.
pub struct Selector {
    port: HANDLE,
}

impl Selector {
    pub fn new() -> Result<Selector> {
        let port = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, 0, 0, 0) };
        if port == 0 {
            return Err(Error::from_io(io::Error::last_os_error()));
        }
        Ok(Selector { port })
    }

    pub fn register(&self, handle: RawHandle, token: u64, _interest: Interest) -> Result<()> {
        let rc = unsafe { CreateIoCompletionPort(handle as HANDLE, self.port, token as usize, 0) };
        if rc == 0 {
            return Err(Error::from_io(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Associating a handle with a completion port cannot be undone or
    /// changed; a "reregister" is a no-op once the initial association has
    /// been made.
    pub fn reregister(&self, _handle: RawHandle, _token: u64, _interest: Interest) -> Result<()> {
        Ok(())
    }

    pub fn deregister(&self, _handle: RawHandle) -> Result<()> {
        Ok(())
    }

    /// Posts a synthetic completion carrying `token`, used by the engine to
    /// announce the outcome of an operation it performed synchronously
    /// (§4.7 Submit: "if the kernel completes synchronously, the event is
    /// re-queued to the completion port so the standard dispatch path
    /// fires").
    pub fn post(&self, token: u64) -> Result<()> {
        let rc = unsafe { PostQueuedCompletionStatus(self.port, 0, token as usize, std::ptr::null_mut()) };
        if rc == 0 {
            return Err(Error::from_io(io::Error::last_os_error()));
        }
        Ok(())
    }

    pub fn select(&self, events: &mut Vec<SelectorEvent>, timeout: Option<Duration>) -> Result<usize> {
        events.clear();
        let mut entries: [OVERLAPPED_ENTRY; 256] = unsafe { std::mem::zeroed() };
        let timeout_ms = match timeout {
            Some(d) => d.as_millis().min(u32::MAX as u128) as u32,
            None => u32::MAX, // INFINITE
        };
        let mut removed = 0u32;
        let rc = unsafe {
            GetQueuedCompletionStatusEx(self.port, entries.as_mut_ptr(), entries.len() as u32, &mut removed, timeout_ms, 0)
        };
        if rc == 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(WAIT_TIMEOUT) {
                return Ok(0);
            }
            return Err(Error::from_io(err));
        }
        for entry in entries.iter().take(removed as usize) {
            events.push(SelectorEvent {
                token: entry.lpCompletionKey as u64,
                interest: Interest::BOTH,
                error: false,
            });
        }
        Ok(removed as usize)
    }

    pub fn wake(&self) -> Result<()> {
        self.post(WAKE_TOKEN)
    }
}

const WAIT_TIMEOUT: i32 = 0x0000_0102u32 as i32;
pub(crate) const WAKE_TOKEN: u64 = u64::MAX;

impl Drop for Selector {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.port);
        }
    }
}

unsafe impl Send for Selector {}
unsafe impl Sync for Selector {}

#[allow(dead_code)]
fn assert_overlapped_is_repr_c(_o: &OVERLAPPED) {}
