//! Fallback backend for platforms without a real completion port, or when
//! the `os-poll` feature is disabled. Tracks registrations in memory and
//! only ever reports the wake token; an engine built on this backend can
//! still run "Callback" events (posted directly, never via OS I/O) but
//! cannot observe real socket readiness.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::error::Result;
use crate::proactor::event::RawHandle;

use super::{Interest, SelectorEvent};

struct State {
    registered: HashSet<RawHandle>,
    woken: bool,
}

pub struct Selector {
    state: Mutex<State>,
    wake: Condvar,
}

impl Selector {
    pub fn new() -> Result<Selector> {
        if cfg!(feature = "os-poll") {
            log::debug!("nexio: falling back to the shell poller on an unsupported target");
        }
        Ok(Selector {
            state: Mutex::new(State {
                registered: HashSet::new(),
                woken: false,
            }),
            wake: Condvar::new(),
        })
    }

    pub fn register(&self, handle: RawHandle, _token: u64, _interest: Interest) -> Result<()> {
        self.state.lock().unwrap().registered.insert(handle);
        Ok(())
    }

    pub fn reregister(&self, _handle: RawHandle, _token: u64, _interest: Interest) -> Result<()> {
        Ok(())
    }

    pub fn deregister(&self, handle: RawHandle) -> Result<()> {
        self.state.lock().unwrap().registered.remove(&handle);
        Ok(())
    }

    pub fn select(&self, events: &mut Vec<SelectorEvent>, timeout: Option<Duration>) -> Result<usize> {
        events.clear();
        let mut state = self.state.lock().unwrap();
        if !state.woken {
            match timeout {
                Some(d) => {
                    let (guard, _) = self.wake.wait_timeout_while(state, d, |s| !s.woken).unwrap();
                    state = guard;
                }
                None => {
                    state = self.wake.wait_while(state, |s| !s.woken).unwrap();
                }
            }
        }
        state.woken = false;
        Ok(0)
    }

    pub fn wake(&self) -> Result<()> {
        self.state.lock().unwrap().woken = true;
        self.wake.notify_all();
        Ok(())
    }
}
