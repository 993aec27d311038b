//! Readiness polling set, per §4.5.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, Weak};

use crate::error::{Error, Result};

use super::session::Session;

/// Readable/writable/error/notification bits, used both for an
/// application's *want* interest and a session's current *have* readiness.
///
/// `one_shot` is carried on a *want* interest record but not yet consulted
/// by [`Monitor::process`] — see the Open Questions entry in DESIGN.md;
/// trigger mode is always level-triggered today.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub notification: bool,
    pub one_shot: bool,
}

impl Interest {
    pub fn matches(&self, have: Interest) -> bool {
        (self.readable && have.readable)
            || (self.writable && have.writable)
            || (self.error && have.error)
            || (self.notification && have.notification)
    }
}

/// One readiness report for a registered session.
#[derive(Copy, Clone, Debug)]
pub struct ReadinessEvent {
    pub handle: u32,
    pub interest: Interest,
}

struct Registration {
    session: Weak<Session>,
    want: Interest,
    have: Interest,
    queued: bool,
}

struct Inner {
    registrations: HashMap<u32, Registration>,
    ready: VecDeque<u32>,
    run: bool,
    interrupts: usize,
    parked: usize,
}

/// A level-triggered readiness polling set over registered sessions, with a
/// round-robin ready-queue.
pub struct Monitor {
    inner: Mutex<Inner>,
    wake: Condvar,
}

impl Monitor {
    pub fn new() -> Arc<Monitor> {
        Arc::new(Monitor {
            inner: Mutex::new(Inner {
                registrations: HashMap::new(),
                ready: VecDeque::new(),
                run: true,
                interrupts: 0,
                parked: 0,
            }),
            wake: Condvar::new(),
        })
    }

    pub fn register(self: &Arc<Monitor>, session: &Arc<Session>, want: Interest) {
        let handle = session.handle();
        let have = session.readiness();
        let queued = want.matches(have);
        {
            let mut inner = self.inner.lock().unwrap();
            inner.registrations.insert(
                handle,
                Registration {
                    session: Arc::downgrade(session),
                    want,
                    have,
                    queued,
                },
            );
            if queued {
                inner.ready.push_back(handle);
                self.wake.notify_all();
            }
        }
        session.register_monitor(Arc::downgrade(self));
    }

    pub fn set_interest(&self, handle: u32, want: Interest) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(reg) = inner.registrations.get_mut(&handle) {
            reg.want = want;
        }
        drop(inner);
        self.refresh(handle);
    }

    pub fn deregister(&self, handle: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.registrations.remove(&handle);
        inner.ready.retain(|&h| h != handle);
    }

    /// Recomputes `have` for `handle` from its live session and flips its
    /// ready-queue membership, without reordering the queue.
    pub(crate) fn refresh(&self, handle: u32) {
        let mut inner = self.inner.lock().unwrap();
        let Some(reg) = inner.registrations.get_mut(&handle) else {
            return;
        };
        let Some(session) = reg.session.upgrade() else {
            inner.registrations.remove(&handle);
            inner.ready.retain(|&h| h != handle);
            return;
        };
        reg.have = session.readiness();
        let matched = reg.want.matches(reg.have);
        if matched && !reg.queued {
            reg.queued = true;
            inner.ready.push_back(handle);
            self.wake.notify_all();
        } else if !matched && reg.queued {
            reg.queued = false;
            inner.ready.retain(|&h| h != handle);
        }
    }

    /// Walks the current ready-queue once, emitting one event per still-
    /// matched session and re-appending it to the tail (round-robin).
    /// Sessions whose weak reference has expired are dropped entirely.
    pub fn process(&self) -> Vec<ReadinessEvent> {
        let mut inner = self.inner.lock().unwrap();
        let len = inner.ready.len();
        let mut events = Vec::with_capacity(len);
        for _ in 0..len {
            let handle = match inner.ready.pop_front() {
                Some(h) => h,
                None => break,
            };
            let alive = inner
                .registrations
                .get(&handle)
                .map(|reg| reg.session.upgrade().is_some())
                .unwrap_or(false);
            if !alive {
                inner.registrations.remove(&handle);
                continue;
            }
            let reg = inner.registrations.get_mut(&handle).unwrap();
            if reg.want.matches(reg.have) {
                events.push(ReadinessEvent {
                    handle,
                    interest: reg.have,
                });
                inner.ready.push_back(handle);
            } else {
                reg.queued = false;
            }
        }
        events
    }

    /// Blocks until the ready-queue is non-empty, an interrupt is pending,
    /// or the monitor is stopped, then drains it via [`Monitor::process`].
    pub fn dequeue(&self, blocking: bool) -> Result<Vec<ReadinessEvent>> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.interrupts > 0 {
                inner.interrupts -= 1;
                return Err(Error::Cancelled);
            }
            if !inner.run {
                return Err(Error::Cancelled);
            }
            if !inner.ready.is_empty() {
                break;
            }
            if !blocking {
                return Err(Error::WouldBlock);
            }
            inner.parked += 1;
            inner = self.wake.wait(inner).unwrap();
            inner.parked -= 1;
        }
        drop(inner);
        Ok(self.process())
    }

    pub fn interrupt_one(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.interrupts += 1;
        self.wake.notify_one();
    }

    pub fn interrupt_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.interrupts += inner.parked.max(1);
        self.wake.notify_all();
    }

    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.run = false;
        self.wake.notify_all();
    }
}
