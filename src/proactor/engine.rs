//! Completion-based I/O engine, per §4.7.
//!
//! The engine itself knows nothing about sockets beyond a raw handle: the
//! caller supplies an `attempt` closure (try the operation non-blockingly,
//! returning [`Error::WouldBlock`] if the kernel isn't ready) and an
//! `announce` closure (what to do with the outcome). This keeps the thin
//! socket wrappers — out of scope per §1 — decoupled from the waiter loop,
//! event pool, and detachment state machine, which are in scope.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, trace};

use crate::config::ProactorConfig;
use crate::error::{Error, Result};

use super::chronology::Chronology;
use super::event::{EventHandle, EventKind, EventPool, RawHandle};
use super::sys::{self, Interest};

/// The outcome an `attempt` closure reports.
pub enum Outcome {
    Accepted(RawHandle),
    Connected,
    Sent(usize),
    Received(usize),
}

type Attempt = Box<dyn FnMut() -> Result<Outcome> + Send>;
type Announce = Box<dyn FnOnce(Result<Outcome>) + Send>;

/// A submitted operation awaiting either a synchronous completion (already
/// resolved, just waiting to be dispatched) or a readiness retry.
enum Slot {
    Retry { handle: RawHandle, interest: Interest, attempt: Attempt, announce: Announce },
    Resolved { handle: RawHandle, announce: Announce, outcome: Result<Outcome> },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum DetachPhase {
    Attached,
    Detaching,
    Detached,
}

struct SocketState {
    phase: DetachPhase,
    inflight: usize,
    on_detach: Option<Box<dyn FnOnce() + Send>>,
}

/// The completion-based proactor: an attach/submit/wait/dispatch/cancel/
/// detach/close-all engine over whatever [`sys::Selector`] this platform
/// provides.
pub struct Engine {
    selector: sys::Selector,
    config: ProactorConfig,
    pool: Mutex<EventPool>,
    slots: Mutex<HashMap<EventHandle, Slot>>,
    ready: Mutex<Vec<EventHandle>>,
    sockets: Mutex<HashMap<RawHandle, SocketState>>,
    chronology: Arc<Chronology>,
    waiter_count: AtomicUsize,
}

impl Engine {
    pub fn new(config: ProactorConfig) -> Result<Engine> {
        Ok(Engine {
            selector: sys::Selector::new()?,
            pool: Mutex::new(EventPool::new(config.event_pool_capacity)),
            slots: Mutex::new(HashMap::new()),
            ready: Mutex::new(Vec::new()),
            sockets: Mutex::new(HashMap::new()),
            chronology: Arc::new(Chronology::new()),
            waiter_count: AtomicUsize::new(0),
            config,
        })
    }

    pub fn chronology(&self) -> &Arc<Chronology> {
        &self.chronology
    }

    /// Associates `handle` with the engine and installs the callback run on
    /// its final detach transition.
    pub fn attach(&self, handle: RawHandle, on_detach: impl FnOnce() + Send + 'static) -> Result<()> {
        self.selector.register(handle, handle as u64, Interest::BOTH)?;
        self.sockets.lock().unwrap().insert(
            handle,
            SocketState {
                phase: DetachPhase::Attached,
                inflight: 0,
                on_detach: Some(Box::new(on_detach)),
            },
        );
        trace!("proactor: attached handle {handle}");
        Ok(())
    }

    /// Submits a callback event: carries no socket, runs on the next
    /// dispatch.
    pub fn submit_callback(&self, f: impl FnOnce() + Send + 'static) -> Result<()> {
        let event = self.pool.lock().unwrap().acquire(EventKind::Callback(Box::new(|| {})), None);
        self.slots.lock().unwrap().insert(
            event,
            Slot::Resolved {
                handle: 0,
                announce: Box::new(move |_| f()),
                outcome: Ok(Outcome::Connected),
            },
        );
        self.ready.lock().unwrap().push(event);
        self.selector.wake()
    }

    fn submit(
        &self,
        handle: RawHandle,
        interest: Interest,
        kind: EventKind,
        mut attempt: impl FnMut() -> Result<Outcome> + Send + 'static,
        announce: impl FnOnce(Result<Outcome>) + Send + 'static,
    ) -> Result<()> {
        {
            let mut sockets = self.sockets.lock().unwrap();
            let Some(state) = sockets.get_mut(&handle) else {
                return Err(crate::invalid!("submit on an unattached handle"));
            };
            if state.phase != DetachPhase::Attached {
                return Err(Error::ConnectionDead);
            }
            state.inflight += 1;
        }
        let event = self.pool.lock().unwrap().acquire(kind, Some(handle));
        match attempt() {
            Ok(outcome) => {
                self.slots.lock().unwrap().insert(
                    event,
                    Slot::Resolved { handle, announce: Box::new(announce), outcome: Ok(outcome) },
                );
                self.ready.lock().unwrap().push(event);
                self.selector.wake()
            }
            Err(Error::WouldBlock) => {
                self.slots.lock().unwrap().insert(
                    event,
                    Slot::Retry { handle, interest, attempt: Box::new(attempt), announce: Box::new(announce) },
                );
                self.selector.reregister(handle, handle as u64, interest)
            }
            Err(e) => {
                self.slots.lock().unwrap().insert(
                    event,
                    Slot::Resolved { handle, announce: Box::new(announce), outcome: Err(e) },
                );
                self.ready.lock().unwrap().push(event);
                self.selector.wake()
            }
        }
    }

    pub fn submit_accept(
        &self,
        handle: RawHandle,
        mut attempt: impl FnMut() -> Result<RawHandle> + Send + 'static,
        announce: impl FnOnce(Result<RawHandle>) + Send + 'static,
    ) -> Result<()> {
        self.submit(
            handle,
            Interest::READABLE,
            EventKind::Accept { listener: handle },
            move || attempt().map(Outcome::Accepted),
            move |outcome| {
                announce(outcome.map(|o| match o {
                    Outcome::Accepted(h) => h,
                    _ => unreachable!("accept always resolves to Outcome::Accepted"),
                }))
            },
        )
    }

    pub fn submit_connect(
        &self,
        handle: RawHandle,
        target: std::net::SocketAddr,
        mut attempt: impl FnMut() -> Result<()> + Send + 'static,
        announce: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<()> {
        self.submit(
            handle,
            Interest::WRITABLE,
            EventKind::Connect { handle, target },
            move || attempt().map(|()| Outcome::Connected),
            move |outcome| {
                announce(outcome.map(|o| match o {
                    Outcome::Connected => (),
                    _ => unreachable!("connect always resolves to Outcome::Connected"),
                }))
            },
        )
    }

    pub fn submit_send(
        &self,
        handle: RawHandle,
        buf: Vec<u8>,
        mut attempt: impl FnMut() -> Result<usize> + Send + 'static,
        announce: impl FnOnce(Result<usize>) + Send + 'static,
    ) -> Result<()> {
        self.submit(
            handle,
            Interest::WRITABLE,
            EventKind::Send { handle, buf },
            move || attempt().map(Outcome::Sent),
            move |outcome| {
                announce(outcome.map(|o| match o {
                    Outcome::Sent(n) => n,
                    _ => unreachable!("send always resolves to Outcome::Sent"),
                }))
            },
        )
    }

    pub fn submit_receive(
        &self,
        handle: RawHandle,
        buf: Vec<u8>,
        want_address: bool,
        mut attempt: impl FnMut() -> Result<usize> + Send + 'static,
        announce: impl FnOnce(Result<usize>) + Send + 'static,
    ) -> Result<()> {
        self.submit(
            handle,
            Interest::READABLE,
            EventKind::Receive { handle, buf, want_address },
            move || attempt().map(Outcome::Received),
            move |outcome| {
                announce(outcome.map(|o| match o {
                    Outcome::Received(n) => n,
                    _ => unreachable!("receive always resolves to Outcome::Received"),
                }))
            },
        )
    }

    /// Cancels every pending operation on `handle`. Per §5, cancellation is
    /// silent: the stored `announce` is dropped without being invoked.
    pub fn cancel(&self, handle: RawHandle) {
        let mut slots = self.slots.lock().unwrap();
        let dead: Vec<EventHandle> = slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Retry { handle: h, .. } if *h == handle))
            .map(|(event, _)| *event)
            .collect();
        let count = dead.len();
        for event in dead {
            slots.remove(&event);
            self.pool.lock().unwrap().release(event);
        }
        drop(slots);
        if count > 0 {
            if let Some(state) = self.sockets.lock().unwrap().get_mut(&handle) {
                state.inflight = state.inflight.saturating_sub(count);
            }
            debug!("proactor: cancelled {count} operation(s) on handle {handle}");
            self.maybe_finish_detach(handle);
        }
    }

    /// Moves `handle` from Attached to Detaching. If no operations are in
    /// flight the detachment completes immediately; otherwise the last
    /// completion to observe Detaching drives the announcement.
    pub fn detach(&self, handle: RawHandle) {
        {
            let mut sockets = self.sockets.lock().unwrap();
            if let Some(state) = sockets.get_mut(&handle) {
                if state.phase == DetachPhase::Attached {
                    state.phase = DetachPhase::Detaching;
                }
            }
        }
        self.maybe_finish_detach(handle);
    }

    fn maybe_finish_detach(&self, handle: RawHandle) {
        let on_detach = {
            let mut sockets = self.sockets.lock().unwrap();
            let Some(state) = sockets.get_mut(&handle) else {
                return;
            };
            if state.phase == DetachPhase::Detaching && state.inflight == 0 {
                state.phase = DetachPhase::Detached;
                state.on_detach.take()
            } else {
                None
            }
        };
        if let Some(f) = on_detach {
            let _ = self.selector.deregister(handle);
            trace!("proactor: handle {handle} fully detached");
            f();
        }
    }

    /// One waiter-loop iteration: computes the chronology deadline, dequeues
    /// from the selector (or the synthetic ready queue) with that timeout,
    /// dispatches every completion, then drains the chronology up to its
    /// configured cycle budget. Returns the number of completions
    /// dispatched.
    pub fn wait(&self) -> Result<usize> {
        self.waiter_count.fetch_add(1, Ordering::SeqCst);
        let result = self.wait_inner();
        self.waiter_count.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn wait_inner(&self) -> Result<usize> {
        let deadline = self.chronology.next_deadline();
        let synthetic: Vec<EventHandle> = std::mem::take(&mut *self.ready.lock().unwrap());
        let mut dispatched = 0;
        for event in synthetic {
            if self.dispatch_resolved(event) {
                dispatched += 1;
            }
        }
        if dispatched == 0 {
            let timeout = deadline.or(Some(Duration::from_millis(50)));
            let mut events = Vec::new();
            self.selector.select(&mut events, timeout)?;
            for selector_event in events {
                if self.retry_for_handle(selector_event.token as RawHandle) {
                    dispatched += 1;
                }
            }
        }
        self.chronology.drain(self.config.chronology_budget);
        Ok(dispatched)
    }

    fn dispatch_resolved(&self, event: EventHandle) -> bool {
        let slot = self.slots.lock().unwrap().remove(&event);
        let Some(Slot::Resolved { handle, announce, outcome }) = slot else {
            return false;
        };
        self.pool.lock().unwrap().release(event);
        if handle != 0 {
            if let Some(state) = self.sockets.lock().unwrap().get_mut(&handle) {
                state.inflight = state.inflight.saturating_sub(1);
            }
        }
        announce(outcome);
        if handle != 0 {
            self.maybe_finish_detach(handle);
        }
        true
    }

    fn retry_for_handle(&self, handle: RawHandle) -> bool {
        let event = {
            let slots = self.slots.lock().unwrap();
            slots
                .iter()
                .find(|(_, slot)| matches!(slot, Slot::Retry { handle: h, .. } if *h == handle))
                .map(|(event, _)| *event)
        };
        let Some(event) = event else { return false };
        let slot = self.slots.lock().unwrap().remove(&event);
        let Some(Slot::Retry { handle, interest, mut attempt, announce }) = slot else {
            return false;
        };
        match attempt() {
            Ok(outcome) => {
                self.slots.lock().unwrap().insert(event, Slot::Resolved { handle, announce, outcome: Ok(outcome) });
                self.dispatch_resolved(event)
            }
            Err(Error::WouldBlock) => {
                self.slots.lock().unwrap().insert(event, Slot::Retry { handle, interest, attempt, announce });
                let _ = self.selector.reregister(handle, handle as u64, interest);
                false
            }
            Err(e) => {
                self.slots.lock().unwrap().insert(event, Slot::Resolved { handle, announce, outcome: Err(e) });
                self.dispatch_resolved(event)
            }
        }
    }

    /// Walks every attached socket and detaches it, draining pending
    /// operations first (so a kernel-prepared target handle for an
    /// in-flight accept is not leaked) under a short timeout, then silently
    /// cancels whatever is left.
    pub fn close_all(&self) {
        let handles: Vec<RawHandle> = self.sockets.lock().unwrap().keys().copied().collect();
        for handle in &handles {
            self.detach(*handle);
        }
        let deadline = std::time::Instant::now() + Duration::from_millis(200);
        while std::time::Instant::now() < deadline {
            let remaining = self.slots.lock().unwrap().len();
            if remaining == 0 {
                break;
            }
            let _ = self.wait();
        }
        for handle in handles {
            self.cancel(handle);
        }
        debug!("proactor: close_all complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::atomic::AtomicBool;

    /// A socket-backed [`EventKind::Callback`] needs a handle the real
    /// platform selector can register; a loopback listener's fd/SOCKET gives
    /// us one without depending on any particular fd number being free.
    fn test_handle() -> (TcpListener, RawHandle) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        #[cfg(unix)]
        let handle = {
            use std::os::unix::io::AsRawFd;
            listener.as_raw_fd() as RawHandle
        };
        #[cfg(windows)]
        let handle = {
            use std::os::windows::io::AsRawSocket;
            listener.as_raw_socket() as RawHandle
        };
        #[cfg(not(any(unix, windows)))]
        let handle = 1 as RawHandle;
        (listener, handle)
    }

    #[test]
    fn callback_event_runs_on_wait() {
        let engine = Engine::new(ProactorConfig::default()).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        engine.submit_callback(move || r.store(true, Ordering::SeqCst)).unwrap();
        let n = engine.wait().unwrap();
        assert_eq!(n, 1);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn detach_with_no_inflight_ops_completes_immediately() {
        let engine = Engine::new(ProactorConfig::default()).unwrap();
        let (_listener, handle) = test_handle();
        let done = Arc::new(AtomicBool::new(false));
        let d = done.clone();
        engine.attach(handle, move || d.store(true, Ordering::SeqCst)).unwrap();
        engine.detach(handle);
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn detach_waits_for_inflight_operation_to_finish() {
        let engine = Engine::new(ProactorConfig::default()).unwrap();
        let (_listener, handle) = test_handle();
        let done = Arc::new(AtomicBool::new(false));
        let d = done.clone();
        engine.attach(handle, move || d.store(true, Ordering::SeqCst)).unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        engine
            .submit_send(
                handle,
                vec![1, 2, 3],
                move || {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(Error::WouldBlock)
                },
                |_| {},
            )
            .unwrap();
        engine.detach(handle);
        assert!(!done.load(Ordering::SeqCst));
        engine.cancel(handle);
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn cancel_does_not_invoke_announce() {
        let engine = Engine::new(ProactorConfig::default()).unwrap();
        let (_listener, handle) = test_handle();
        engine.attach(handle, || {}).unwrap();
        let announced = Arc::new(AtomicBool::new(false));
        let a = announced.clone();
        engine
            .submit_send(handle, vec![1], || Err(Error::WouldBlock), move |_| a.store(true, Ordering::SeqCst))
            .unwrap();
        engine.cancel(handle);
        assert!(!announced.load(Ordering::SeqCst));
    }

    #[test]
    fn synchronous_completion_dispatches_on_next_wait() {
        let engine = Engine::new(ProactorConfig::default()).unwrap();
        let (_listener, handle) = test_handle();
        engine.attach(handle, || {}).unwrap();
        let sent = Arc::new(Mutex::new(None));
        let s = sent.clone();
        engine
            .submit_send(handle, vec![1, 2, 3], || Ok(3), move |r| *s.lock().unwrap() = Some(r))
            .unwrap();
        engine.wait().unwrap();
        assert_eq!(sent.lock().unwrap().as_ref().unwrap().as_ref().ok(), Some(&3));
    }
}
