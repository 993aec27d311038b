//! Pooled completion events, per §4.7 Submit.
//!
//! Mirrors the teacher's slot-recycling slab: a `Vec` of slots plus a free
//! list, so steady-state submission never allocates once the pool has grown
//! to its working set.

use std::net::SocketAddr;

/// What kind of I/O operation a submitted event represents, and the
/// operation-specific fields §4.7 Submit says get filled in.
pub enum EventKind {
    /// Carries no socket; runs `f` and is done.
    Callback(Box<dyn FnOnce() + Send>),
    /// Accept: the listening handle an incoming connection is accepted on.
    Accept { listener: RawHandle },
    /// Connect: the handle the connect was issued on and the target address.
    Connect { handle: RawHandle, target: SocketAddr },
    /// Send: the handle and the bytes still to be written.
    Send { handle: RawHandle, buf: Vec<u8> },
    /// Receive: the handle, the destination buffer, and whether the caller
    /// wants the remote endpoint decoded (§4.7 Completion dispatch).
    Receive { handle: RawHandle, buf: Vec<u8>, want_address: bool },
}

/// A raw OS handle: an fd on Unix, a SOCKET/HANDLE value on Windows. Kept as
/// a plain integer so the event pool and chronology stay platform-neutral;
/// the `sys` backend is the only code that casts it back to a native type.
pub type RawHandle = i64;

/// A pooled request token. Built by [`EventPool::acquire`], submitted to the
/// engine, and returned to the pool by [`EventPool::release`] once its
/// completion has been dispatched.
pub struct Event {
    pub(crate) slot: usize,
    pub(crate) generation: u64,
    pub kind: EventKind,
    pub socket: Option<RawHandle>,
}

enum Slot {
    Occupied(Event),
    Free(usize),
}

/// Recycles [`Event`] allocations up to `capacity` slots; submissions past
/// that grow the pool rather than failing, per the config docs ("recycled
/// rather than reallocated once this many are in flight").
pub struct EventPool {
    slots: Vec<Slot>,
    next_free: usize,
    generation: u64,
}

const NO_FREE: usize = usize::MAX;

impl EventPool {
    pub fn new(capacity: usize) -> EventPool {
        EventPool {
            slots: Vec::with_capacity(capacity),
            next_free: NO_FREE,
            generation: 0,
        }
    }

    /// Hands out a fresh event for `kind`, reusing a recycled slot when one
    /// is available.
    pub fn acquire(&mut self, kind: EventKind, socket: Option<RawHandle>) -> EventHandle {
        self.generation += 1;
        let generation = self.generation;
        if self.next_free != NO_FREE {
            let slot = self.next_free;
            let Slot::Free(next) = self.slots[slot] else {
                unreachable!("free list points at an occupied slot");
            };
            self.next_free = next;
            self.slots[slot] = Slot::Occupied(Event { slot, generation, kind, socket });
            return EventHandle { slot, generation };
        }
        let slot = self.slots.len();
        self.slots.push(Slot::Occupied(Event { slot, generation, kind, socket }));
        EventHandle { slot, generation }
    }

    pub fn get(&self, handle: EventHandle) -> Option<&Event> {
        match self.slots.get(handle.slot) {
            Some(Slot::Occupied(event)) if event.generation == handle.generation => Some(event),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: EventHandle) -> Option<&mut Event> {
        match self.slots.get_mut(handle.slot) {
            Some(Slot::Occupied(event)) if event.generation == handle.generation => Some(event),
            _ => None,
        }
    }

    /// Returns the event at `handle` to the pool, invalidating every other
    /// [`EventHandle`] that pointed at the same slot.
    pub fn release(&mut self, handle: EventHandle) -> Option<Event> {
        match self.slots.get(handle.slot) {
            Some(Slot::Occupied(event)) if event.generation == handle.generation => {}
            _ => return None,
        }
        let freed = std::mem::replace(&mut self.slots[handle.slot], Slot::Free(self.next_free));
        self.next_free = handle.slot;
        match freed {
            Slot::Occupied(event) => Some(event),
            Slot::Free(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Occupied(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A generation-checked reference into an [`EventPool`], cheap to copy and
/// pass through an OS completion token (e.g. an overlapped pointer or an
/// epoll `u64` data word).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventHandle {
    pub slot: usize,
    pub generation: u64,
}
