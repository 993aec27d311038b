//! Bounded FIFO of shared packets with watermarks, per §4.3.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{Error, Result};

use super::packet::Packet;

struct State {
    items: VecDeque<Arc<Packet>>,
    total_cost: usize,
    low: usize,
    high: usize,
    shutdown: bool,
}

/// A bounded FIFO of shared packets, accounted by [`Packet::cost`] rather
/// than item count.
pub struct PacketQueue {
    state: Mutex<State>,
    allow_enqueue: Condvar,
    allow_dequeue: Condvar,
}

impl PacketQueue {
    pub fn new(low: usize, high: usize) -> PacketQueue {
        PacketQueue {
            state: Mutex::new(State {
                items: VecDeque::new(),
                total_cost: 0,
                low,
                high,
                shutdown: false,
            }),
            allow_enqueue: Condvar::new(),
            allow_dequeue: Condvar::new(),
        }
    }

    pub fn enqueue(&self, packet: Arc<Packet>, blocking: bool) -> Result<()> {
        self.enqueue_with_observer(packet, blocking, |_| {})
    }

    /// As [`PacketQueue::enqueue`], but runs `observer` under the queue's
    /// lock immediately before the packet is appended — used by
    /// `Session::send` to synchronize a timestamp notification with the
    /// enqueue it accompanies.
    pub fn enqueue_with_observer(
        &self,
        packet: Arc<Packet>,
        blocking: bool,
        observer: impl FnOnce(&Arc<Packet>),
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.shutdown {
                return Err(Error::ConnectionDead);
            }
            if state.total_cost < state.high {
                break;
            }
            if !blocking {
                return Err(Error::WouldBlock);
            }
            state = self.allow_enqueue.wait(state).unwrap();
        }
        let was_below_low = state.total_cost < state.low;
        observer(&packet);
        state.total_cost += packet.cost();
        state.items.push_back(packet);
        if was_below_low && state.total_cost >= state.low {
            self.allow_dequeue.notify_all();
        }
        Ok(())
    }

    pub fn dequeue(&self, blocking: bool) -> Result<Arc<Packet>> {
        let mut state = self.state.lock().unwrap();
        loop {
            let below_low = state.items.is_empty() || state.total_cost < state.low;
            if !state.shutdown && below_low {
                if !blocking {
                    return Err(Error::WouldBlock);
                }
                state = self.allow_dequeue.wait(state).unwrap();
                continue;
            }
            if let Some(packet) = state.items.pop_front() {
                let was_at_high = state.total_cost >= state.high;
                state.total_cost -= packet.cost();
                if was_at_high && state.total_cost < state.high {
                    self.allow_enqueue.notify_all();
                }
                return Ok(packet);
            }
            return Err(Error::Eof);
        }
    }

    /// Non-destructively inspects the front packet, per the open question
    /// in §9: exposed for parity with the source, rarely needed by callers.
    pub fn peek(&self) -> Option<Arc<Packet>> {
        self.state.lock().unwrap().items.front().cloned()
    }

    /// Re-inserts a single packet at the front, preserving total-cost
    /// accounting.
    pub fn retry(&self, packet: Arc<Packet>) {
        let mut state = self.state.lock().unwrap();
        let was_below_low = state.total_cost < state.low;
        state.total_cost += packet.cost();
        state.items.push_front(packet);
        if was_below_low && state.total_cost >= state.low {
            self.allow_dequeue.notify_all();
        }
    }

    /// Re-inserts a batch at the front in their original order.
    pub fn retry_batch(&self, packets: Vec<Arc<Packet>>) {
        let mut state = self.state.lock().unwrap();
        let was_below_low = state.total_cost < state.low;
        for packet in packets.into_iter().rev() {
            state.total_cost += packet.cost();
            state.items.push_front(packet);
        }
        if was_below_low && state.total_cost >= state.low {
            self.allow_dequeue.notify_all();
        }
    }

    pub fn set_low_watermark(&self, low: usize) {
        let mut state = self.state.lock().unwrap();
        state.low = low;
        self.allow_dequeue.notify_all();
    }

    pub fn set_high_watermark(&self, high: usize) {
        let mut state = self.state.lock().unwrap();
        state.high = high;
        self.allow_enqueue.notify_all();
    }

    pub fn total_size(&self) -> usize {
        self.state.lock().unwrap().total_cost
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().items.is_empty()
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().unwrap().shutdown
    }

    /// Disables further enqueues immediately and wakes every waiter so
    /// blocked dequeuers observe EOF once drained.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutdown = true;
        self.allow_enqueue.notify_all();
        self.allow_dequeue.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::binding::Endpoint;
    use crate::net::packet::{AddressFamily, Packet, Transport, TransportKind};

    fn push(cost: usize) -> Arc<Packet> {
        Arc::new(
            Packet::push(
                Transport {
                    kind: TransportKind::Stream,
                    family: AddressFamily::Ipv4,
                },
                Endpoint::Undefined,
                Endpoint::Undefined,
                vec![0u8; cost],
            )
            .unwrap(),
        )
    }

    #[test]
    fn backpressure_scenario() {
        let q = PacketQueue::new(1, 10);
        for _ in 0..10 {
            q.enqueue(push(1), false).unwrap();
        }
        assert!(matches!(q.enqueue(push(1), false), Err(Error::WouldBlock)));
        assert_eq!(q.total_size(), 10);
        q.dequeue(false).unwrap();
        assert_eq!(q.total_size(), 9);
        q.enqueue(push(1), false).unwrap();
    }

    #[test]
    fn dequeue_below_low_watermark_would_block_non_blocking() {
        let q = PacketQueue::new(5, 10);
        q.enqueue(push(1), false).unwrap();
        assert!(matches!(q.dequeue(false), Err(Error::WouldBlock)));
    }

    #[test]
    fn shutdown_then_enqueue_is_connection_dead() {
        let q = PacketQueue::new(1, 10);
        q.shutdown();
        assert!(matches!(q.enqueue(push(1), false), Err(Error::ConnectionDead)));
    }

    #[test]
    fn shutdown_then_drained_dequeue_is_eof() {
        let q = PacketQueue::new(1, 10);
        q.enqueue(push(1), false).unwrap();
        q.shutdown();
        q.dequeue(false).unwrap();
        assert!(matches!(q.dequeue(false), Err(Error::Eof)));
    }

    #[test]
    fn retry_batch_preserves_original_order() {
        let q = PacketQueue::new(1, 10);
        let a = push(1);
        let b = push(1);
        q.retry_batch(vec![a.clone(), b.clone()]);
        let first = q.dequeue(false).unwrap();
        assert!(Arc::ptr_eq(&first, &a));
    }
}
