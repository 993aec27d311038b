//! Immutable-after-build packet records, per §3 Data model.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::time::Instant;

use crate::error::{Error, Result};

use super::binding::Endpoint;
use super::session::Session;

/// Maximum transfer unit: the largest payload a single packet may carry.
pub const MTU: usize = 65536;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketType {
    Undefined,
    Connect,
    Push,
    Shutdown,
    Reset,
    Error,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Stream,
    Datagram,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
    Local,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Transport {
    pub kind: TransportKind,
    pub family: AddressFamily,
}

static NEXT_PACKET_ID: AtomicU64 = AtomicU64::new(1);

fn next_packet_id() -> u64 {
    NEXT_PACKET_ID.fetch_add(1, Ordering::Relaxed)
}

/// A unit of data moved between two sessions. Built once via
/// [`Packet::push`] or [`Packet::control`] and never mutated afterwards,
/// other than the payload trimming `Session::receive` performs when it
/// re-inserts a partially-consumed packet at the front of a queue (which
/// constructs a fresh, shorter `Packet` rather than mutating this one).
pub struct Packet {
    kind: PacketType,
    transport: Transport,
    source: Endpoint,
    remote: Endpoint,
    source_session: Option<Weak<Session>>,
    remote_session: Option<Weak<Session>>,
    payload: Vec<u8>,
    timestamp: Option<Instant>,
    id: Option<u64>,
}

impl Packet {
    /// Builds a PUSH packet. Fails if the payload is empty or exceeds the
    /// MTU, per the PUSH invariant in §3.
    pub fn push(transport: Transport, source: Endpoint, remote: Endpoint, payload: Vec<u8>) -> Result<Packet> {
        if payload.is_empty() {
            return Err(crate::invalid!("PUSH packet must carry a non-empty payload"));
        }
        if payload.len() > MTU {
            return Err(crate::invalid!("payload of {} bytes exceeds the {MTU}-byte MTU", payload.len()));
        }
        Ok(Packet {
            kind: PacketType::Push,
            transport,
            source,
            remote,
            source_session: None,
            remote_session: None,
            payload,
            timestamp: None,
            id: None,
        })
    }

    /// Builds a control packet (Connect, Shutdown, Reset, Error, or
    /// Undefined) carrying no payload.
    pub fn control(kind: PacketType, transport: Transport, source: Endpoint, remote: Endpoint) -> Packet {
        debug_assert_ne!(kind, PacketType::Push, "control() does not build PUSH packets");
        Packet {
            kind,
            transport,
            source,
            remote,
            source_session: None,
            remote_session: None,
            payload: Vec::new(),
            timestamp: None,
            id: None,
        }
    }

    pub fn with_source_session(mut self, session: Weak<Session>) -> Packet {
        self.source_session = Some(session);
        self
    }

    pub fn with_remote_session(mut self, session: Weak<Session>) -> Packet {
        self.remote_session = Some(session);
        self
    }

    pub fn with_timestamp(mut self, timestamp: Instant) -> Packet {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_fresh_id(mut self) -> Packet {
        self.id = Some(next_packet_id());
        self
    }

    /// Returns a new packet with `payload[consumed..]`, preserving every
    /// other field, for when a receiver only partially drains this packet.
    pub fn with_payload_tail(&self, consumed: usize) -> Packet {
        Packet {
            kind: self.kind,
            transport: self.transport,
            source: self.source.clone(),
            remote: self.remote.clone(),
            source_session: self.source_session.clone(),
            remote_session: self.remote_session.clone(),
            payload: self.payload[consumed..].to_vec(),
            timestamp: self.timestamp,
            id: self.id,
        }
    }

    pub fn kind(&self) -> PacketType {
        self.kind
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn source(&self) -> &Endpoint {
        &self.source
    }

    pub fn remote(&self) -> &Endpoint {
        &self.remote
    }

    pub fn source_session(&self) -> Option<&Weak<Session>> {
        self.source_session.as_ref()
    }

    pub fn remote_session(&self) -> Option<&Weak<Session>> {
        self.remote_session.as_ref()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn timestamp(&self) -> Option<Instant> {
        self.timestamp
    }

    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// The unit by which packet queues account capacity: payload length for
    /// PUSH, 1 otherwise.
    pub fn cost(&self) -> usize {
        match self.kind {
            PacketType::Push => self.payload.len(),
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> Transport {
        Transport {
            kind: TransportKind::Stream,
            family: AddressFamily::Ipv4,
        }
    }

    #[test]
    fn push_rejects_empty_payload() {
        assert!(Packet::push(transport(), Endpoint::Undefined, Endpoint::Undefined, Vec::new()).is_err());
    }

    #[test]
    fn push_rejects_oversized_payload() {
        let payload = vec![0u8; MTU + 1];
        assert!(Packet::push(transport(), Endpoint::Undefined, Endpoint::Undefined, payload).is_err());
    }

    #[test]
    fn cost_is_payload_length_for_push_and_one_otherwise() {
        let p = Packet::push(transport(), Endpoint::Undefined, Endpoint::Undefined, vec![1, 2, 3]).unwrap();
        assert_eq!(p.cost(), 3);
        let c = Packet::control(PacketType::Shutdown, transport(), Endpoint::Undefined, Endpoint::Undefined);
        assert_eq!(c.cost(), 1);
    }

    #[test]
    fn payload_tail_trims_from_the_front() {
        let p = Packet::push(transport(), Endpoint::Undefined, Endpoint::Undefined, vec![1, 2, 3, 4]).unwrap();
        let tail = p.with_payload_tail(2);
        assert_eq!(tail.payload(), &[3, 4]);
    }
}
