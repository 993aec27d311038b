//! A simulated socket, per §3/§4.4.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::trace;

use crate::config::MachineConfig;
use crate::error::{Error, Result};

use super::machine::Machine;
use super::monitor::{Interest, Monitor};
use super::packet::{Packet, PacketType, Transport, TransportKind, MTU};
use super::packet_queue::PacketQueue;
use super::binding::Endpoint;

/// A sticky per-session error code, surfaced on the next application call
/// after the machine's step observes a dead or refusing peer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionError {
    ConnectionDead,
    ConnectionRefused,
    Reset,
}

impl SessionError {
    fn to_error(self) -> Error {
        match self {
            SessionError::ConnectionDead => Error::ConnectionDead,
            SessionError::ConnectionRefused => Error::ConnectionRefused,
            SessionError::Reset => Error::ConnectionDead,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShutdownDirection {
    Send,
    Receive,
    Both,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum NotificationKind {
    Scheduled,
    Sent,
    Acknowledged,
}

#[derive(Copy, Clone, Debug)]
struct Notification {
    kind: NotificationKind,
    id: u64,
}

/// Send/receive buffer sizes and the per-session behavioral switches listed
/// in §3. Buffer sizes double as packet-queue high watermarks.
#[derive(Copy, Clone, Debug)]
pub struct SocketOptions {
    pub send_buffer: usize,
    pub recv_buffer: usize,
    pub timestamp_outgoing: bool,
    pub timestamp_incoming: bool,
    pub linger: Option<Duration>,
    pub reuse_address: bool,
    pub keep_alive: bool,
    pub cork: bool,
    pub delay_transmission: bool,
    pub delay_acknowledgment: bool,
    pub broadcast: bool,
    pub bypass_routing: bool,
    pub inline_out_of_band: bool,
}

impl SocketOptions {
    fn from_config(config: &MachineConfig) -> SocketOptions {
        SocketOptions {
            send_buffer: config.send_buffer,
            recv_buffer: config.recv_buffer,
            timestamp_outgoing: false,
            timestamp_incoming: false,
            linger: None,
            reuse_address: false,
            keep_alive: false,
            cork: false,
            delay_transmission: false,
            delay_acknowledgment: false,
            broadcast: false,
            bypass_routing: false,
            inline_out_of_band: false,
        }
    }
}

static NEXT_NOTIFICATION_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

pub struct Session {
    machine: Weak<Machine>,
    handle: u32,
    transport: Transport,
    source: Mutex<Endpoint>,
    remote: Mutex<Endpoint>,
    blocking: AtomicBool,
    listening: AtomicBool,
    connected: AtomicBool,
    backlog: Mutex<usize>,
    options: Mutex<SocketOptions>,
    error: Mutex<Option<SessionError>>,
    pub(crate) outgoing: PacketQueue,
    pub(crate) incoming: PacketQueue,
    notifications: Mutex<VecDeque<Notification>>,
    accept_queue: Mutex<VecDeque<Arc<Session>>>,
    peer: Mutex<Option<Weak<Session>>>,
    monitor: Mutex<Option<Weak<Monitor>>>,
    readable: AtomicBool,
    writable: AtomicBool,
    has_error: AtomicBool,
    has_notification: AtomicBool,
}

impl Session {
    /// Constructs an already-open session (handle assigned) bound to no
    /// endpoint yet. Only [`Machine::open`] calls this, since handle
    /// assignment is the machine's responsibility.
    pub(crate) fn new(machine: Weak<Machine>, handle: u32, transport: Transport, config: &MachineConfig) -> Arc<Session> {
        Arc::new(Session {
            machine,
            handle,
            transport,
            source: Mutex::new(Endpoint::Undefined),
            remote: Mutex::new(Endpoint::Undefined),
            blocking: AtomicBool::new(true),
            listening: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            backlog: Mutex::new(config.backlog),
            options: Mutex::new(SocketOptions::from_config(config)),
            error: Mutex::new(None),
            outgoing: PacketQueue::new(config.low_watermark, config.send_buffer),
            incoming: PacketQueue::new(config.low_watermark, config.recv_buffer),
            notifications: Mutex::new(VecDeque::new()),
            accept_queue: Mutex::new(VecDeque::new()),
            peer: Mutex::new(None),
            monitor: Mutex::new(None),
            readable: AtomicBool::new(false),
            writable: AtomicBool::new(true),
            has_error: AtomicBool::new(false),
            has_notification: AtomicBool::new(false),
        })
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking.load(Ordering::SeqCst)
    }

    pub fn set_blocking(&self, value: bool) {
        self.blocking.store(value, Ordering::SeqCst);
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub(crate) fn set_listening(&self, backlog: usize) {
        self.listening.store(true, Ordering::SeqCst);
        *self.backlog.lock().unwrap() = backlog;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn set_connected(&self, value: bool) {
        self.connected.store(value, Ordering::SeqCst);
    }

    pub fn source(&self) -> Endpoint {
        self.source.lock().unwrap().clone()
    }

    pub(crate) fn set_source(&self, endpoint: Endpoint) {
        *self.source.lock().unwrap() = endpoint;
    }

    pub fn remote(&self) -> Endpoint {
        self.remote.lock().unwrap().clone()
    }

    pub(crate) fn set_remote(&self, endpoint: Endpoint) {
        *self.remote.lock().unwrap() = endpoint;
    }

    pub fn peer(&self) -> Option<Weak<Session>> {
        self.peer.lock().unwrap().clone()
    }

    pub(crate) fn set_peer(&self, peer: Weak<Session>) {
        *self.peer.lock().unwrap() = Some(peer);
    }

    pub fn options(&self) -> SocketOptions {
        *self.options.lock().unwrap()
    }

    pub fn set_options(&self, f: impl FnOnce(&mut SocketOptions)) {
        f(&mut self.options.lock().unwrap());
    }

    pub fn backlog(&self) -> usize {
        *self.backlog.lock().unwrap()
    }

    pub(crate) fn set_error(&self, error: SessionError) {
        *self.error.lock().unwrap() = Some(error);
        self.update();
    }

    fn sticky_error(&self) -> Option<Error> {
        self.error.lock().unwrap().map(SessionError::to_error)
    }

    pub(crate) fn register_monitor(&self, monitor: Weak<Monitor>) {
        *self.monitor.lock().unwrap() = Some(monitor);
    }

    pub(crate) fn deregister_monitor(&self) -> Option<Weak<Monitor>> {
        self.monitor.lock().unwrap().take()
    }

    pub(crate) fn push_accepted(&self, session: Arc<Session>) {
        self.accept_queue.lock().unwrap().push_back(session);
        self.update();
    }

    /// Pops the next accepted mirror session created by a peer's `connect`.
    pub fn accept(&self, blocking: bool) -> Result<Arc<Session>> {
        loop {
            if let Some(session) = self.accept_queue.lock().unwrap().pop_front() {
                self.update();
                return Ok(session);
            }
            if !blocking {
                return Err(Error::WouldBlock);
            }
            std::thread::yield_now();
        }
    }

    fn push_notification(&self, kind: NotificationKind) {
        let id = NEXT_NOTIFICATION_ID.fetch_add(1, Ordering::Relaxed);
        self.notifications.lock().unwrap().push_back(Notification { kind, id });
        self.update();
    }

    /// Drains all pending timestamp notifications accumulated since the
    /// last call.
    pub fn drain_notifications(&self) -> usize {
        let mut notifications = self.notifications.lock().unwrap();
        let n = notifications.len();
        notifications.clear();
        n
    }

    /// Recomputes readable/writable/error/notification and, if registered,
    /// flips this session's monitor registration, then asks the machine to
    /// schedule a step.
    pub(crate) fn update(&self) {
        let readable = !self.incoming.is_empty() || !self.accept_queue.lock().unwrap().is_empty();
        let writable = self.outgoing.total_size() < self.options().send_buffer;
        let has_error = self.error.lock().unwrap().is_some();
        let has_notification = !self.notifications.lock().unwrap().is_empty();
        self.readable.store(readable, Ordering::SeqCst);
        self.writable.store(writable, Ordering::SeqCst);
        self.has_error.store(has_error, Ordering::SeqCst);
        self.has_notification.store(has_notification, Ordering::SeqCst);
        if let Some(monitor) = self.monitor.lock().unwrap().as_ref().and_then(Weak::upgrade) {
            monitor.refresh(self.handle);
        }
        if let Some(machine) = self.machine.upgrade() {
            machine.schedule_step();
        }
    }

    pub fn readiness(&self) -> Interest {
        Interest {
            readable: self.readable.load(Ordering::SeqCst),
            writable: self.writable.load(Ordering::SeqCst),
            error: self.has_error.load(Ordering::SeqCst),
            notification: self.has_notification.load(Ordering::SeqCst),
            one_shot: false,
        }
    }

    /// Sends `payload`. Datagrams become a single PUSH packet; streams are
    /// chunked into MTU-bounded PUSH packets. See §4.4 Send.
    pub fn send(&self, payload: &[u8], blocking: bool) -> Result<usize> {
        if let Some(error) = self.sticky_error() {
            return Err(error);
        }
        match self.transport.kind {
            TransportKind::Datagram => {
                let remote = self.remote();
                if !remote.is_defined() {
                    return Err(crate::invalid!("datagram session has no connected remote for send"));
                }
                let packet = Arc::new(Packet::push(self.transport, self.source(), remote, payload.to_vec())?.with_fresh_id());
                let timestamp_outgoing = self.options().timestamp_outgoing;
                if timestamp_outgoing {
                    self.outgoing
                        .enqueue_with_observer(packet, blocking, |_| self.push_notification(NotificationKind::Scheduled))?;
                } else {
                    self.outgoing.enqueue(packet, blocking)?;
                }
                self.update();
                Ok(payload.len())
            }
            TransportKind::Stream => {
                if !self.is_connected() {
                    return Err(crate::invalid!("stream session is not connected"));
                }
                let remote = self.remote();
                let peer = self.peer();
                let mut sent = 0;
                for chunk in payload.chunks(MTU) {
                    let mut packet =
                        Packet::push(self.transport, self.source(), remote.clone(), chunk.to_vec())?.with_fresh_id();
                    if let Some(peer) = peer.clone() {
                        packet = packet.with_remote_session(peer);
                    }
                    let packet = Arc::new(packet);
                    match self.outgoing.enqueue(packet, blocking) {
                        Ok(()) => sent += chunk.len(),
                        Err(Error::WouldBlock) if sent > 0 => break,
                        Err(e) => return Err(e),
                    }
                }
                self.update();
                Ok(sent)
            }
        }
    }

    /// Receives into `buf`. PUSH packets are copied (re-inserting any
    /// unconsumed tail at the front); a SHUTDOWN packet shuts down the
    /// incoming queue and yields EOF. A datagram session with a connected
    /// remote discards any packet whose source doesn't match it, so a
    /// socket bound to one conversation doesn't hand the caller a stray
    /// packet from another. See §4.4 Receive.
    pub fn receive(&self, buf: &mut [u8], blocking: bool) -> Result<usize> {
        if let Some(error) = self.sticky_error() {
            return Err(error);
        }
        loop {
            let packet = self.incoming.dequeue(blocking)?;
            if self.transport.kind == TransportKind::Datagram && packet.kind() == PacketType::Push {
                let remote = self.remote();
                if remote.is_defined() && packet.source() != &remote {
                    trace!("session {} dropped a datagram from an unmatched remote", self.handle);
                    continue;
                }
            }
            match packet.kind() {
                PacketType::Push => {
                    let n = packet.payload().len().min(buf.len());
                    buf[..n].copy_from_slice(&packet.payload()[..n]);
                    if n < packet.payload().len() {
                        self.incoming.retry(Arc::new(packet.with_payload_tail(n)));
                    }
                    if self.options().timestamp_incoming {
                        if let Some(peer) = self.peer().and_then(|w| w.upgrade()) {
                            peer.push_notification(NotificationKind::Acknowledged);
                        }
                    }
                    self.update();
                    return Ok(n);
                }
                PacketType::Shutdown => {
                    self.incoming.shutdown();
                    self.update();
                    return Err(Error::Eof);
                }
                _ => return Err(crate::invalid!("unexpected packet type on incoming queue")),
            }
        }
    }

    /// Disables further send and/or receive. A send shutdown on a stream
    /// enqueues a SHUTDOWN packet to the peer.
    pub fn shutdown(&self, direction: ShutdownDirection) {
        if matches!(direction, ShutdownDirection::Send | ShutdownDirection::Both) {
            // Queue the SHUTDOWN control packet behind whatever PUSH packets
            // are already outstanding so the peer observes it in order, then
            // close the queue to further sends.
            if self.transport.kind == TransportKind::Stream && self.is_connected() {
                let mut packet = Packet::control(PacketType::Shutdown, self.transport, self.source(), self.remote());
                if let Some(peer) = self.peer() {
                    packet = packet.with_remote_session(peer);
                }
                let _ = self.outgoing.enqueue(Arc::new(packet), false);
            }
            self.outgoing.shutdown();
        }
        if matches!(direction, ShutdownDirection::Receive | ShutdownDirection::Both) {
            self.incoming.shutdown();
        }
        self.update();
        trace!("session {} shutdown({direction:?})", self.handle);
    }

    /// Tears down this session's queues and monitor registration. Endpoint
    /// and handle release are the machine's responsibility, since it owns
    /// those indices.
    pub(crate) fn close(&self) {
        self.outgoing.shutdown();
        self.incoming.shutdown();
        if let Some(monitor) = self.deregister_monitor().and_then(|w| w.upgrade()) {
            monitor.deregister(self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::machine::Machine;
    use crate::net::packet::AddressFamily;

    fn transport() -> Transport {
        Transport {
            kind: TransportKind::Stream,
            family: AddressFamily::Ipv4,
        }
    }

    #[test]
    fn fresh_session_is_writable_and_not_readable() {
        let machine = Machine::new(crate::config::MachineConfig::default());
        let session = machine.open(transport()).unwrap();
        let r = session.readiness();
        assert!(!r.readable);
        assert!(r.writable);
    }

    #[test]
    fn send_without_connection_is_invalid() {
        let machine = Machine::new(crate::config::MachineConfig::default());
        let session = machine.open(transport()).unwrap();
        assert!(session.send(b"hi", false).is_err());
    }

    fn datagram() -> Transport {
        Transport {
            kind: TransportKind::Datagram,
            family: AddressFamily::Ipv4,
        }
    }

    #[test]
    fn receive_filters_datagrams_by_connected_remote() {
        use std::net::{IpAddr, Ipv4Addr};

        let machine = Machine::new(crate::config::MachineConfig::default());
        let session = machine.open(datagram()).unwrap();
        let wanted = Endpoint::Ip(IpAddr::V4(Ipv4Addr::LOCALHOST), 9001);
        let other = Endpoint::Ip(IpAddr::V4(Ipv4Addr::LOCALHOST), 9002);
        session.set_remote(wanted.clone());

        let stray = Packet::push(datagram(), other, Endpoint::Undefined, vec![1]).unwrap();
        let wanted_packet = Packet::push(datagram(), wanted, Endpoint::Undefined, vec![2]).unwrap();
        session.incoming.enqueue(Arc::new(stray), false).unwrap();
        session.incoming.enqueue(Arc::new(wanted_packet), false).unwrap();

        let mut buf = [0u8; 4];
        let n = session.receive(&mut buf, false).unwrap();
        assert_eq!(&buf[..n], &[2]);
        assert!(matches!(session.receive(&mut buf, false), Err(Error::WouldBlock)));
    }
}
