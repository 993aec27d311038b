//! The in-memory simulation root, per §3/§4.6.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, trace};

use crate::config::MachineConfig;
use crate::error::{Error, Result};

use super::binding::Endpoint;
use super::packet::{AddressFamily, Packet, PacketType, Transport, TransportKind};
use super::session::{Session, SessionError};

type SourceKey = (TransportKind, Endpoint);
type BindingKey = (TransportKind, Endpoint, Endpoint);

struct Indices {
    by_handle: HashMap<u32, Arc<Session>>,
    by_source: HashMap<SourceKey, Weak<Session>>,
    by_binding: HashMap<BindingKey, Weak<Session>>,
}

/// The root container for the in-memory networking simulation: name, local
/// addresses, port maps, session indices, and a background step thread.
pub struct Machine {
    name: String,
    local_addresses: Vec<IpAddr>,
    config: MachineConfig,
    tcp_ports: super::port_map::PortMap,
    udp_ports: super::port_map::PortMap,
    indices: Mutex<Indices>,
    needs_update: Mutex<bool>,
    wake: Condvar,
    running: AtomicBool,
    step_thread: Mutex<Option<JoinHandle<()>>>,
    retry: Mutex<HashMap<u32, Vec<Arc<Packet>>>>,
}

static DEFAULT_MACHINE: OnceLock<Arc<Machine>> = OnceLock::new();

impl Machine {
    pub fn new(config: MachineConfig) -> Arc<Machine> {
        Machine::named("machine", config)
    }

    pub fn named(name: impl Into<String>, config: MachineConfig) -> Arc<Machine> {
        let machine = Arc::new(Machine {
            name: name.into(),
            local_addresses: vec![
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(Ipv6Addr::LOCALHOST),
            ],
            config,
            tcp_ports: super::port_map::PortMap::new(),
            udp_ports: super::port_map::PortMap::new(),
            indices: Mutex::new(Indices {
                by_handle: HashMap::new(),
                by_source: HashMap::new(),
                by_binding: HashMap::new(),
            }),
            needs_update: Mutex::new(false),
            wake: Condvar::new(),
            running: AtomicBool::new(true),
            step_thread: Mutex::new(None),
            retry: Mutex::new(HashMap::new()),
        });
        let weak = Arc::downgrade(&machine);
        let handle = std::thread::spawn(move || Machine::run_step_loop(weak));
        *machine.step_thread.lock().unwrap() = Some(handle);
        machine
    }

    /// A process-wide convenience instance. Tests should construct their
    /// own [`Machine::new`] to run in parallel, per the design notes.
    pub fn shared() -> Arc<Machine> {
        DEFAULT_MACHINE
            .get_or_init(|| Machine::new(MachineConfig::default()))
            .clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addresses(&self) -> &[IpAddr] {
        &self.local_addresses
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    fn run_step_loop(weak: Weak<Machine>) {
        loop {
            let machine = match weak.upgrade() {
                Some(m) => m,
                None => return,
            };
            if !machine.running.load(Ordering::SeqCst) {
                return;
            }
            {
                let mut needs_update = machine.needs_update.lock().unwrap();
                while !*needs_update && machine.running.load(Ordering::SeqCst) {
                    let (guard, timeout) = machine.wake.wait_timeout(needs_update, Duration::from_millis(50)).unwrap();
                    needs_update = guard;
                    if timeout.timed_out() {
                        break;
                    }
                }
                *needs_update = false;
            }
            if !machine.running.load(Ordering::SeqCst) {
                return;
            }
            drop(machine); // the Arc is re-acquired on the next loop iteration via `weak`
            let machine = match weak.upgrade() {
                Some(m) => m,
                None => return,
            };
            machine.step_once();
        }
    }

    pub(crate) fn schedule_step(&self) {
        *self.needs_update.lock().unwrap() = true;
        self.wake.notify_all();
    }

    /// Allocates a handle in `[3, 32767]` by scanning for the smallest gap,
    /// and constructs the new session. Fails with [`Error::Invalid`] when
    /// the handle space is exhausted, per §4.6.
    pub fn open(self: &Arc<Machine>, transport: Transport) -> Result<Arc<Session>> {
        let mut indices = self.indices.lock().unwrap();
        let mut handle = 3u32;
        while indices.by_handle.contains_key(&handle) {
            handle += 1;
            if handle > 32767 {
                return Err(crate::invalid!("session handle space is exhausted"));
            }
        }
        let session = Session::new(Arc::downgrade(self), handle, transport, &self.config);
        indices.by_handle.insert(handle, session.clone());
        trace!("machine {}: opened session {handle}", self.name);
        Ok(session)
    }

    /// Binds `session` to `requested`, consulting the matching port map for
    /// IP endpoints. Fails with [`Error::AddressInUse`] on collision.
    pub fn bind(&self, session: &Arc<Session>, requested: Endpoint) -> Result<()> {
        let endpoint = match requested {
            Endpoint::Ip(host, port) => {
                if !self.local_addresses.contains(&host) {
                    return Err(crate::invalid!("{host} is not a local address of machine {}", self.name));
                }
                let port_map = match session.transport().kind {
                    TransportKind::Stream => &self.tcp_ports,
                    TransportKind::Datagram => &self.udp_ports,
                };
                let port = port_map.acquire(port, self.config.ephemeral_ports.clone())?;
                Endpoint::Ip(host, port)
            }
            Endpoint::Local(path) => {
                if path.as_os_str().is_empty() {
                    return Err(crate::invalid!("local endpoint path must not be empty"));
                }
                Endpoint::Local(path)
            }
            Endpoint::Undefined => return Err(crate::invalid!("cannot bind to an undefined endpoint")),
        };
        let key = (session.transport().kind, endpoint.clone());
        let mut indices = self.indices.lock().unwrap();
        if indices.by_source.contains_key(&key) {
            return Err(Error::AddressInUse);
        }
        indices.by_source.insert(key, Arc::downgrade(session));
        drop(indices);
        session.set_source(endpoint);
        Ok(())
    }

    pub fn listen(&self, session: &Arc<Session>, backlog: usize) -> Result<()> {
        if !session.source().is_defined() {
            return Err(crate::invalid!("cannot listen before bind"));
        }
        session.set_listening(backlog);
        Ok(())
    }

    /// For datagrams, records the remote endpoint. For streams, looks up a
    /// listening session at `remote`, creates a mirror server-side session,
    /// and links the two via weak peer references.
    pub fn connect(self: &Arc<Machine>, session: &Arc<Session>, remote: Endpoint) -> Result<()> {
        match session.transport().kind {
            TransportKind::Datagram => {
                session.set_remote(remote);
                Ok(())
            }
            TransportKind::Stream => {
                let key = (session.transport().kind, remote.clone());
                let listener = self
                    .indices
                    .lock()
                    .unwrap()
                    .by_source
                    .get(&key)
                    .and_then(Weak::upgrade);
                let listener = listener.ok_or(Error::ConnectionRefused)?;
                if !listener.is_listening() {
                    return Err(Error::ConnectionRefused);
                }
                let mirror = self.open(session.transport())?;
                mirror.set_source(remote.clone());
                mirror.set_remote(session.source());
                mirror.set_connected(true);
                session.set_remote(remote);
                session.set_connected(true);
                session.set_peer(Arc::downgrade(&mirror));
                mirror.set_peer(Arc::downgrade(session));
                listener.push_accepted(mirror);
                Ok(())
            }
        }
    }

    /// Removes `session` from every index it is registered under and
    /// releases its source port, then tears it down.
    pub fn close(&self, session: &Arc<Session>) {
        let mut indices = self.indices.lock().unwrap();
        indices.by_handle.remove(&session.handle());
        let source = session.source();
        if source.is_defined() {
            let key = (session.transport().kind, source.clone());
            indices.by_source.remove(&key);
            if let Endpoint::Ip(_, port) = source {
                match session.transport().kind {
                    TransportKind::Stream => self.tcp_ports.release(port),
                    TransportKind::Datagram => self.udp_ports.release(port),
                }
            }
        }
        let remote = session.remote();
        indices.by_binding.remove(&(session.transport().kind, source, remote));
        drop(indices);
        session.close();
        debug!("machine {}: closed session {}", self.name, session.handle());
    }

    /// Snapshots the session table and drains each session's outgoing
    /// queue into its peer's incoming queue, per §4.6 Step. Public so
    /// tests and proactor integration can force quiescence without waiting
    /// on the background thread's poll interval.
    pub fn step_once(&self) {
        let sessions: Vec<Arc<Session>> = self.indices.lock().unwrap().by_handle.values().cloned().collect();
        for session in sessions {
            self.step_session(&session);
        }
    }

    fn step_session(&self, session: &Arc<Session>) {
        let mut retry = self.retry.lock().unwrap().remove(&session.handle()).unwrap_or_default();
        retry.reverse();
        while let Some(packet) = retry.pop() {
            if !self.deliver(session, packet.clone()) {
                self.retry.lock().unwrap().entry(session.handle()).or_default().push(packet);
                return;
            }
        }
        loop {
            let packet = match session.outgoing.dequeue(false) {
                Ok(p) => p,
                Err(_) => return,
            };
            if !self.deliver(session, packet.clone()) {
                match session.transport().kind {
                    TransportKind::Datagram => {
                        self.retry.lock().unwrap().entry(session.handle()).or_default().push(packet);
                    }
                    TransportKind::Stream => {
                        session.outgoing.retry(packet);
                        return;
                    }
                }
            }
        }
    }

    /// Resolves the packet's destination (the packet's own weak
    /// back-reference first, then an index lookup) and enqueues it into
    /// the remote session's incoming queue. Returns `false` on a
    /// transient failure the caller should retry.
    fn deliver(&self, source: &Arc<Session>, packet: Arc<Packet>) -> bool {
        let remote_session = packet
            .remote_session()
            .and_then(Weak::upgrade)
            .or_else(|| self.lookup_by_source(source.transport().kind, packet.remote()));
        let Some(remote_session) = remote_session else {
            source.set_error(SessionError::ConnectionDead);
            return true;
        };
        match remote_session.incoming.enqueue(packet, false) {
            Ok(()) => {
                remote_session.update();
                true
            }
            Err(Error::ConnectionDead) => {
                source.set_error(SessionError::ConnectionDead);
                true
            }
            Err(_) => false,
        }
    }

    fn lookup_by_source(&self, kind: TransportKind, endpoint: &Endpoint) -> Option<Arc<Session>> {
        self.indices
            .lock()
            .unwrap()
            .by_source
            .get(&(kind, endpoint.clone()))
            .and_then(Weak::upgrade)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_all();
        if let Some(handle) = self.step_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_all();
    }
}

#[allow(dead_code)]
fn default_transport_for(family: AddressFamily) -> Transport {
    Transport {
        kind: TransportKind::Stream,
        family,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> Transport {
        Transport {
            kind: TransportKind::Stream,
            family: AddressFamily::Ipv4,
        }
    }

    fn loopback(port: u16) -> Endpoint {
        Endpoint::Ip(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn handles_are_allocated_from_three_upward() {
        let machine = Machine::new(MachineConfig::default());
        let a = machine.open(stream()).unwrap();
        let b = machine.open(stream()).unwrap();
        assert_eq!(a.handle(), 3);
        assert_eq!(b.handle(), 4);
    }

    #[test]
    fn bind_rejects_non_local_address() {
        let machine = Machine::new(MachineConfig::default());
        let session = machine.open(stream()).unwrap();
        let remote_host = Endpoint::Ip("8.8.8.8".parse().unwrap(), 80);
        assert!(machine.bind(&session, remote_host).is_err());
    }

    #[test]
    fn bind_duplicate_port_is_address_in_use() {
        let machine = Machine::new(MachineConfig::default());
        let a = machine.open(stream()).unwrap();
        let b = machine.open(stream()).unwrap();
        machine.bind(&a, loopback(9000)).unwrap();
        assert!(matches!(machine.bind(&b, loopback(9000)), Err(Error::AddressInUse)));
    }

    #[test]
    fn connect_without_listener_is_refused() {
        let machine = Machine::new(MachineConfig::default());
        let session = machine.open(stream()).unwrap();
        machine.bind(&session, loopback(0)).unwrap();
        assert!(matches!(machine.connect(&session, loopback(9001)), Err(Error::ConnectionRefused)));
    }

}
