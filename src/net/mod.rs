//! In-memory deterministic network simulation, per §3/§4.
//!
//! A [`Machine`] stands in for an operating system's socket layer: sessions
//! are opened, bound, connected, and torn down against it exactly as they
//! would be against real sockets, but every packet transfer happens inside
//! this process, stepped by a background thread rather than a NIC.

pub mod binding;
pub mod machine;
pub mod monitor;
pub mod packet;
pub mod packet_queue;
pub mod port_map;
pub mod session;

pub use binding::{Binding, Endpoint};
pub use machine::Machine;
pub use monitor::{Interest, Monitor, ReadinessEvent};
pub use packet::{AddressFamily, Packet, PacketType, Transport, TransportKind, MTU};
pub use session::{Session, SessionError, ShutdownDirection, SocketOptions};
