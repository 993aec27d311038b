//! Ambient configuration surface.
//!
//! Mirrors `EventLoopConfig` in the teacher's event loop: a handful of plain
//! structs with `Default` impls carrying the numbers a deployment is most
//! likely to want to tune, grouped by the subsystem they configure.

use std::ops::Range;

/// Per-session defaults for the simulation machine (§6).
#[derive(Copy, Clone, Debug)]
pub struct MachineConfig {
    /// Default socket send buffer size, used as the outgoing packet queue's
    /// high watermark.
    pub send_buffer: usize,
    /// Default socket receive buffer size, used as the incoming packet
    /// queue's high watermark.
    pub recv_buffer: usize,
    /// Default low watermark for both queues.
    pub low_watermark: usize,
    /// Default listen backlog.
    pub backlog: usize,
    /// Maximum transfer unit; payloads are chunked to this size.
    pub mtu: usize,
    /// Ephemeral port range handed out when a session requests port 0.
    pub ephemeral_ports: Range<u16>,
    /// Valid range of session handles.
    pub handle_range: Range<u32>,
}

impl Default for MachineConfig {
    fn default() -> MachineConfig {
        MachineConfig {
            send_buffer: 262_144,
            recv_buffer: 262_144,
            low_watermark: 1,
            backlog: 4096,
            mtu: 65536,
            ephemeral_ports: 49152..65535,
            handle_range: 3..32768,
        }
    }
}

/// Runtime tuning for the proactor engine (§5).
#[derive(Copy, Clone, Debug)]
pub struct ProactorConfig {
    /// Minimum number of waiter threads; always >= 1.
    pub min_threads: usize,
    /// Maximum number of waiter threads.
    pub max_threads: usize,
    /// Maximum number of chronology timers drained per waiter wake-up
    /// (the "configured cycle budget" in §4.7 Wait).
    pub chronology_budget: usize,
    /// Capacity of the event pool; events are recycled rather than
    /// reallocated once this many are in flight.
    pub event_pool_capacity: usize,
}

impl Default for ProactorConfig {
    fn default() -> ProactorConfig {
        ProactorConfig {
            min_threads: 1,
            max_threads: 4,
            chronology_budget: 64,
            event_pool_capacity: 1024,
        }
    }
}

/// Tuning for the ASN-style codec.
#[derive(Copy, Clone, Debug)]
pub struct CodecConfig {
    /// Maximum nesting depth the decoder will descend to. A malformed or
    /// adversarial DER stream with deeply nested constructed tags would
    /// otherwise grow the context stack without bound; original_source
    /// trusted well-formed DER and had no such guard, but a codec exposed to
    /// untrusted wire bytes needs one.
    pub max_nesting_depth: usize,
}

impl Default for CodecConfig {
    fn default() -> CodecConfig {
        CodecConfig {
            max_nesting_depth: 64,
        }
    }
}

/// Aggregate configuration threaded through the machine and proactor
/// constructors.
#[derive(Copy, Clone, Debug, Default)]
pub struct Config {
    pub machine: MachineConfig,
    pub proactor: ProactorConfig,
    pub codec: CodecConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = MachineConfig::default();
        assert_eq!(cfg.send_buffer, 262_144);
        assert_eq!(cfg.recv_buffer, 262_144);
        assert_eq!(cfg.low_watermark, 1);
        assert_eq!(cfg.backlog, 4096);
        assert_eq!(cfg.mtu, 65536);
        assert_eq!(cfg.ephemeral_ports, 49152..65535);
        assert_eq!(cfg.handle_range, 3..32768);
    }
}
