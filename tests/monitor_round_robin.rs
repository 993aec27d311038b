//! Concrete scenario from §8: round-robin readiness delivery across three
//! registered sessions, with one dropped from the rotation mid-stream.

use nexio::config::MachineConfig;
use nexio::net::binding::Endpoint;
use nexio::net::machine::Machine;
use nexio::net::monitor::{Interest, Monitor};
use nexio::net::packet::{AddressFamily, Transport, TransportKind};
use std::net::{IpAddr, Ipv4Addr};

fn stream() -> Transport {
    Transport {
        kind: TransportKind::Stream,
        family: AddressFamily::Ipv4,
    }
}

fn loopback(port: u16) -> Endpoint {
    Endpoint::Ip(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

fn readable_interest() -> Interest {
    Interest {
        readable: true,
        ..Interest::default()
    }
}

#[test]
fn round_robin_scenario() {
    let machine = Machine::new(MachineConfig::default());
    let monitor = Monitor::new();

    let mut servers = Vec::new();
    for i in 0..3u16 {
        let listener = machine.open(stream()).unwrap();
        machine.bind(&listener, loopback(9500 + i)).unwrap();
        machine.listen(&listener, 16).unwrap();

        let client = machine.open(stream()).unwrap();
        machine.bind(&client, loopback(0)).unwrap();
        machine.connect(&client, loopback(9500 + i)).unwrap();

        let server = listener.accept(true).unwrap();
        client.send(b"x", true).unwrap();
        servers.push(server);
    }
    machine.step_once();

    for s in &servers {
        monitor.register(s, readable_interest());
    }
    let handles: Vec<u32> = servers.iter().map(|s| s.handle()).collect();

    let first = monitor.process();
    assert_eq!(first.iter().map(|e| e.handle).collect::<Vec<_>>(), handles);

    let second = monitor.process();
    assert_eq!(second.iter().map(|e| e.handle).collect::<Vec<_>>(), handles);

    monitor.set_interest(servers[1].handle(), Interest::default());
    let third = monitor.process();
    assert_eq!(
        third.iter().map(|e| e.handle).collect::<Vec<_>>(),
        vec![handles[0], handles[2]]
    );

    machine.shutdown();
}
