//! Concrete scenario from §8: a stream send-shutdown is observed by the
//! peer as an in-order EOF after its pending data drains.

use nexio::config::MachineConfig;
use nexio::error::Error;
use nexio::net::binding::Endpoint;
use nexio::net::machine::Machine;
use nexio::net::packet::{AddressFamily, Transport, TransportKind};
use nexio::net::session::ShutdownDirection;
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

#[test]
fn session_stream_shutdown_scenario() {
    let machine = Machine::new(MachineConfig::default());
    let listener = machine.open(stream()).unwrap();
    machine.bind(&listener, loopback(9443)).unwrap();
    machine.listen(&listener, 16).unwrap();

    let client = machine.open(stream()).unwrap();
    machine.bind(&client, loopback(0)).unwrap();
    machine.connect(&client, loopback(9443)).unwrap();

    let server = listener.accept(true).unwrap();

    client.send(b"hello", true).unwrap();
    client.shutdown(ShutdownDirection::Send);

    machine.step_once();

    let mut buf = [0u8; 16];
    let n = server.receive(&mut buf, true).unwrap();
    assert_eq!(&buf[..n], b"hello");

    assert!(matches!(server.receive(&mut buf, true), Err(Error::Eof)));
    assert!(matches!(server.receive(&mut buf, false), Err(Error::Eof)));

    machine.shutdown();
}
