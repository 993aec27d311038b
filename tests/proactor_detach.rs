//! Concrete scenario from §8: submit a receive, cancel it, then detach.
//! Cancellation must stay silent; detach must announce exactly once.

use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nexio::config::ProactorConfig;
use nexio::error::Error;
use nexio::proactor::Engine;

fn real_handle() -> (TcpListener, i64) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    #[cfg(unix)]
    let handle = {
        use std::os::unix::io::AsRawFd;
        listener.as_raw_fd() as i64
    };
    #[cfg(windows)]
    let handle = {
        use std::os::windows::io::AsRawSocket;
        listener.as_raw_socket() as i64
    };
    (listener, handle)
}

#[test]
fn detach_idempotence_scenario() {
    let engine = Engine::new(ProactorConfig::default()).unwrap();
    let (_listener, handle) = real_handle();

    let detached = Arc::new(AtomicUsize::new(0));
    let d = detached.clone();
    engine.attach(handle, move || {
        d.fetch_add(1, Ordering::SeqCst);
    }).unwrap();

    let announced = Arc::new(AtomicUsize::new(0));
    let a = announced.clone();
    engine
        .submit_receive(
            handle,
            vec![0u8; 64],
            false,
            || Err(Error::WouldBlock),
            move |_| {
                a.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

    // Cancelling the in-flight receive must not invoke its announce closure.
    engine.cancel(handle);
    assert_eq!(announced.load(Ordering::SeqCst), 0, "cancellation must be silent");

    // The detach itself produces exactly one detached announcement.
    assert_eq!(detached.load(Ordering::SeqCst), 0);
    engine.detach(handle);
    assert_eq!(detached.load(Ordering::SeqCst), 1);

    // Detaching again is idempotent: no second announcement.
    engine.detach(handle);
    assert_eq!(detached.load(Ordering::SeqCst), 1);
}
