use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use sockq::addr::SockAddr;
use sockq::conn::{pipe, Listener};
use sockq::queue::{Deadline, QueueConfig};
use sockq::Error;

fn addr(port: u16) -> SockAddr {
    SockAddr::inet4([127, 0, 0, 1], port)
}

#[test]
fn echo_over_accepted_connection() {
    let listener = Listener::bind(addr(7), QueueConfig::byte_stream().with_capacity(64)).unwrap();
    let client = listener.connect(addr(40_000), Deadline::NONE).unwrap();
    let server = listener.accept().unwrap();
    assert_eq!(server.local_addr(), listener.local_addr());

    let echo = thread::spawn(move || {
        let mut server = server;
        let mut buf = [0u8; 16];
        loop {
            let n = server.read(&mut buf).unwrap();
            if n == 0 {
                server.close_write();
                return;
            }
            server.write_all(&buf[..n]).unwrap();
        }
    });

    let message: Vec<u8> = (0..1_000u32).map(|i| (i % 256) as u8).collect();
    let mut echoed = Vec::new();
    thread::scope(|s| {
        s.spawn(|| {
            let mut writer = &client;
            writer.write_all(&message).unwrap();
            client.close_write();
        });
        let mut reader = &client;
        reader.read_to_end(&mut echoed).unwrap();
    });
    echo.join().unwrap();
    assert_eq!(echoed, message);
}

#[test]
fn endpoint_timeout_maps_to_would_block() {
    let (mut a, _b) = pipe(addr(1), addr(2), &QueueConfig::byte_stream()).unwrap();
    a.set_timeout(Duration::from_millis(20));
    let err = Read::read(&mut a, &mut [0u8; 4]).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    assert_eq!(err.raw_os_error(), Some(libc::EAGAIN));
}

#[test]
fn accept_honours_listener_deadline() {
    let listener = Listener::bind(addr(8), QueueConfig::byte_stream()).unwrap();
    listener.set_deadline(Deadline::at(1));
    let err = listener.accept().unwrap_err();
    assert!(err.is_temporarily_unavailable());

    listener.close();
    listener.set_deadline(Deadline::NONE);
    assert!(matches!(listener.accept(), Err(Error::Closed)));
}
